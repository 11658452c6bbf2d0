//! Runtime configuration schema (spec §9 configuration hierarchy,
//! SPEC_FULL.md §2.3).
//!
//! This struct is the deserialization target for the figment layers
//! assembled in `infrastructure::config::loader`; unknown keys are
//! rejected there via `deny_unknown_fields`, not here, so this module
//! stays a pure data shape.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub backlog: BacklogConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub model_routing: ModelRoutingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default = "default_parallelism_cap")]
    pub parallelism_cap: usize,

    #[serde(default)]
    pub trust_level: String,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub privacy: PrivacyConfig,
}

const fn default_parallelism_cap() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backlog: BacklogConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            model_routing: ModelRoutingConfig::default(),
            retry: RetryConfig::default(),
            parallelism_cap: default_parallelism_cap(),
            trust_level: default_trust_level(),
            identity: IdentityConfig::default(),
            telemetry: TelemetryConfig::default(),
            memory: MemoryConfig::default(),
            privacy: PrivacyConfig::default(),
        }
    }
}

fn default_trust_level() -> String {
    "workspace".to_string()
}

/// Backlog persistence and claim behavior (spec §4.2, §9 Open Question
/// on stale-claim reclaim resolved by `claim_timeout_seconds`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BacklogConfig {
    #[serde(default = "default_backlog_dir")]
    pub dir: String,

    /// Seconds a claim may sit unclaimed-but-unfinished before
    /// `Backlog::reclaim_stale` considers it abandoned. `0` disables
    /// reclamation.
    #[serde(default)]
    pub claim_timeout_seconds: u64,
}

fn default_backlog_dir() -> String {
    ".backlog".to_string()
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            dir: default_backlog_dir(),
            claim_timeout_seconds: 0,
        }
    }
}

/// `SQLite` persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".sunwell/sunwell.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_log_dir")]
    pub dir: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_retention_days() -> u32 {
    14
}

fn default_log_dir() -> String {
    ".sunwell/logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            retention_days: default_retention_days(),
            dir: default_log_dir(),
        }
    }
}

/// `ModelRouter` selection policy (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModelRoutingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_session_model")]
    pub session_default: String,

    /// Minimum number of historical samples before the performance
    /// tracker's preference overrides the session default (spec §4.3).
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,

    #[serde(default)]
    pub category_overrides: HashMap<String, String>,
}

fn default_session_model() -> String {
    "claude-sonnet-4-5".to_string()
}

const fn default_min_samples() -> u32 {
    5
}

impl Default for ModelRoutingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session_default: default_session_model(),
            min_samples: default_min_samples(),
            category_overrides: HashMap::new(),
        }
    }
}

/// Retry policy for model provider calls (spec §4.3, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    15_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Identity/Mirror-of-self feature toggle (spec §4.9, `--no-identity`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IdentityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Event telemetry toggle. Disabling this stops events from being
/// persisted to the database; the in-process bus still fans out live
/// subscribers regardless (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Memory subsystem thresholds (spec §4.4, §9 Open Questions on entity
/// resolution and episodic similarity).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MemoryConfig {
    #[serde(default = "default_entity_similarity_threshold")]
    pub entity_similarity_threshold: f64,

    #[serde(default = "default_working_memory_capacity")]
    pub working_memory_capacity: usize,
}

const fn default_entity_similarity_threshold() -> f64 {
    0.85
}

const fn default_working_memory_capacity() -> usize {
    50
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            entity_similarity_threshold: default_entity_similarity_threshold(),
            working_memory_capacity: default_working_memory_capacity(),
        }
    }
}

/// Privacy controls gating which goal categories may route to a cloud
/// model provider (spec §4.3, mirrors a Lens's own `PrivacyConfig` but
/// scoped crate-wide rather than per-Lens).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PrivacyConfig {
    #[serde(default)]
    pub local_only: bool,

    #[serde(default)]
    pub keep_local: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_workspace_trust_and_enabled_identity() {
        let config = Config::default();
        assert_eq!(config.trust_level, "workspace");
        assert!(config.identity.enabled);
        assert!(config.telemetry.enabled);
    }

    #[test]
    fn default_backlog_claim_timeout_is_disabled() {
        let config = BacklogConfig::default();
        assert_eq!(config.claim_timeout_seconds, 0);
    }

    #[test]
    fn default_memory_thresholds_match_resolved_open_questions() {
        let config = MemoryConfig::default();
        assert_eq!(config.entity_similarity_threshold, 0.85);
    }

    #[test]
    fn deserializes_partial_yaml_with_defaults_filled_in() {
        let yaml = r"
model_routing:
  enabled: false
parallelism_cap: 8
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.model_routing.enabled);
        assert_eq!(config.parallelism_cap, 8);
        assert_eq!(config.database.path, ".sunwell/sunwell.db");
    }
}
