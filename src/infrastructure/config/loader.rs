use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Known top-level keys of [`Config`]. Kept in sync by hand rather than
/// derived, since `Config` itself stays a plain data shape (see its own
/// doc comment) and doesn't carry `deny_unknown_fields`.
const KNOWN_TOP_LEVEL_KEYS: &[&str] = &[
    "backlog",
    "database",
    "logging",
    "model_routing",
    "retry",
    "parallelism_cap",
    "trust_level",
    "identity",
    "telemetry",
    "memory",
    "privacy",
];

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("invalid parallelism_cap: {0}. must be between 1 and 256")]
    InvalidParallelismCap(usize),

    #[error("invalid trust_level: {0}. must be one of: read_only, workspace, shell")]
    InvalidTrustLevel(String),

    #[error("invalid log level: {0}. must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}. must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("invalid max_connections: {0}. must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("invalid max_retries: {0}. cannot be 0")]
    InvalidMaxRetries(u32),

    #[error("invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})")]
    InvalidBackoff(u64, u64),

    #[error("invalid entity_similarity_threshold: {0}. must be in [0.0, 1.0]")]
    InvalidSimilarityThreshold(f64),

    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging (spec §9).
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (`Serialized`)
    /// 2. `.sunwell/config.yaml` (project config, created by `sunwell init`)
    /// 3. `.sunwell/local.yaml` (project local overrides, optional)
    /// 4. Environment variables (`SUNWELL_*` prefix, `__` nesting, highest
    ///    priority)
    ///
    /// Configuration is always project-local (`pwd/.sunwell/`) so that
    /// multiple runtimes on one machine can track independent goals.
    pub fn load() -> Result<Config> {
        let figment = Self::figment();
        Self::reject_unknown_keys(&figment)?;

        let config: Config = figment
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, skipping the project
    /// `.sunwell/` hierarchy entirely. Used by tests and `--config`.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()));
        Self::reject_unknown_keys(&figment)?;

        let config: Config = figment.extract().context(format!(
            "failed to load config from {}",
            path.as_ref().display()
        ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".sunwell/config.yaml"))
            .merge(Yaml::file(".sunwell/local.yaml"))
            .merge(Env::prefixed("SUNWELL_").split("__"))
    }

    /// Unknown top-level keys are rejected at load (spec §9) rather than
    /// silently ignored, since a typo in `.sunwell/config.yaml` should
    /// surface immediately instead of quietly falling back to a default.
    fn reject_unknown_keys(figment: &Figment) -> Result<(), ConfigError> {
        if let Ok(data) = figment.data() {
            for dict in data.values() {
                for key in dict.keys() {
                    if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
                        return Err(ConfigError::UnknownKey(key.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.parallelism_cap == 0 || config.parallelism_cap > 256 {
            return Err(ConfigError::InvalidParallelismCap(config.parallelism_cap));
        }

        let valid_trust_levels = ["read_only", "workspace", "shell"];
        if !valid_trust_levels.contains(&config.trust_level.as_str()) {
            return Err(ConfigError::InvalidTrustLevel(config.trust_level.clone()));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }
        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if !(0.0..=1.0).contains(&config.memory.entity_similarity_threshold) {
            return Err(ConfigError::InvalidSimilarityThreshold(
                config.memory.entity_similarity_threshold,
            ));
        }

        for (category, model) in &config.model_routing.category_overrides {
            if model.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "model_routing.category_overrides['{category}'] cannot be empty"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Serialized as SerializedProvider;

    #[test]
    fn default_config_passes_validation() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn yaml_overrides_merge_over_defaults() {
        let figment = Figment::new()
            .merge(SerializedProvider::defaults(Config::default()))
            .merge(Yaml::string(
                r"
parallelism_cap: 8
model_routing:
  enabled: false
",
            ));
        let config: Config = figment.extract().expect("should extract");
        assert_eq!(config.parallelism_cap, 8);
        assert!(!config.model_routing.enabled);
        assert_eq!(config.database.path, ".sunwell/sunwell.db");
    }

    #[test]
    fn env_vars_override_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("SUNWELL_PARALLELISM_CAP", "12");
            let figment = Figment::new()
                .merge(SerializedProvider::defaults(Config::default()))
                .merge(Yaml::string("parallelism_cap: 8"))
                .merge(Env::prefixed("SUNWELL_").split("__"));
            let config: Config = figment.extract().expect("should extract");
            assert_eq!(config.parallelism_cap, 12);
            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let figment = Figment::new()
            .merge(SerializedProvider::defaults(Config::default()))
            .merge(Yaml::string("bogus_key: 1"));
        let err = ConfigLoader::reject_unknown_keys(&figment).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(ref k) if k == "bogus_key"));
    }

    #[test]
    fn rejects_zero_parallelism_cap() {
        let config = Config {
            parallelism_cap: 0,
            ..Config::default()
        };
        let result = ConfigLoader::validate(&config);
        assert!(matches!(result, Err(ConfigError::InvalidParallelismCap(0))));
    }

    #[test]
    fn rejects_invalid_trust_level() {
        let config = Config {
            trust_level: "root".to_string(),
            ..Config::default()
        };
        let result = ConfigLoader::validate(&config);
        assert!(matches!(result, Err(ConfigError::InvalidTrustLevel(_))));
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 20_000;
        config.retry.max_backoff_ms = 10_000;
        let result = ConfigLoader::validate(&config);
        assert!(matches!(result, Err(ConfigError::InvalidBackoff(20_000, 10_000))));
    }
}
