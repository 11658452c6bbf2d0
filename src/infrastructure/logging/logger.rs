//! `tracing-subscriber` wiring driven by `domain::models::config::LoggingConfig`.
//!
//! Grounded on the teacher's `infrastructure::logging::logger::LoggerImpl`:
//! a daily-rotating file layer (always JSON, for durable structured
//! logs) plus a stdout layer whose format follows `LoggingConfig::format`.
//! The teacher's `LogConfig::log_dir` is `Option<PathBuf>`, letting a
//! deployment disable file output entirely; sunwell's `LoggingConfig::dir`
//! is a plain `String` with a concrete default (`.sunwell/logs`), so
//! there is no "stdout only" branch here — every run gets both a durable
//! trace on disk and live console feedback, which suits a CLI tool whose
//! invocations are normally short-lived and whose operator is watching
//! the terminal.

use anyhow::Result;
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::LoggingConfig;
use crate::infrastructure::logging::rotation::LogRotator;

const LOG_FILE_PREFIX: &str = "sunwell.log";

/// Holds the `tracing_appender` worker guard for the process lifetime.
/// Dropping this flushes any buffered non-blocking writes, so the
/// caller (`main.rs`) must keep it alive until shutdown.
pub struct LoggerHandle {
    _guard: WorkerGuard,
    rotator: LogRotator,
}

impl LoggerHandle {
    /// Deletes rotated log files in `dir` older than `retention_days`.
    /// Intended to be called once at startup, mirroring the teacher's
    /// `run_periodic_cleanup` but invoked eagerly rather than as a
    /// background loop, since sunwell's CLI invocations are short-lived.
    pub fn cleanup_old_logs(&self) -> Result<usize> {
        self.rotator.cleanup_old_logs()
    }
}

/// Initializes the global `tracing` subscriber from `config`.
///
/// # Errors
/// Returns an error if `config.level` does not parse to a known
/// tracing level or if the log directory cannot be created.
pub fn init(config: &LoggingConfig) -> Result<LoggerHandle> {
    let level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    std::fs::create_dir_all(&config.dir)?;

    let file_appender = rolling::daily(&config.dir, LOG_FILE_PREFIX);
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter.clone());

    match config.format.as_str() {
        "json" => {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_target(true)
                .with_filter(env_filter);

            tracing_subscriber::registry().with(file_layer).with(stdout_layer).init();
        }
        _ => {
            let stdout_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(io::stdout)
                .with_target(true)
                .with_filter(env_filter);

            tracing_subscriber::registry().with(file_layer).with(stdout_layer).init();
        }
    }

    tracing::info!(
        level = %config.level,
        format = %config.format,
        dir = %config.dir,
        retention_days = config.retention_days,
        "logger initialized"
    );

    let rotator = LogRotator::new(&config.dir, config.retention_days, LOG_FILE_PREFIX);

    Ok(LoggerHandle { _guard: guard, rotator })
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => anyhow::bail!("invalid log level: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_level() {
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn accepts_known_levels() {
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
    }
}
