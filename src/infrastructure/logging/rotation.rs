//! Time-based log retention cleanup.
//!
//! Grounded on the teacher's `infrastructure::logging::rotation::LogRotator`.
//! File rotation itself is delegated to `tracing_appender::rolling::daily`
//! (one file per day, named `<prefix>.YYYY-MM-DD`), so sunwell's rotator
//! only needs the teacher's time-based retention half (`cleanup_old_logs`)
//! and not the size-based `should_rotate`/`rotate_if_needed` pair, which
//! existed in the teacher to manage a single ever-growing file. sunwell
//! also runs this synchronously once at startup rather than as a spawned
//! periodic task, since CLI invocations are short-lived and there is no
//! long-running daemon process to host a background loop.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Deletes log files older than a retention window.
#[derive(Debug, Clone)]
pub struct LogRotator {
    dir: PathBuf,
    retention_days: u32,
    file_prefix: String,
}

impl LogRotator {
    pub fn new(dir: impl Into<PathBuf>, retention_days: u32, file_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            retention_days,
            file_prefix: file_prefix.into(),
        }
    }

    /// Deletes files in `dir` matching `<file_prefix>*` whose modification
    /// time is older than `retention_days`. Returns the number deleted.
    pub fn cleanup_old_logs(&self) -> Result<usize> {
        if !self.dir.exists() {
            warn!(path = %self.dir.display(), "log directory does not exist");
            return Ok(0);
        }

        let cutoff = Utc::now() - Duration::days(i64::from(self.retention_days));
        let mut deleted = 0;

        for entry in std::fs::read_dir(&self.dir).context("failed to read log directory")? {
            let entry = entry.context("failed to read directory entry")?;
            let path = entry.path();

            if !is_candidate(&path, &self.file_prefix) {
                continue;
            }

            let metadata = std::fs::metadata(&path).context("failed to stat log file")?;
            let modified: DateTime<Utc> = metadata
                .modified()
                .context("failed to read log file modification time")?
                .into();

            if modified < cutoff {
                std::fs::remove_file(&path).context("failed to delete old log file")?;
                info!(path = %path.display(), age_days = (Utc::now() - modified).num_days(), "deleted old log file");
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(count = deleted, "cleaned up old log files");
        }

        Ok(deleted)
    }
}

fn is_candidate(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::time::{Duration as StdDuration, SystemTime};
    use tempfile::TempDir;

    fn touch_with_age(path: &Path, age_days: u64) {
        let mut file = fs::File::create(path).unwrap();
        file.write_all(b"log line\n").unwrap();
        drop(file);
        let old_time = SystemTime::now() - StdDuration::from_secs(age_days * 86_400);
        filetime_set(path, old_time);
    }

    fn filetime_set(path: &Path, time: SystemTime) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn deletes_files_older_than_retention() {
        let dir = TempDir::new().unwrap();
        let old_log = dir.path().join("sunwell.log.2020-01-01");
        touch_with_age(&old_log, 60);

        let rotator = LogRotator::new(dir.path(), 14, "sunwell.log");
        let deleted = rotator.cleanup_old_logs().unwrap();

        assert_eq!(deleted, 1);
        assert!(!old_log.exists());
    }

    #[test]
    fn keeps_files_within_retention() {
        let dir = TempDir::new().unwrap();
        let recent_log = dir.path().join("sunwell.log.2026-07-28");
        touch_with_age(&recent_log, 1);

        let rotator = LogRotator::new(dir.path(), 14, "sunwell.log");
        let deleted = rotator.cleanup_old_logs().unwrap();

        assert_eq!(deleted, 0);
        assert!(recent_log.exists());
    }

    #[test]
    fn ignores_files_with_unrelated_prefix() {
        let dir = TempDir::new().unwrap();
        let unrelated = dir.path().join("other.txt");
        touch_with_age(&unrelated, 60);

        let rotator = LogRotator::new(dir.path(), 14, "sunwell.log");
        let deleted = rotator.cleanup_old_logs().unwrap();

        assert_eq!(deleted, 0);
        assert!(unrelated.exists());
    }

    #[test]
    fn missing_directory_returns_zero() {
        let rotator = LogRotator::new("/nonexistent/does/not/exist", 14, "sunwell.log");
        assert_eq!(rotator.cleanup_old_logs().unwrap(), 0);
    }
}
