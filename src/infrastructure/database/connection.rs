//! `SQLite` connection pool manager (spec §3, §6).
//!
//! WAL mode trades a small amount of write latency for readers that
//! never block behind writers, which matters here since the planner,
//! identity digesting, and memory retrieval all read concurrently with
//! a single worker applying goal results.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};

use crate::domain::errors::{DomainError, DomainResult};

/// Owns the pool and the one-time migration step.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Open a pool against `database_url` (e.g. `sqlite:.sunwell/sunwell.db`
    /// or `sqlite::memory:`) with:
    /// - Journal mode: WAL
    /// - Synchronous: NORMAL
    /// - Foreign keys: enabled
    /// - Busy timeout: 5s
    /// - Pool: 5-10 connections, 30s idle timeout, 30min max lifetime,
    ///   10s acquire timeout
    pub async fn new(database_url: &str) -> DomainResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DomainError::DatabaseError(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(5)
            .max_connections(10)
            .idle_timeout(Duration::from_secs(30))
            .max_lifetime(Duration::from_secs(1800))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Apply all pending migrations under `migrations/`. Safe to call
    /// on every startup: already-applied migrations are skipped.
    pub async fn migrate(&self) -> DomainResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DomainError::DatabaseError(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_pool_opens_against_in_memory_db() {
        let db = DatabaseConnection::new("sqlite::memory:")
            .await
            .expect("failed to open connection");
        assert!(!db.pool().is_closed());
        db.close().await;
    }

    #[tokio::test]
    async fn migrations_create_expected_tables() {
        let db = DatabaseConnection::new("sqlite::memory:")
            .await
            .expect("failed to open connection");
        db.migrate().await.expect("failed to run migrations");

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name != 'sqlite_sequence' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .expect("failed to query sqlite_master");
        let names: Vec<String> = tables.into_iter().map(|t| t.0).collect();

        for expected in ["goals", "completions", "episodic_attempts", "rag_passages", "entities", "model_observations"] {
            assert!(names.contains(&expected.to_string()), "missing table {expected}");
        }

        db.close().await;
    }

    #[tokio::test]
    async fn foreign_keys_pragma_is_enabled() {
        let db = DatabaseConnection::new("sqlite::memory:")
            .await
            .expect("failed to open connection");
        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .expect("failed to read pragma");
        assert_eq!(result.0, 1);
        db.close().await;
    }
}
