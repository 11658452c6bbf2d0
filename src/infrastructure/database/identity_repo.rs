use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{GlobalIdentity, SessionIdentity};
use crate::domain::ports::IdentityRepository;

/// `SQLite`-backed [`IdentityRepository`] (spec §3, §4.9, §4.10).
///
/// `global_identity` is a singleton row (`id = 1`); `load_global`
/// creates it on first access rather than requiring a seed migration
/// row, so a fresh database behaves identically to `GlobalIdentity::default()`.
pub struct SqliteIdentityRepository {
    pool: SqlitePool,
}

impl SqliteIdentityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityRepository for SqliteIdentityRepository {
    async fn load_global(&self) -> DomainResult<GlobalIdentity> {
        let row = sqlx::query("SELECT * FROM global_identity WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(GlobalIdentity::default());
        };

        let facts: String = row.get("facts");
        let behaviors: String = row.get("behaviors");
        Ok(GlobalIdentity {
            prompt: row.get("prompt"),
            prompt_confidence: row.get("prompt_confidence"),
            facts: serde_json::from_str(&facts)
                .map_err(|e| DomainError::DatabaseError(format!("corrupt facts json: {e}")))?,
            behaviors: serde_json::from_str(&behaviors)
                .map_err(|e| DomainError::DatabaseError(format!("corrupt behaviors json: {e}")))?,
            last_updated: row
                .get::<Option<String>, _>("last_updated")
                .as_deref()
                .and_then(parse_timestamp),
            session_count: row.get::<i64, _>("session_count") as u32,
        })
    }

    async fn save_global(&self, identity: &GlobalIdentity) -> DomainResult<()> {
        let facts = serde_json::to_string(&identity.facts)
            .map_err(|e| DomainError::DatabaseError(format!("failed to serialize facts: {e}")))?;
        let behaviors = serde_json::to_string(&identity.behaviors)
            .map_err(|e| DomainError::DatabaseError(format!("failed to serialize behaviors: {e}")))?;

        sqlx::query(
            "INSERT INTO global_identity (id, prompt, prompt_confidence, facts, behaviors, last_updated, session_count)
             VALUES (1, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                prompt = excluded.prompt,
                prompt_confidence = excluded.prompt_confidence,
                facts = excluded.facts,
                behaviors = excluded.behaviors,
                last_updated = excluded.last_updated,
                session_count = excluded.session_count",
        )
        .bind(&identity.prompt)
        .bind(identity.prompt_confidence)
        .bind(&facts)
        .bind(&behaviors)
        .bind(identity.last_updated.map(|t| t.to_rfc3339()))
        .bind(i64::from(identity.session_count))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_session(&self, session: &SessionIdentity) -> DomainResult<()> {
        let observations = serde_json::to_string(&session.observations)
            .map_err(|e| DomainError::DatabaseError(format!("failed to serialize observations: {e}")))?;

        sqlx::query(
            "INSERT INTO session_identities (session_id, observations, digest, digest_confidence, turn_count_at_digest, inherits_from, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                observations = excluded.observations,
                digest = excluded.digest,
                digest_confidence = excluded.digest_confidence,
                turn_count_at_digest = excluded.turn_count_at_digest,
                inherits_from = excluded.inherits_from,
                updated_at = excluded.updated_at",
        )
        .bind(session.session_id.to_string())
        .bind(&observations)
        .bind(&session.digest)
        .bind(session.digest_confidence)
        .bind(i64::from(session.turn_count_at_digest))
        .bind(session.inherits_from.map(|id| id.to_string()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Observation, ObservationKind};
    use crate::infrastructure::database::DatabaseConnection;
    use uuid::Uuid;

    async fn setup() -> SqliteIdentityRepository {
        let conn = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        conn.migrate().await.unwrap();
        SqliteIdentityRepository::new(conn.pool().clone())
    }

    #[tokio::test]
    async fn load_global_on_fresh_database_returns_default() {
        let repo = setup().await;
        let identity = repo.load_global().await.unwrap();
        assert_eq!(identity.session_count, 0);
        assert!(identity.facts.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_global_round_trips() {
        let repo = setup().await;
        let mut identity = GlobalIdentity::default();
        identity.facts.push("uses rust".into());
        identity.update_prompt("Prefers small, reviewable diffs.", 0.8);
        repo.save_global(&identity).await.unwrap();

        let loaded = repo.load_global().await.unwrap();
        assert_eq!(loaded.facts, vec!["uses rust"]);
        assert_eq!(loaded.prompt, "Prefers small, reviewable diffs.");
    }

    #[tokio::test]
    async fn save_global_upserts_the_singleton_row() {
        let repo = setup().await;
        repo.save_global(&GlobalIdentity::default()).await.unwrap();
        let mut second = GlobalIdentity::default();
        second.session_count = 3;
        repo.save_global(&second).await.unwrap();

        let loaded = repo.load_global().await.unwrap();
        assert_eq!(loaded.session_count, 3);
    }

    #[tokio::test]
    async fn save_session_persists_observations() {
        let repo = setup().await;
        let mut session = SessionIdentity::new(Uuid::new_v4());
        session.record(Observation {
            id: Uuid::new_v4(),
            kind: ObservationKind::Fact,
            content: "targets edition 2021".into(),
            confidence: 0.9,
            evidence: vec![],
            observed_at: chrono::Utc::now(),
        });
        repo.save_session(&session).await.unwrap();

        let row = sqlx::query("SELECT observations FROM session_identities WHERE session_id = ?")
            .bind(session.session_id.to_string())
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        let raw: String = row.get("observations");
        assert!(raw.contains("targets edition 2021"));
    }
}
