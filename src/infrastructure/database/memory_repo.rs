use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::memory::cosine_similarity;
use crate::domain::models::{Entity, EpisodicAttempt, Learning, ModelObservation, RagPassage};
use crate::domain::ports::{MemoryRepository, PerformanceSummary};

/// Weight given to vector cosine similarity in the blended hybrid score
/// (spec §4.4 "hybrid (vector cosine + BM25)"); the remainder goes to
/// the normalized BM25 rank.
const VECTOR_SCORE_WEIGHT: f64 = 0.5;

/// `SQLite`-backed [`MemoryRepository`] (spec §3, §4.4).
///
/// Embeddings are stored as raw little-endian `f32` blobs. Episodic
/// cosine similarity is computed in-process by the caller against
/// `recent_episodic`'s output; passage retrieval blends cosine
/// similarity with BM25 itself in `search_passages` since both halves
/// of that hybrid score need to be combined before truncating to
/// `limit`.
pub struct SqliteMemoryRepository {
    pool: SqlitePool,
}

impl SqliteMemoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect()
}

#[async_trait]
impl MemoryRepository for SqliteMemoryRepository {
    async fn store_episodic(&self, attempt: &EpisodicAttempt) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO episodic_attempts (id, question, question_embedding, pattern_used, result_summary, success, confidence, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(attempt.id.to_string())
        .bind(&attempt.question)
        .bind(embedding_to_blob(&attempt.question_embedding))
        .bind(&attempt.pattern_used)
        .bind(&attempt.result_summary)
        .bind(attempt.success)
        .bind(attempt.confidence)
        .bind(attempt.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_episodic(&self, limit: usize) -> DomainResult<Vec<EpisodicAttempt>> {
        let rows = sqlx::query("SELECT * FROM episodic_attempts ORDER BY created_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(EpisodicAttempt {
                    id: Uuid::parse_str(&row.get::<String, _>("id"))
                        .map_err(|e| DomainError::DatabaseError(format!("corrupt uuid: {e}")))?,
                    question: row.get("question"),
                    question_embedding: blob_to_embedding(&row.get::<Vec<u8>, _>("question_embedding")),
                    pattern_used: row.get("pattern_used"),
                    result_summary: row.get("result_summary"),
                    success: row.get("success"),
                    confidence: row.get("confidence"),
                    created_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                        .map_err(|e| DomainError::DatabaseError(format!("corrupt timestamp: {e}")))?
                        .with_timezone(&chrono::Utc),
                })
            })
            .collect()
    }

    async fn store_passage(&self, passage: &RagPassage) -> DomainResult<()> {
        sqlx::query("INSERT INTO rag_passages (id, content, source, embedding, score) VALUES (?, ?, ?, ?, ?)")
            .bind(passage.id.to_string())
            .bind(&passage.content)
            .bind(&passage.source)
            .bind(embedding_to_blob(&passage.embedding))
            .bind(passage.score)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Hybrid retrieval (spec §4.4): `rag_passages_fts` ranks candidates
    /// by BM25, normalized into `[0, 1)` via `x / (1 + x)`, then blended
    /// with the cosine similarity between `query_embedding` and each
    /// passage's stored embedding. A passage with no lexical overlap
    /// still scores on vector similarity alone (BM25 contributes `0`),
    /// so a semantically close passage isn't dropped for missing the
    /// exact words in `query`.
    async fn search_passages(&self, query: &str, query_embedding: &[f32], limit: usize) -> DomainResult<Vec<RagPassage>> {
        let bm25_rows = sqlx::query(
            "SELECT p.id, -bm25(rag_passages_fts) as rank FROM rag_passages_fts f
             JOIN rag_passages p ON p.rowid = f.rowid
             WHERE rag_passages_fts MATCH ?",
        )
        .bind(query)
        .fetch_all(&self.pool)
        .await?;

        let mut bm25_by_id: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
        for row in &bm25_rows {
            let id: String = row.get("id");
            let rank: f64 = row.get("rank");
            let normalized = rank.max(0.0) / (1.0 + rank.max(0.0));
            bm25_by_id.insert(id, normalized);
        }

        let rows = sqlx::query("SELECT id, content, source, embedding FROM rag_passages")
            .fetch_all(&self.pool)
            .await?;

        let mut passages: Vec<RagPassage> = rows
            .iter()
            .map(|row| {
                let id_str: String = row.get("id");
                let embedding = blob_to_embedding(&row.get::<Vec<u8>, _>("embedding"));
                let vector_score = cosine_similarity(query_embedding, &embedding).clamp(0.0, 1.0);
                let bm25_score = bm25_by_id.get(&id_str).copied().unwrap_or(0.0);
                let score = VECTOR_SCORE_WEIGHT * vector_score + (1.0 - VECTOR_SCORE_WEIGHT) * bm25_score;
                Ok(RagPassage {
                    id: Uuid::parse_str(&id_str).map_err(|e| DomainError::DatabaseError(format!("corrupt uuid: {e}")))?,
                    content: row.get("content"),
                    source: row.get("source"),
                    embedding,
                    score,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        passages.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        passages.truncate(limit);
        Ok(passages)
    }

    async fn upsert_entity(&self, entity: &Entity) -> DomainResult<()> {
        let aliases = serde_json::to_string(&entity.aliases)
            .map_err(|e| DomainError::DatabaseError(format!("failed to serialize aliases: {e}")))?;
        sqlx::query(
            "INSERT INTO entities (id, canonical_name, aliases) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET canonical_name = excluded.canonical_name, aliases = excluded.aliases",
        )
        .bind(entity.id.to_string())
        .bind(&entity.canonical_name)
        .bind(&aliases)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_entity(&self, id: Uuid) -> DomainResult<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let aliases: String = row.get("aliases");
            Ok(Entity {
                id,
                canonical_name: row.get("canonical_name"),
                aliases: serde_json::from_str(&aliases)
                    .map_err(|e| DomainError::DatabaseError(format!("corrupt aliases json: {e}")))?,
            })
        })
        .transpose()
    }

    async fn record_cooccurrence(&self, a: Uuid, b: Uuid) -> DomainResult<()> {
        // Canonical ordering keeps (a, b) and (b, a) hitting the same row.
        let (lo, hi) = if a.to_string() <= b.to_string() { (a, b) } else { (b, a) };
        sqlx::query(
            "INSERT INTO cooccurrence_edges (entity_a, entity_b, weight) VALUES (?, ?, 1)
             ON CONFLICT(entity_a, entity_b) DO UPDATE SET weight = weight + 1",
        )
        .bind(lo.to_string())
        .bind(hi.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_learning(&self, learning: &Learning) -> DomainResult<()> {
        let key = Learning::idempotency_key(&learning.content, &learning.source);
        sqlx::query(
            "INSERT INTO learnings (id, content, source, confidence, created_at, idempotency_key) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(idempotency_key) DO NOTHING",
        )
        .bind(learning.id.to_string())
        .bind(&learning.content)
        .bind(&learning.source)
        .bind(learning.confidence)
        .bind(learning.created_at.to_rfc3339())
        .bind(&key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn learnings_for_source(&self, source: &str) -> DomainResult<Vec<Learning>> {
        let rows = sqlx::query("SELECT * FROM learnings WHERE source = ? ORDER BY created_at ASC")
            .bind(source)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Learning {
                    id: Uuid::parse_str(&row.get::<String, _>("id"))
                        .map_err(|e| DomainError::DatabaseError(format!("corrupt uuid: {e}")))?,
                    content: row.get("content"),
                    source: row.get("source"),
                    confidence: row.get("confidence"),
                    created_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
                        .map_err(|e| DomainError::DatabaseError(format!("corrupt timestamp: {e}")))?
                        .with_timezone(&chrono::Utc),
                })
            })
            .collect()
    }

    async fn record_observation(&self, observation: &ModelObservation) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO model_observations (model, category, success, latency_ms, user_edited, recorded_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&observation.model)
        .bind(&observation.category)
        .bind(observation.success)
        .bind(observation.latency_ms as i64)
        .bind(observation.user_edited)
        .bind(observation.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn performance_summary(&self, model: &str, category: &str, min_samples: u32) -> DomainResult<Option<PerformanceSummary>> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n, AVG(CASE WHEN success THEN 1.0 ELSE 0.0 END) as success_rate, AVG(latency_ms) as mean_latency
             FROM model_observations WHERE model = ? AND category = ?",
        )
        .bind(model)
        .bind(category)
        .fetch_one(&self.pool)
        .await?;

        let sample_count: i64 = row.get("n");
        if (sample_count as u32) < min_samples {
            return Ok(None);
        }
        Ok(Some(PerformanceSummary {
            sample_count: sample_count as u32,
            success_rate: row.get::<Option<f64>, _>("success_rate").unwrap_or(0.0),
            mean_latency_ms: row.get::<Option<f64>, _>("mean_latency").unwrap_or(0.0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::DatabaseConnection;

    async fn setup() -> SqliteMemoryRepository {
        let conn = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        conn.migrate().await.unwrap();
        SqliteMemoryRepository::new(conn.pool().clone())
    }

    #[tokio::test]
    async fn store_and_recall_episodic_attempt() {
        let repo = setup().await;
        let attempt = EpisodicAttempt {
            id: Uuid::new_v4(),
            question: "double the amount".into(),
            question_embedding: vec![0.1, 0.2, 0.3],
            pattern_used: "grounded_debate".into(),
            result_summary: "multiplied by two".into(),
            success: true,
            confidence: 0.9,
            created_at: chrono::Utc::now(),
        };
        repo.store_episodic(&attempt).await.unwrap();

        let recent = repo.recent_episodic(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].question, "double the amount");
        assert!((recent[0].question_embedding[1] - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn store_learning_is_idempotent_by_content_and_source() {
        let repo = setup().await;
        let learning = Learning {
            id: Uuid::new_v4(),
            content: "always run clippy".into(),
            source: "goal:g-1".into(),
            confidence: 0.8,
            created_at: chrono::Utc::now(),
        };
        repo.store_learning(&learning).await.unwrap();
        repo.store_learning(&learning).await.unwrap();

        let learnings = repo.learnings_for_source("goal:g-1").await.unwrap();
        assert_eq!(learnings.len(), 1);
    }

    #[tokio::test]
    async fn performance_summary_requires_min_samples() {
        let repo = setup().await;
        for _ in 0..3 {
            repo.record_observation(&ModelObservation {
                model: "claude-sonnet-4-5".into(),
                category: "code".into(),
                success: true,
                latency_ms: 1200,
                user_edited: false,
                recorded_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        }

        assert!(repo.performance_summary("claude-sonnet-4-5", "code", 5).await.unwrap().is_none());
        let summary = repo.performance_summary("claude-sonnet-4-5", "code", 3).await.unwrap().unwrap();
        assert_eq!(summary.sample_count, 3);
        assert!((summary.success_rate - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn cooccurrence_edge_weight_increments_regardless_of_argument_order() {
        let repo = setup().await;
        let a = Entity { id: Uuid::new_v4(), canonical_name: "sunwell.rs".into(), aliases: vec![] };
        let b = Entity { id: Uuid::new_v4(), canonical_name: "planner.rs".into(), aliases: vec![] };
        repo.upsert_entity(&a).await.unwrap();
        repo.upsert_entity(&b).await.unwrap();

        repo.record_cooccurrence(a.id, b.id).await.unwrap();
        repo.record_cooccurrence(b.id, a.id).await.unwrap();

        let row = sqlx::query("SELECT weight FROM cooccurrence_edges")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        let weight: i64 = row.get("weight");
        assert_eq!(weight, 2);
    }
}
