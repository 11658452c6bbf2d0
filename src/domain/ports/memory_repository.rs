//! Memory persistence port (spec §3, §4.4).
//!
//! Working memory is intentionally absent from this trait: it never
//! leaves process memory, so `services::memory::working` manages it
//! in-process without going through a repository.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Entity, EpisodicAttempt, Learning, ModelObservation, RagPassage};

#[async_trait]
pub trait MemoryRepository: Send + Sync {
    async fn store_episodic(&self, attempt: &EpisodicAttempt) -> DomainResult<()>;

    /// Candidates for similarity scoring, most recent first, capped at
    /// `limit`. Callers apply `cosine_similarity` against
    /// `question_embedding` themselves; the repository does not rank.
    async fn recent_episodic(&self, limit: usize) -> DomainResult<Vec<EpisodicAttempt>>;

    async fn store_passage(&self, passage: &RagPassage) -> DomainResult<()>;

    /// Hybrid vector + BM25 passage lookup (spec §4.4 semantic tier).
    async fn search_passages(&self, query: &str, query_embedding: &[f32], limit: usize) -> DomainResult<Vec<RagPassage>>;

    async fn upsert_entity(&self, entity: &Entity) -> DomainResult<()>;

    async fn get_entity(&self, id: Uuid) -> DomainResult<Option<Entity>>;

    async fn record_cooccurrence(&self, a: Uuid, b: Uuid) -> DomainResult<()>;

    async fn store_learning(&self, learning: &Learning) -> DomainResult<()>;

    async fn learnings_for_source(&self, source: &str) -> DomainResult<Vec<Learning>>;

    async fn record_observation(&self, observation: &ModelObservation) -> DomainResult<()>;

    /// Aggregate success rate and mean latency for a `(model, category)`
    /// pair, feeding the `ModelRouter`'s Performance Tracker (spec §4.3).
    /// Returns `None` if fewer than `min_samples` observations exist.
    async fn performance_summary(
        &self,
        model: &str,
        category: &str,
        min_samples: u32,
    ) -> DomainResult<Option<PerformanceSummary>>;
}

#[derive(Debug, Clone, Copy)]
pub struct PerformanceSummary {
    pub sample_count: u32,
    pub success_rate: f64,
    pub mean_latency_ms: f64,
}
