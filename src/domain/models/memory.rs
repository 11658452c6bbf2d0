//! Memory / Simulacrum domain models (spec §3, §4.4).
//!
//! Five partitions share this module: working (bounded, per-turn),
//! episodic (durable attempt cache), semantic (RAG passages + entities),
//! procedural (heuristics), and long-term (effectiveness stats). This
//! file models the data; `services::memory` implements the read/write
//! behavior over a [`crate::domain::ports::MemoryRepository`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bounded, per-turn scratch entry. Evicted at turn end by the caller;
/// the kernel never persists working memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingEntry {
    pub key: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A durable cache entry of a past pattern attempt (spec §3 Episodic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicAttempt {
    pub id: Uuid,
    pub question: String,
    /// Cheap fixed-width embedding of `question`, used for cosine
    /// similarity lookups without a network round-trip.
    pub question_embedding: Vec<f32>,
    pub pattern_used: String,
    pub result_summary: String,
    pub success: bool,
    pub confidence: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl EpisodicAttempt {
    /// Idempotency key: `(hash(content), source)` per spec §4.4 — here
    /// realized as `(hash(question), pattern_used)` since episodic
    /// attempts are keyed by question rather than arbitrary content.
    pub fn idempotency_key(question: &str, pattern_used: &str) -> String {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        question.trim().hash(&mut hasher);
        format!("{:016x}:{}", hasher.finish(), pattern_used)
    }
}

/// A RAG passage retrieved from the semantic store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagPassage {
    pub id: Uuid,
    pub content: String,
    pub source: String,
    /// Cheap fixed-width embedding of `content`, compared against a
    /// query embedding via [`cosine_similarity`] for the vector half of
    /// hybrid retrieval (spec §4.4).
    pub embedding: Vec<f32>,
    pub score: f64,
}

/// A canonical entity (file path, technology name, symbol name, ...)
/// extracted from artifacts/documents, with known aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub canonical_name: String,
    pub aliases: Vec<String>,
}

/// A weighted co-occurrence edge between two entities, used for the BFS
/// expansion described in spec §4.4.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CooccurrenceEdge {
    pub a: Uuid,
    pub b: Uuid,
    pub weight: u32,
}

/// A learned, long-term fact or heuristic (spec §3 Long-term / §4.4
/// `store_learning`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: Uuid,
    pub content: String,
    pub source: String,
    pub confidence: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Learning {
    /// Idempotency key: `(hash(content), source)` (spec §4.4).
    pub fn idempotency_key(content: &str, source: &str) -> String {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        content.trim().hash(&mut hasher);
        format!("{:016x}:{}", hasher.finish(), source)
    }
}

/// Per-model, per-category performance observation feeding the
/// `ModelRouter`'s Performance Tracker (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelObservation {
    pub model: String,
    pub category: String,
    pub success: bool,
    pub latency_ms: u64,
    pub user_edited: bool,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// The read-side context assembled by `Memory::build_context` for the
/// planner (spec §4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryContext {
    pub existing_goals: Vec<crate::domain::models::goal::Goal>,
    pub completed_artifacts: std::collections::HashSet<Uuid>,
    pub in_progress: Option<String>,
    pub rag_passages: Vec<RagPassage>,
    /// Present iff an episodic hit scored `>= 0.9` similarity (spec §4.4,
    /// §9 Open Question on whether the threshold should vary per pattern
    /// — resolved here as the single crate-wide constant documented in
    /// SPEC_FULL.md).
    pub episodic_hit: Option<(EpisodicAttempt, f64)>,
}

/// Episodic similarity threshold above which a past attempt short-circuits
/// pattern execution (spec §4.4, §8 scenario 5).
pub const EPISODIC_SIMILARITY_THRESHOLD: f64 = 0.9;

/// Cosine similarity between two equal-length embeddings. Returns `0.0`
/// for mismatched lengths or zero vectors rather than panicking, since
/// embeddings may come from different model versions during a migration.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}
