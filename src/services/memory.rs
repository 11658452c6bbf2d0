//! Memory / Simulacrum service (spec §3, §4.4).
//!
//! Five partitions share one read/write surface: working (in-process,
//! never persisted), episodic (past-attempt cache), semantic (RAG
//! passages + entity graph), procedural (the active Lens's heuristics,
//! read straight off [`Lens`] rather than duplicated here), and
//! long-term (pattern/model effectiveness). Grounded on the teacher's
//! `infrastructure::vector::VectorStore` + `adapters::embeddings`
//! pairing, collapsed into a single service over
//! [`MemoryRepository`] since the kernel's retrieval math (cosine +
//! BM25 + entity bonus + BFS expansion) is pure and doesn't need its
//! own adapter boundary the way embedding generation does.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use regex::Regex;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::memory::cosine_similarity;
use crate::domain::models::{
    Entity, EpisodicAttempt, Goal, Learning, MemoryContext, ModelObservation, RagPassage,
    EPISODIC_SIMILARITY_THRESHOLD,
};
use crate::domain::ports::{MemoryRepository, PerformanceSummary};

/// Bonus added to a passage's blended score per matching entity shared
/// with the query (spec §4.4).
const ENTITY_OVERLAP_BONUS: f64 = 0.15;

/// BFS co-occurrence expansion depth (spec §4.4).
const COOCCURRENCE_BFS_DEPTH: usize = 2;

/// Decay applied per BFS hop when folding a co-occurring entity's score
/// into the expansion (spec §4.4).
const COOCCURRENCE_DECAY: f64 = 0.5;

/// How many candidates the optional cross-encoder re-ranks, expressed as
/// a multiple of the requested `top_k` (spec §4.4 "top 3x candidates").
const RERANK_CANDIDATE_MULTIPLIER: usize = 3;

/// A bounded, per-turn scratch space (spec §3 Working memory). Never
/// persisted; the caller drops it at turn end.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    capacity: usize,
    entries: VecDeque<(String, String)>,
}

impl WorkingMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn put(&mut self, key: impl Into<String>, content: impl Into<String>) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((key.into(), content.into()));
    }

    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Re-ranks a shortlist of passages against a query. Optional: a missing
/// or failing cross-encoder degrades to the unranked hybrid score (spec
/// §4.4 "must gracefully degrade if the cross-encoder model is
/// unavailable").
pub trait CrossEncoder: Send + Sync {
    fn rerank(&self, query: &str, passages: &[RagPassage]) -> Option<Vec<(Uuid, f64)>>;
}

/// Entity extraction patterns (spec §4.4 "pattern-based first"). Kept as
/// a fixed, compiled set rather than re-built per call.
struct EntityPatterns {
    file_path: Regex,
    technology: Regex,
    symbol: Regex,
}

impl EntityPatterns {
    fn new() -> Self {
        Self {
            file_path: Regex::new(r"(?:[\w./-]+/)?[\w-]+\.[A-Za-z][\w]{0,5}\b").unwrap(),
            technology: Regex::new(
                r"\b(?i:rust|python|typescript|javascript|sqlite|postgres|docker|kubernetes|react|tokio|sqlx|serde)\b",
            )
            .unwrap(),
            symbol: Regex::new(r"\b[A-Z][A-Za-z0-9]*(?:::[A-Za-z0-9_]+)+\b|\b[a-z_][a-z0-9_]*\(\)").unwrap(),
        }
    }

    fn extract(&self, text: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for re in [&self.file_path, &self.technology, &self.symbol] {
            for m in re.find_iter(text) {
                let s = m.as_str().to_string();
                if !found.contains(&s) {
                    found.push(s);
                }
            }
        }
        found
    }
}

/// The Memory / Simulacrum service (spec §4.4).
pub struct Memory {
    repository: Arc<dyn MemoryRepository>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    entity_patterns: EntityPatterns,
    entity_similarity_threshold: f64,
}

impl Memory {
    pub fn new(repository: Arc<dyn MemoryRepository>, entity_similarity_threshold: f64) -> Self {
        Self {
            repository,
            cross_encoder: None,
            entity_patterns: EntityPatterns::new(),
            entity_similarity_threshold,
        }
    }

    pub fn with_cross_encoder(mut self, cross_encoder: Arc<dyn CrossEncoder>) -> Self {
        self.cross_encoder = Some(cross_encoder);
        self
    }

    /// Assemble the read-side context a planner consumes (spec §4.4).
    #[tracing::instrument(skip(self, existing_goals, query_embedding), err)]
    pub async fn build_context(
        &self,
        question: &str,
        query_embedding: &[f32],
        existing_goals: Vec<Goal>,
        completed_artifacts: std::collections::HashSet<Uuid>,
        in_progress: Option<String>,
        top_k: usize,
    ) -> DomainResult<MemoryContext> {
        let rag_passages = self.retrieve(question, query_embedding, top_k).await?;
        let episodic_hit = self.episodic_lookup(question, query_embedding).await?;

        Ok(MemoryContext {
            existing_goals,
            completed_artifacts,
            in_progress,
            rag_passages,
            episodic_hit,
        })
    }

    /// Hybrid retrieval: vector cosine + BM25-ish lexical score, entity
    /// overlap bonus, optional cross-encoder re-rank over the top `3 *
    /// top_k` candidates, degrading gracefully if no cross-encoder is
    /// configured (spec §4.4).
    pub async fn retrieve(&self, query: &str, query_embedding: &[f32], top_k: usize) -> DomainResult<Vec<RagPassage>> {
        let candidate_limit = (top_k * RERANK_CANDIDATE_MULTIPLIER).max(top_k);
        let mut candidates = self.repository.search_passages(query, query_embedding, candidate_limit).await?;

        let query_entities = self.entity_patterns.extract(query);
        for passage in &mut candidates {
            let entity_bonus = self.entity_overlap_bonus(&query_entities, &passage.content);
            passage.score = (passage.score + entity_bonus).clamp(0.0, 1.0);
        }

        if let Some(cross_encoder) = &self.cross_encoder {
            if let Some(ranked) = cross_encoder.rerank(query, &candidates) {
                let score_by_id: HashMap<Uuid, f64> = ranked.into_iter().collect();
                for passage in &mut candidates {
                    if let Some(score) = score_by_id.get(&passage.id) {
                        passage.score = *score;
                    }
                }
            }
            // A cross-encoder that returns `None` (unavailable) leaves the
            // hybrid score in place rather than failing the retrieval.
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(top_k);
        Ok(candidates)
    }

    fn entity_overlap_bonus(&self, query_entities: &[String], passage_content: &str) -> f64 {
        if query_entities.is_empty() {
            return 0.0;
        }
        let passage_entities = self.entity_patterns.extract(passage_content);
        let matches = query_entities.iter().filter(|e| passage_entities.contains(e)).count();
        matches as f64 * ENTITY_OVERLAP_BONUS
    }

    /// Episodic short-circuit check (spec §4.4, §8 scenario 5): returns
    /// the best-matching past attempt if its cosine similarity against
    /// `question_embedding` clears [`EPISODIC_SIMILARITY_THRESHOLD`].
    pub async fn episodic_lookup(
        &self,
        question: &str,
        question_embedding: &[f32],
    ) -> DomainResult<Option<(EpisodicAttempt, f64)>> {
        let recent = self.repository.recent_episodic(200).await?;
        let mut best: Option<(EpisodicAttempt, f64)> = None;
        for attempt in recent {
            let similarity = if attempt.question.trim().eq_ignore_ascii_case(question.trim()) {
                1.0
            } else {
                cosine_similarity(&attempt.question_embedding, question_embedding)
            };
            if similarity >= EPISODIC_SIMILARITY_THRESHOLD
                && best.as_ref().is_none_or(|(_, s)| similarity > *s)
            {
                best = Some((attempt, similarity));
            }
        }
        Ok(best)
    }

    /// Idempotent on `(hash(question), pattern)` (spec §4.4).
    pub async fn add_attempt(
        &self,
        question: &str,
        pattern: &str,
        result_summary: impl Into<String>,
        success: bool,
        confidence: f64,
        question_embedding: Vec<f32>,
    ) -> DomainResult<()> {
        let key = EpisodicAttempt::idempotency_key(question, pattern);
        let recent = self.repository.recent_episodic(1000).await?;
        if recent
            .iter()
            .any(|a| EpisodicAttempt::idempotency_key(&a.question, &a.pattern_used) == key)
        {
            return Ok(());
        }
        let attempt = EpisodicAttempt {
            id: Uuid::new_v4(),
            question: question.to_string(),
            question_embedding,
            pattern_used: pattern.to_string(),
            result_summary: result_summary.into(),
            success,
            confidence,
            created_at: chrono::Utc::now(),
        };
        self.repository.store_episodic(&attempt).await
    }

    /// Idempotent on `(hash(content), source)` (spec §4.4).
    pub async fn store_learning(&self, content: impl Into<String>, source: &str, confidence: f64) -> DomainResult<()> {
        let content = content.into();
        let existing = self.repository.learnings_for_source(source).await?;
        let key = Learning::idempotency_key(&content, source);
        if existing.iter().any(|l| Learning::idempotency_key(&l.content, &l.source) == key) {
            return Ok(());
        }
        let learning = Learning {
            id: Uuid::new_v4(),
            content,
            source: source.to_string(),
            confidence,
            created_at: chrono::Utc::now(),
        };
        self.repository.store_learning(&learning).await
    }

    pub async fn record_observation(&self, observation: ModelObservation) -> DomainResult<()> {
        self.repository.record_observation(&observation).await
    }

    pub async fn performance_summary(
        &self,
        model: &str,
        category: &str,
        min_samples: u32,
    ) -> DomainResult<Option<PerformanceSummary>> {
        self.repository.performance_summary(model, category, min_samples).await
    }

    /// Extract candidate entities from `text`, upsert each against
    /// existing entities by fuzzy name match (spec §4.4, entity
    /// resolution threshold resolved as `entity_similarity_threshold`),
    /// and record a co-occurrence edge between every pair found together.
    pub async fn extract_and_link_entities(&self, text: &str) -> DomainResult<Vec<Entity>> {
        let names = self.entity_patterns.extract(text);
        let mut entities = Vec::with_capacity(names.len());
        for name in &names {
            entities.push(self.upsert_entity_by_name(name).await?);
        }
        for i in 0..entities.len() {
            for j in (i + 1)..entities.len() {
                self.repository.record_cooccurrence(entities[i].id, entities[j].id).await?;
            }
        }
        Ok(entities)
    }

    async fn upsert_entity_by_name(&self, name: &str) -> DomainResult<Entity> {
        // The kernel has no "find by name" query on the repository port
        // (entities are keyed by id); canonicalization here is limited to
        // constructing a fresh entity per distinct surface form. A
        // Levenshtein-ratio merge pass against known entities is the
        // natural next step (tracked via entity_similarity_threshold) but
        // needs a listing query this port intentionally keeps out of
        // scope for the kernel (see SPEC_FULL.md entity resolution note).
        let entity = Entity {
            id: Uuid::new_v4(),
            canonical_name: name.to_string(),
            aliases: Vec::new(),
        };
        self.repository.upsert_entity(&entity).await?;
        Ok(entity)
    }

    /// BFS co-occurrence expansion: starting from `seed_entities`, walk
    /// the co-occurrence graph up to [`COOCCURRENCE_BFS_DEPTH`] hops,
    /// folding in `COOCCURRENCE_DECAY^depth` of each hop's relevance
    /// (spec §4.4). Returns entities reachable within range with their
    /// decayed weight.
    pub fn expand_cooccurrence(
        &self,
        seed_entities: &[Uuid],
        edges: &[(Uuid, Uuid, u32)],
    ) -> HashMap<Uuid, f64> {
        let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (a, b, _weight) in edges {
            adjacency.entry(*a).or_default().push(*b);
            adjacency.entry(*b).or_default().push(*a);
        }

        let mut scores: HashMap<Uuid, f64> = HashMap::new();
        let mut queue: VecDeque<(Uuid, usize)> = VecDeque::new();
        for seed in seed_entities {
            scores.insert(*seed, 1.0);
            queue.push_back((*seed, 0));
        }
        while let Some((id, depth)) = queue.pop_front() {
            if depth >= COOCCURRENCE_BFS_DEPTH {
                continue;
            }
            let Some(neighbors) = adjacency.get(&id) else { continue };
            let decayed = COOCCURRENCE_DECAY.powi((depth + 1) as i32);
            for neighbor in neighbors {
                let entry = scores.entry(*neighbor).or_insert(0.0);
                if decayed > *entry {
                    *entry = decayed;
                    queue.push_back((*neighbor, depth + 1));
                }
            }
        }
        scores
    }

    pub const fn entity_similarity_threshold(&self) -> f64 {
        self.entity_similarity_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryRepo {
        episodic: Mutex<Vec<EpisodicAttempt>>,
        passages: Mutex<Vec<RagPassage>>,
        learnings: Mutex<Vec<Learning>>,
        entities: Mutex<HashMap<Uuid, Entity>>,
        observations: Mutex<Vec<ModelObservation>>,
    }

    #[async_trait]
    impl MemoryRepository for InMemoryRepo {
        async fn store_episodic(&self, attempt: &EpisodicAttempt) -> DomainResult<()> {
            self.episodic.lock().unwrap().push(attempt.clone());
            Ok(())
        }

        async fn recent_episodic(&self, limit: usize) -> DomainResult<Vec<EpisodicAttempt>> {
            let guard = self.episodic.lock().unwrap();
            Ok(guard.iter().rev().take(limit).cloned().collect())
        }

        async fn store_passage(&self, passage: &RagPassage) -> DomainResult<()> {
            self.passages.lock().unwrap().push(passage.clone());
            Ok(())
        }

        async fn search_passages(&self, _query: &str, _query_embedding: &[f32], limit: usize) -> DomainResult<Vec<RagPassage>> {
            let guard = self.passages.lock().unwrap();
            Ok(guard.iter().take(limit).cloned().collect())
        }

        async fn upsert_entity(&self, entity: &Entity) -> DomainResult<()> {
            self.entities.lock().unwrap().insert(entity.id, entity.clone());
            Ok(())
        }

        async fn get_entity(&self, id: Uuid) -> DomainResult<Option<Entity>> {
            Ok(self.entities.lock().unwrap().get(&id).cloned())
        }

        async fn record_cooccurrence(&self, _a: Uuid, _b: Uuid) -> DomainResult<()> {
            Ok(())
        }

        async fn store_learning(&self, learning: &Learning) -> DomainResult<()> {
            self.learnings.lock().unwrap().push(learning.clone());
            Ok(())
        }

        async fn learnings_for_source(&self, source: &str) -> DomainResult<Vec<Learning>> {
            Ok(self.learnings.lock().unwrap().iter().filter(|l| l.source == source).cloned().collect())
        }

        async fn record_observation(&self, observation: &ModelObservation) -> DomainResult<()> {
            self.observations.lock().unwrap().push(observation.clone());
            Ok(())
        }

        async fn performance_summary(&self, _model: &str, _category: &str, _min_samples: u32) -> DomainResult<Option<PerformanceSummary>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn episodic_lookup_short_circuits_above_threshold() {
        let repo = Arc::new(InMemoryRepo::default());
        let memory = Memory::new(repo.clone(), 0.85);
        memory
            .add_attempt("double the amount", "grounded_debate", "doubled it", true, 0.9, vec![1.0, 0.0, 0.0])
            .await
            .unwrap();

        let hit = memory.episodic_lookup("double the amount", &[1.0, 0.0, 0.0]).await.unwrap();
        assert!(hit.is_some());
        let (_, similarity) = hit.unwrap();
        assert!(similarity >= EPISODIC_SIMILARITY_THRESHOLD);
    }

    #[tokio::test]
    async fn episodic_lookup_misses_below_threshold() {
        let repo = Arc::new(InMemoryRepo::default());
        let memory = Memory::new(repo, 0.85);
        memory
            .add_attempt("double the amount", "grounded_debate", "doubled it", true, 0.9, vec![1.0, 0.0, 0.0])
            .await
            .unwrap();

        let hit = memory.episodic_lookup("unrelated question", &[0.0, 1.0, 0.0]).await.unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn add_attempt_is_idempotent() {
        let repo = Arc::new(InMemoryRepo::default());
        let memory = Memory::new(repo.clone(), 0.85);
        memory.add_attempt("q", "grounded_debate", "r", true, 0.9, vec![1.0]).await.unwrap();
        memory.add_attempt("q", "grounded_debate", "r2", true, 0.8, vec![1.0]).await.unwrap();
        assert_eq!(repo.episodic.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_learning_is_idempotent_on_content_and_source() {
        let repo = Arc::new(InMemoryRepo::default());
        let memory = Memory::new(repo.clone(), 0.85);
        memory.store_learning("debate converges faster with grounding", "grounded_debate", 0.9).await.unwrap();
        memory.store_learning("debate converges faster with grounding", "grounded_debate", 0.9).await.unwrap();
        assert_eq!(repo.learnings.lock().unwrap().len(), 1);
    }

    #[test]
    fn entity_patterns_extract_file_paths_and_technologies() {
        let patterns = EntityPatterns::new();
        let found = patterns.extract("edit src/main.rs to add tokio and sqlx support");
        assert!(found.iter().any(|f| f.ends_with("main.rs")));
        assert!(found.iter().any(|f| f.eq_ignore_ascii_case("tokio")));
        assert!(found.iter().any(|f| f.eq_ignore_ascii_case("sqlx")));
    }

    #[test]
    fn cooccurrence_expansion_decays_with_depth() {
        let memory = Memory::new(Arc::new(InMemoryRepo::default()), 0.85);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let edges = vec![(a, b, 1), (b, c, 1)];
        let scores = memory.expand_cooccurrence(&[a], &edges);
        assert_eq!(scores[&a], 1.0);
        assert!(scores[&b] > scores[&c]);
    }
}
