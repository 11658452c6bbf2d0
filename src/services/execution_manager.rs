//! ExecutionManager (spec §4.8): the single entry point that turns a
//! goal into artifacts. Wires together every other service — Backlog,
//! Planner, Memory, the pattern dispatcher, and ToolExecutor — the same
//! way a `Semaphore`-bounded worker pool wires its workers under a
//! `finally`-equivalent cleanup path; generalized here from a long-lived
//! worker pool to one `run_goal` call per goal, and from agent workers
//! to DAG waves of artifacts.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Artifact, ArtifactDag, DomainType, EventPayload, Goal, GoalResult, Lens, PatternKind,
};
use crate::services::backlog::{Backlog, ClaimOutcome};
use crate::services::event_bus::EventBus;
use crate::services::memory::Memory;
use crate::services::mirror::Mirror;
use crate::services::model_gateway::ModelGateway;
use crate::services::patterns::{run_pattern, PatternContext};
use crate::services::planner::{PlanOutcome, Planner, PlannerConfig};
use crate::services::tool_executor::ToolExecutor;

/// Bound on the resonance loop: failed validators trigger a retry with
/// critic feedback injected, up to this many times per artifact (spec
/// §4.8 step 6).
const DEFAULT_RETRY_LIMIT: u32 = 3;

/// How many artifacts may execute concurrently within one wave (spec §5
/// "bounded by a configurable parallelism cap").
const DEFAULT_PARALLELISM_CAP: usize = 4;

/// How many RAG passages `Memory::build_context` retrieves for the
/// planner (spec §4.4/§4.6).
const DEFAULT_CONTEXT_TOP_K: usize = 5;

pub struct ExecutionManagerConfig {
    pub retry_limit: u32,
    pub parallelism_cap: usize,
    pub context_top_k: usize,
}

impl Default for ExecutionManagerConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            parallelism_cap: DEFAULT_PARALLELISM_CAP,
            context_top_k: DEFAULT_CONTEXT_TOP_K,
        }
    }
}

/// Outcome of `ExecutionManager::run_goal` (spec §4.8).
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub goal_id: String,
    pub success: bool,
    pub partial: bool,
    pub result: GoalResult,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn already_claimed(goal_id: impl Into<String>) -> Self {
        Self {
            goal_id: goal_id.into(),
            success: false,
            partial: false,
            result: GoalResult::default(),
            error: Some("already being executed".to_string()),
        }
    }
}

pub struct ExecutionManager {
    backlog: Arc<Backlog>,
    memory: Arc<Memory>,
    gateway: Arc<ModelGateway>,
    tool_executor: Arc<ToolExecutor>,
    event_bus: Arc<EventBus>,
    config: ExecutionManagerConfig,
    mirror: Option<Arc<Mirror>>,
}

impl ExecutionManager {
    pub fn new(
        backlog: Arc<Backlog>,
        memory: Arc<Memory>,
        gateway: Arc<ModelGateway>,
        tool_executor: Arc<ToolExecutor>,
        event_bus: Arc<EventBus>,
        config: ExecutionManagerConfig,
    ) -> Self {
        Self { backlog, memory, gateway, tool_executor, event_bus, config, mirror: None }
    }

    /// Enable self-introspection (spec §6 `--mirror`, §4.9): after a goal
    /// produces at least one file artifact, `run_claimed` asks `mirror`
    /// to analyse and propose improvements to that artifact against the
    /// active Lens's heuristics. Proposals are surfaced as events only —
    /// `Mirror::apply` still requires the explicit human confirmation
    /// step spec §4.9 mandates, which `run_goal` never supplies itself.
    pub fn with_mirror(mut self, mirror: Arc<Mirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Single-entry contract (spec §4.8): decompose, execute every wave,
    /// classify, and always release the claim on the way out — success,
    /// failure, or an early return.
    #[tracing::instrument(skip(self, lens), fields(goal_id = %goal.id), err)]
    pub async fn run_goal(&self, goal: Goal, lens: Option<&Lens>) -> DomainResult<ExecutionResult> {
        // Step 1: _ensure_goal. `goal.id` is already the stable hash of
        // its description (spec §4.8); `add_goal` is idempotent.
        self.backlog.add_goal(&goal).await?;
        self.event_bus.publish(Some(&goal.id), EventPayload::GoalAdded { goal_id: goal.id.clone() }).await;

        // Step 2: claim.
        match self.backlog.claim_goal(&goal.id, None).await? {
            ClaimOutcome::AlreadyClaimed => {
                return Ok(ExecutionResult::already_claimed(goal.id.clone()));
            }
            ClaimOutcome::Claimed => {
                self.event_bus
                    .publish(Some(&goal.id), EventPayload::GoalClaimed { goal_id: goal.id.clone(), claimed_by: -1 })
                    .await;
            }
        }

        // The `finally`-equivalent: every exit path below runs through
        // `finish`, which always unclaims before returning.
        let outcome = self.run_claimed(&goal, lens).await;
        self.backlog.unclaim_goal(&goal.id).await?;
        self.event_bus.publish(Some(&goal.id), EventPayload::GoalUnclaimed { goal_id: goal.id.clone() }).await;
        outcome
    }

    /// `--plan` dry run (spec §6): compute the artifact DAG without
    /// claiming the goal, writing any file, or invoking a tool. A
    /// near-duplicate match (spec §4.6) surfaces as an empty DAG, since
    /// there is nothing new to plan.
    pub async fn plan_only(&self, goal: &Goal, lens: Option<&Lens>) -> DomainResult<ArtifactDag> {
        match self.build_plan(goal, lens).await? {
            PlanOutcome::Dag { dag, .. } => Ok(dag),
            PlanOutcome::ReuseGoal(_) => Ok(ArtifactDag::new()),
        }
    }

    async fn build_plan(&self, goal: &Goal, lens: Option<&Lens>) -> DomainResult<PlanOutcome> {
        let existing_goals = self.backlog.get_pending_goals(Default::default()).await?;
        let completed_artifacts: HashSet<Uuid> = HashSet::new();
        let embedding = embed_text(&goal.description);
        let context = self
            .memory
            .build_context(&goal.description, &embedding, existing_goals, completed_artifacts, None, self.config.context_top_k)
            .await?;

        let planner = Planner::new(&self.gateway, PlannerConfig::default());
        planner.plan(goal, &context, lens).await
    }

    async fn run_claimed(&self, goal: &Goal, lens: Option<&Lens>) -> DomainResult<ExecutionResult> {
        self.event_bus.publish(Some(&goal.id), EventPayload::GoalStarted { goal_id: goal.id.clone() }).await;

        // Steps 3/4: build context via Memory, then plan.
        let plan = self.build_plan(goal, lens).await?;

        let (dag, reused_artifacts) = match plan {
            PlanOutcome::Dag { dag, reused_artifacts } => (dag, reused_artifacts),
            PlanOutcome::ReuseGoal(existing) => {
                let mut result = GoalResult::new(format!("reused existing goal {}", existing.id));
                result.artifacts_created.push(existing.id.clone());
                return self.classify_and_complete(&goal.id, result).await;
            }
        };

        let lens = lens.cloned().unwrap_or_default();
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism_cap.max(1)));
        let mut result = GoalResult::new(format!("executed goal {}", goal.id));

        // Step 5/6: execute wave by wave; tasks within a wave run
        // concurrently bounded by `parallelism_cap` (spec §4.8, §5).
        for wave in dag.execution_waves() {
            let tasks = wave.into_iter().filter_map(|id| dag.get(&id).cloned()).map(|artifact| {
                let semaphore = semaphore.clone();
                let reused = reused_artifacts.contains(&artifact.id);
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore is never closed");
                    if reused {
                        return (artifact.clone(), Ok(artifact.description.clone()));
                    }
                    let outcome = self.run_artifact(goal, &artifact, &lens).await;
                    (artifact, outcome)
                }
            });

            for (artifact, outcome) in join_all(tasks).await {
                match outcome {
                    Ok(label) => result.artifacts_created.push(label),
                    Err(reason) => {
                        result.artifacts_failed.push(artifact.description.clone());
                        self.event_bus
                            .publish(Some(&goal.id), EventPayload::ArtifactFailed { artifact_id: artifact.id, reason })
                            .await;
                    }
                }
            }
        }

        self.maybe_introspect(&dag, &result, &lens).await;
        self.classify_and_complete(&goal.id, result).await
    }

    /// Spec §4.9 introspection step, run only when `--mirror` wired a
    /// [`Mirror`] in via [`Self::with_mirror`]. Picks the first created
    /// artifact with a `produces_file` path and runs `analyse -> propose`
    /// against it, graded against the active Lens's heuristics; failures
    /// are logged and swallowed, matching identity extraction's
    /// non-fatal posture — Mirror is an enrichment on top of `run_goal`,
    /// never a precondition for it.
    async fn maybe_introspect(&self, dag: &ArtifactDag, result: &GoalResult, lens: &Lens) {
        let Some(mirror) = &self.mirror else { return };
        let Some(target) = dag
            .artifacts()
            .find_map(|a| a.produces_file.as_ref().filter(|f| result.artifacts_created.iter().any(|c| c == *f)))
            .map(PathBuf::from)
        else {
            return;
        };

        let analysis = match mirror.analyse(&self.tool_executor, &target, Some(lens)).await {
            Ok(analysis) => analysis,
            Err(err) => {
                tracing::warn!(error = %err, target = %target.display(), "mirror analysis failed, continuing without it");
                return;
            }
        };

        if let Err(err) = mirror.propose(&target, &analysis).await {
            tracing::warn!(error = %err, target = %target.display(), "mirror proposal failed, continuing without it");
        }
    }

    /// Steps 6 for one artifact: run its assigned Compound Pattern, then
    /// validators, retrying with critic feedback injected on validator
    /// failure (resonance loop, bounded by `retry_limit`, spec §4.8).
    async fn run_artifact(&self, goal: &Goal, artifact: &Artifact, lens: &Lens) -> Result<String, String> {
        self.event_bus.publish(Some(&goal.id), EventPayload::ArtifactStarted { artifact_id: artifact.id }).await;
        self.event_bus
            .publish(Some(&goal.id), EventPayload::ArtifactPlanned { goal_id: goal.id.clone(), artifact_id: artifact.id })
            .await;

        let kind = pattern_for(artifact);
        let mut question = format!("Goal: {}\n\nArtifact: {}", goal.description, artifact.description);
        let mut last_error = String::new();

        for attempt in 0..=self.config.retry_limit {
            let embedding = embed_text(&question);
            let ctx = PatternContext {
                gateway: &self.gateway,
                lens,
                memory: Some(&self.memory),
                event_bus: Some(&self.event_bus),
                goal_id: Some(&goal.id),
                question_embedding: embedding,
            };

            self.event_bus
                .publish(Some(&goal.id), EventPayload::PatternInvoked { pattern: kind.as_str().to_string(), goal_id: goal.id.clone() })
                .await;

            let pattern_result = match run_pattern(kind, &question, &ctx).await {
                Ok(r) => r,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            self.event_bus
                .publish(
                    Some(&goal.id),
                    EventPayload::PatternCompleted {
                        pattern: kind.as_str().to_string(),
                        confidence: pattern_result.confidence,
                        escalate: pattern_result.escalate,
                    },
                )
                .await;

            match self.validate_artifact(goal, artifact, lens, &pattern_result.answer).await {
                Ok(()) => {
                    self.event_bus.publish(Some(&goal.id), EventPayload::ArtifactCompleted { artifact_id: artifact.id }).await;
                    return Ok(artifact.produces_file.clone().unwrap_or_else(|| artifact.description.clone()));
                }
                Err(reason) => {
                    last_error = reason.clone();
                    question = format!(
                        "{question}\n\nA previous attempt was rejected by a validator: {reason}. Address this feedback."
                    );
                    if attempt < self.config.retry_limit {
                        continue;
                    }
                }
            }
        }

        Err(if last_error.is_empty() { "validators rejected every attempt".to_string() } else { last_error })
    }

    /// Write the artifact's produced file (if any) and run every
    /// deterministic validator the Lens declares, reporting the first
    /// failure as a gate-fail (spec §4.7/§4.8).
    async fn validate_artifact(&self, goal: &Goal, artifact: &Artifact, lens: &Lens, content: &str) -> Result<(), String> {
        if let Some(path) = &artifact.produces_file {
            let result = self
                .tool_executor
                .write_file(std::path::Path::new(path), content)
                .await
                .map_err(|e| e.to_string())?;
            if !result.ok() {
                return Err(result.stderr);
            }
        }

        for validator in &lens.deterministic_validators {
            let mut parts = validator.command.split_whitespace();
            let Some(program) = parts.next() else { continue };
            let args: Vec<String> = parts.map(str::to_string).collect();
            let outcome = self.tool_executor.run_command(program, &args, None).await;
            match outcome {
                Ok(result) if result.ok() => {}
                Ok(result) => {
                    self.event_bus
                        .publish(
                            Some(&goal.id),
                            EventPayload::GateFail { validator: validator.name.clone(), goal_id: goal.id.clone(), reason: result.stderr.clone() },
                        )
                        .await;
                    return Err(format!("{} failed: {}", validator.name, result.stderr));
                }
                Err(DomainError::SandboxViolation(_)) => {
                    // Deterministic validators need Shell trust; a lower
                    // trust ceiling means they're simply skipped rather
                    // than failing every artifact (spec §4.7 sandboxing
                    // is a ceiling on capability, not a validation rule).
                }
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    }

    /// Step 7: classify by the partial-success rule (spec §3, §8), then
    /// commit the terminal event through `Backlog`.
    async fn classify_and_complete(&self, goal_id: &str, result: GoalResult) -> DomainResult<ExecutionResult> {
        let success = result.success();
        let partial = result.partial();

        if !result.artifacts_created.is_empty() {
            self.backlog.complete_goal(goal_id, result.clone()).await?;
            self.event_bus
                .publish(Some(goal_id), EventPayload::GoalCompleted { goal_id: goal_id.to_string(), success, partial })
                .await;
        } else {
            let reason = result.failure_reason.clone().unwrap_or_else(|| "no artifacts were produced".to_string());
            self.backlog.mark_failed(goal_id, reason.clone()).await?;
            self.event_bus
                .publish(Some(goal_id), EventPayload::GoalFailed { goal_id: goal_id.to_string(), reason })
                .await;
        }

        Ok(ExecutionResult { goal_id: goal_id.to_string(), success, partial, result, error: None })
    }
}

/// Deterministic pattern assignment per artifact (spec §4.8 "run its
/// assigned Compound Pattern" leaves the assignment rule itself open;
/// resolved here by `domain_type` — see SPEC_FULL.md).
const fn pattern_for(artifact: &Artifact) -> PatternKind {
    match artifact.domain_type {
        DomainType::Edit => PatternKind::IterativeRefinement,
        DomainType::Report => PatternKind::VotingEnsemble,
        DomainType::File | DomainType::Other(_) => PatternKind::GroundedDebate,
    }
}

/// Lightweight bag-of-words embedding used where the kernel needs a
/// vector for cosine similarity (episodic lookup, RAG retrieval) but no
/// real embedding model is configured. Deterministic and cheap, not
/// semantically meaningful beyond exact/near-duplicate phrasing — a real
/// adapter (e.g. a local sentence-transformer or a provider's embedding
/// endpoint) plugs in at the same call site without changing this
/// function's callers.
fn embed_text(text: &str) -> Vec<f32> {
    const DIMS: usize = 32;
    let mut vector = vec![0.0f32; DIMS];
    for word in text.to_lowercase().split_whitespace() {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        use std::hash::{Hash, Hasher};
        word.hash(&mut hasher);
        let bucket = (hasher.finish() as usize) % DIMS;
        vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Entity, EpisodicAttempt, Learning, ModelObservation, RagPassage};
    use crate::domain::ports::{
        BacklogRepository, GoalFilter, MemoryRepository, ModelProvider, ModelProviderError, ModelRequest,
        ModelResponse, PerformanceSummary, SubstrateHealth,
    };
    use crate::services::model_gateway::{ModelGatewayConfig, ProviderRegistry};
    use crate::services::model_router::{ModelRouter, ModelRouterConfig};
    use crate::services::tool_executor::ToolExecutorConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryBacklog {
        goals: Mutex<HashMap<String, Goal>>,
        completed: Mutex<Vec<crate::domain::models::CompletionEntry>>,
    }

    #[async_trait]
    impl BacklogRepository for InMemoryBacklog {
        async fn add_goal(&self, goal: &Goal) -> DomainResult<()> {
            self.goals.lock().unwrap().entry(goal.id.clone()).or_insert_with(|| goal.clone());
            Ok(())
        }
        async fn get_goal(&self, id: &str) -> DomainResult<Option<Goal>> {
            Ok(self.goals.lock().unwrap().get(id).cloned())
        }
        async fn claim_goal(&self, id: &str, claimed_by: i64) -> DomainResult<bool> {
            let mut goals = self.goals.lock().unwrap();
            match goals.get_mut(id) {
                Some(g) if g.claimed_by.is_none() => {
                    g.claimed_by = Some(claimed_by);
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => Ok(false),
            }
        }
        async fn unclaim_goal(&self, id: &str) -> DomainResult<()> {
            if let Some(g) = self.goals.lock().unwrap().get_mut(id) {
                g.claimed_by = None;
            }
            Ok(())
        }
        async fn complete_goal(&self, entry: &crate::domain::models::CompletionEntry) -> DomainResult<()> {
            self.completed.lock().unwrap().push(entry.clone());
            Ok(())
        }
        async fn list_pending(&self, _filter: GoalFilter) -> DomainResult<Vec<Goal>> {
            Ok(self.goals.lock().unwrap().values().cloned().collect())
        }
        async fn list_completed(&self) -> DomainResult<Vec<crate::domain::models::CompletionEntry>> {
            Ok(self.completed.lock().unwrap().clone())
        }
        async fn reclaim_stale(&self, _secs: u64) -> DomainResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct InMemoryMemoryRepo;

    #[async_trait]
    impl MemoryRepository for InMemoryMemoryRepo {
        async fn store_episodic(&self, _attempt: &EpisodicAttempt) -> DomainResult<()> {
            Ok(())
        }
        async fn recent_episodic(&self, _limit: usize) -> DomainResult<Vec<EpisodicAttempt>> {
            Ok(Vec::new())
        }
        async fn store_passage(&self, _passage: &RagPassage) -> DomainResult<()> {
            Ok(())
        }
        async fn search_passages(&self, _query: &str, _embedding: &[f32], _limit: usize) -> DomainResult<Vec<RagPassage>> {
            Ok(Vec::new())
        }
        async fn upsert_entity(&self, _entity: &Entity) -> DomainResult<()> {
            Ok(())
        }
        async fn get_entity(&self, _id: Uuid) -> DomainResult<Option<Entity>> {
            Ok(None)
        }
        async fn record_cooccurrence(&self, _a: Uuid, _b: Uuid) -> DomainResult<()> {
            Ok(())
        }
        async fn store_learning(&self, _learning: &Learning) -> DomainResult<()> {
            Ok(())
        }
        async fn learnings_for_source(&self, _source: &str) -> DomainResult<Vec<Learning>> {
            Ok(Vec::new())
        }
        async fn record_observation(&self, _observation: &ModelObservation) -> DomainResult<()> {
            Ok(())
        }
        async fn performance_summary(&self, _model: &str, _category: &str, _min: u32) -> DomainResult<Option<PerformanceSummary>> {
            Ok(None)
        }
    }

    struct EchoProvider;

    #[async_trait]
    impl ModelProvider for EchoProvider {
        fn provider_id(&self) -> &str {
            "mock"
        }
        async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelProviderError> {
            Ok(ModelResponse { content: format!("answer: {}", request.prompt.len()), usage: None, metadata: HashMap::new() })
        }
        async fn health_check(&self) -> Result<SubstrateHealth, ModelProviderError> {
            Ok(SubstrateHealth::Healthy)
        }
    }

    fn make_manager(tmp: &std::path::Path) -> ExecutionManager {
        let backlog = Arc::new(Backlog::new(Arc::new(InMemoryBacklog::default())));
        let memory = Arc::new(Memory::new(Arc::new(InMemoryMemoryRepo), 0.85));
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoProvider), &["mock"], 6000);
        let mut router_config = ModelRouterConfig::default();
        router_config.session_default = "mock-default".to_string();
        let router = ModelRouter::new(router_config, None);
        let gateway = Arc::new(ModelGateway::new(router, registry, None, ModelGatewayConfig::default()));
        let tool_executor = Arc::new(ToolExecutor::new(ToolExecutorConfig {
            trust_level: TrustLevel::Workspace,
            allowed_paths: vec![tmp.to_path_buf()],
            timeout: std::time::Duration::from_secs(5),
            max_output_bytes: 4096,
        }));
        let event_bus = Arc::new(EventBus::default());
        ExecutionManager::new(backlog, memory, gateway, tool_executor, event_bus, ExecutionManagerConfig::default())
    }

    use crate::domain::models::TrustLevel;

    #[tokio::test]
    async fn duplicate_claim_is_rejected_without_double_execution() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = make_manager(tmp.path());
        let goal = Goal::new("write a short report about rust ownership");

        // Claim it out from under the manager to simulate a concurrent run.
        manager.backlog.add_goal(&goal).await.unwrap();
        manager.backlog.claim_goal(&goal.id, None).await.unwrap();

        let result = manager.run_goal(goal.clone(), None).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("already being executed"));
    }

    #[test]
    fn pattern_for_edit_is_iterative_refinement() {
        let artifact = Artifact::new("edit foo.rs", DomainType::Edit);
        assert!(matches!(pattern_for(&artifact), PatternKind::IterativeRefinement));
    }

    #[test]
    fn embed_text_is_deterministic_and_unit_length() {
        let a = embed_text("hello world");
        let b = embed_text("hello world");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }
}
