//! Backlog service (spec §3, §4.2): the durable goal ledger, wired
//! through the [`BacklogRepository`] port. Grounded on the teacher's
//! `services::goal_service::GoalService<R>` shape — a thin, generic
//! service over a repository trait object that adds domain behavior
//! (idempotent add, atomic claim, completion bookkeeping) the
//! repository itself stays agnostic of.

use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CompletionEntry, Goal, GoalResult, SINGLE_INSTANCE_WORKER};
use crate::domain::ports::{BacklogRepository, GoalFilter};

/// Outcome of a claim attempt (spec §8 "Atomic claim": for any two
/// concurrent `claim_goal` calls, exactly one returns true).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
}

/// The durable goal ledger (spec §4.2). Owns no state of its own beyond
/// a handle to its repository — all atomicity guarantees are the
/// repository's responsibility (a single mutex covering read-modify-
/// write of goal state, per spec §5).
pub struct Backlog {
    repository: Arc<dyn BacklogRepository>,
}

impl Backlog {
    pub fn new(repository: Arc<dyn BacklogRepository>) -> Self {
        Self { repository }
    }

    /// Idempotent by id (spec §4.2): inserting a goal whose hash id
    /// already exists is a no-op rather than an error.
    pub async fn add_goal(&self, goal: &Goal) -> DomainResult<()> {
        if self.repository.get_goal(&goal.id).await?.is_some() {
            return Ok(());
        }
        self.repository.add_goal(goal).await
    }

    pub async fn get_goal(&self, id: &str) -> DomainResult<Option<Goal>> {
        self.repository.get_goal(id).await
    }

    /// Atomic compare-and-set claim (spec §4.2). `worker_id = None`
    /// becomes the single-instance sentinel `-1`.
    pub async fn claim_goal(&self, goal_id: &str, worker_id: Option<i64>) -> DomainResult<ClaimOutcome> {
        let claimed_by = worker_id.unwrap_or(SINGLE_INSTANCE_WORKER);
        if self.repository.claim_goal(goal_id, claimed_by).await? {
            Ok(ClaimOutcome::Claimed)
        } else {
            Ok(ClaimOutcome::AlreadyClaimed)
        }
    }

    /// Always called on exit — success, failure, or exception (spec
    /// §4.2). Callers invoke this from a `finally`-equivalent path;
    /// see `ExecutionManager::run_goal`.
    pub async fn unclaim_goal(&self, goal_id: &str) -> DomainResult<()> {
        self.repository.unclaim_goal(goal_id).await
    }

    /// Writes final state and appends a [`CompletionEntry`] (spec §4.2).
    /// Called iff `artifacts_created != empty` (spec §8 partial success
    /// rule) — enforcement of that rule lives in `ExecutionManager`,
    /// not here, so this method stays a pure persistence operation.
    pub async fn complete_goal(&self, goal_id: &str, result: GoalResult) -> DomainResult<()> {
        let entry = CompletionEntry::new(goal_id, result);
        self.repository.complete_goal(&entry).await
    }

    /// Total-failure terminal (spec §4.2). Persists a zero-artifact
    /// `CompletionEntry` carrying `reason` as `failure_reason`, so a
    /// total failure still leaves a history record (spec §8 scenario 4
    /// expects `completed.jsonl` to reflect the outcome of every
    /// `run_goal` invocation, not just successes).
    pub async fn mark_failed(&self, goal_id: &str, reason: impl Into<String>) -> DomainResult<()> {
        let reason = reason.into();
        let mut result = GoalResult::new(reason.clone());
        result.failure_reason = Some(reason);
        self.complete_goal(goal_id, result).await
    }

    pub async fn get_pending_goals(&self, filter: GoalFilter) -> DomainResult<Vec<Goal>> {
        self.repository.list_pending(filter).await
    }

    pub async fn get_completed_artifacts(&self) -> DomainResult<Vec<CompletionEntry>> {
        self.repository.list_completed().await
    }

    /// Release claims held past `claim_timeout_seconds` (spec §4.2,
    /// §9 Open Question — policy fixed here as a bounded reclaim the
    /// caller triggers explicitly, e.g. on startup or on a timer; the
    /// kernel exposes only the primitive).
    pub async fn reclaim_stale(&self, claim_timeout_seconds: u64) -> DomainResult<Vec<String>> {
        if claim_timeout_seconds == 0 {
            return Ok(Vec::new());
        }
        self.repository.reclaim_stale(claim_timeout_seconds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::BacklogRepository;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryBacklog {
        goals: Mutex<HashMap<String, Goal>>,
        completed: Mutex<Vec<CompletionEntry>>,
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
                Some(goal) if goal.claimed_by.is_none() => {
                    goal.claimed_by = Some(claimed_by);
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => Ok(false),
            }
        }

        async fn unclaim_goal(&self, id: &str) -> DomainResult<()> {
            if let Some(goal) = self.goals.lock().unwrap().get_mut(id) {
                goal.claimed_by = None;
            }
            Ok(())
        }

        async fn complete_goal(&self, entry: &CompletionEntry) -> DomainResult<()> {
            self.completed.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn list_pending(&self, _filter: GoalFilter) -> DomainResult<Vec<Goal>> {
            Ok(self.goals.lock().unwrap().values().cloned().collect())
        }

        async fn list_completed(&self) -> DomainResult<Vec<CompletionEntry>> {
            Ok(self.completed.lock().unwrap().clone())
        }

        async fn reclaim_stale(&self, _claim_timeout_seconds: u64) -> DomainResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn second_concurrent_claim_is_rejected() {
        let repo = Arc::new(InMemoryBacklog::default());
        let backlog = Backlog::new(repo);
        let goal = Goal::new("write hello.py");
        backlog.add_goal(&goal).await.unwrap();

        let first = backlog.claim_goal(&goal.id, None).await.unwrap();
        let second = backlog.claim_goal(&goal.id, None).await.unwrap();
        assert_eq!(first, ClaimOutcome::Claimed);
        assert_eq!(second, ClaimOutcome::AlreadyClaimed);
    }

    #[tokio::test]
    async fn add_goal_is_idempotent_by_id() {
        let repo = Arc::new(InMemoryBacklog::default());
        let backlog = Backlog::new(repo.clone());
        let goal = Goal::new("write hello.py");
        backlog.add_goal(&goal).await.unwrap();
        backlog.add_goal(&goal).await.unwrap();
        assert_eq!(repo.goals.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unclaim_releases_the_claim() {
        let repo = Arc::new(InMemoryBacklog::default());
        let backlog = Backlog::new(repo);
        let goal = Goal::new("write hello.py");
        backlog.add_goal(&goal).await.unwrap();
        backlog.claim_goal(&goal.id, None).await.unwrap();
        backlog.unclaim_goal(&goal.id).await.unwrap();
        let reloaded = backlog.get_goal(&goal.id).await.unwrap().unwrap();
        assert!(reloaded.claimed_by.is_none());
    }

    #[tokio::test]
    async fn complete_goal_appends_history_entry() {
        let repo = Arc::new(InMemoryBacklog::default());
        let backlog = Backlog::new(repo);
        let goal = Goal::new("write hello.py");
        backlog.add_goal(&goal).await.unwrap();
        let mut result = GoalResult::new("done");
        result.artifacts_created.push("hello.py".into());
        backlog.complete_goal(&goal.id, result).await.unwrap();
        let history = backlog.get_completed_artifacts().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].goal_id, goal.id);
    }
}
