//! Backlog persistence port (spec §3, §4.2, §6).
//!
//! Two adapters implement this trait: a `sqlx`-backed one for normal
//! operation and a file-backed one that realizes the on-disk
//! `.backlog/state.json` + `completed.jsonl` contract spec §6 describes
//! directly, for tooling that wants to inspect backlog state without a
//! database.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CompletionEntry, Goal};

/// Filter criteria for listing goals.
#[derive(Debug, Clone, Default)]
pub struct GoalFilter {
    pub category: Option<String>,
    pub claimed_only: bool,
    pub unclaimed_only: bool,
}

/// Repository interface for Goal + CompletionEntry persistence.
#[async_trait]
pub trait BacklogRepository: Send + Sync {
    /// Insert a goal, or return the existing one if its hash id already
    /// exists (spec §4.8 `_ensure_goal` idempotency).
    async fn add_goal(&self, goal: &Goal) -> DomainResult<()>;

    async fn get_goal(&self, id: &str) -> DomainResult<Option<Goal>>;

    /// Atomically claim an unclaimed goal. Returns `Ok(false)` rather
    /// than erroring when another worker already holds the claim, so
    /// callers can treat a race as a normal outcome (spec §8 "duplicate
    /// claim blocked").
    async fn claim_goal(&self, id: &str, claimed_by: i64) -> DomainResult<bool>;

    async fn unclaim_goal(&self, id: &str) -> DomainResult<()>;

    async fn complete_goal(&self, entry: &CompletionEntry) -> DomainResult<()>;

    async fn list_pending(&self, filter: GoalFilter) -> DomainResult<Vec<Goal>>;

    async fn list_completed(&self) -> DomainResult<Vec<CompletionEntry>>;

    /// Release claims that have been held past `claim_timeout_seconds`
    /// (spec §9 Open Question, resolved in `BacklogConfig`). Returns the
    /// ids reclaimed.
    async fn reclaim_stale(&self, claim_timeout_seconds: u64) -> DomainResult<Vec<String>>;
}
