//! File-backed `BacklogRepository` (spec §4.2, §6): the on-disk
//! `<root>/.backlog/state.json` + `completed.jsonl` contract, for
//! tooling that wants to inspect or drive backlog state without a
//! database. Grounded on the teacher's `infrastructure::database`
//! atomic-write discipline, adapted from SQL rows to a single JSON
//! snapshot guarded by an in-process mutex plus an append-only log —
//! the flat-file analogue of the same "serialise read-modify-write,
//! append history atomically" rule spec §5 states for the `sqlx`
//! adapter.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CompletionEntry, Goal};
use crate::domain::ports::{BacklogRepository, GoalFilter};

const STATE_FILE: &str = "state.json";
const COMPLETED_FILE: &str = "completed.jsonl";

/// The full contents of `state.json`: every known goal, keyed by id.
#[derive(Debug, Default, Serialize, Deserialize)]
struct BacklogState {
    #[serde(default)]
    goals: HashMap<String, Goal>,
}

/// File-backed [`BacklogRepository`] realizing spec §6's on-disk
/// layout directly. Writes to `state.json` go through a write-to-temp,
/// then atomic rename so a crash mid-write never leaves a torn file;
/// `completed.jsonl` is append-only and flushed after every write.
///
/// A [`tokio::sync::Mutex`] serialises every read-modify-write against
/// `state.json` (spec §5 "Backlog writes are serialised by a single
/// mutex covering read-modify-write of goal state"); this only
/// coordinates within one process, so this adapter is not safe to
/// point two processes at the same `.backlog` directory concurrently —
/// the `sqlx` adapter is the one to reach for there.
pub struct FileBacklogRepository {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileBacklogRepository {
    /// `root` is the directory that will contain `state.json` and
    /// `completed.jsonl` directly (typically `<project>/.backlog`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), lock: Mutex::new(()) }
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    fn completed_path(&self) -> PathBuf {
        self.root.join(COMPLETED_FILE)
    }

    async fn ensure_root(&self) -> DomainResult<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(DomainError::from)
    }

    async fn read_state(&self) -> DomainResult<BacklogState> {
        let path = self.state_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(BacklogState::default()),
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| DomainError::DatabaseError(format!("corrupt {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BacklogState::default()),
            Err(e) => Err(DomainError::from(e)),
        }
    }

    /// Atomic write: serialize to `state.json.tmp`, flush, then rename
    /// over `state.json`. Rename is atomic on the same filesystem, so a
    /// reader never observes a partially-written file.
    async fn write_state(&self, state: &BacklogState) -> DomainResult<()> {
        self.ensure_root().await?;
        let path = self.state_path();
        let tmp_path = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(state)
            .map_err(|e| DomainError::DatabaseError(format!("failed to serialize backlog state: {e}")))?;
        tokio::fs::write(&tmp_path, contents).await.map_err(DomainError::from)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(DomainError::from)
    }

    /// Append one line to `completed.jsonl`, flushing before returning
    /// (spec §5 "history appends use atomic append").
    fn append_completed(root: &Path, entry: &CompletionEntry) -> DomainResult<()> {
        std::fs::create_dir_all(root).map_err(DomainError::from)?;
        let line = serde_json::to_string(entry)
            .map_err(|e| DomainError::DatabaseError(format!("failed to serialize completion entry: {e}")))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(root.join(COMPLETED_FILE))
            .map_err(DomainError::from)?;
        writeln!(file, "{line}").map_err(DomainError::from)?;
        file.flush().map_err(DomainError::from)
    }

    fn read_completed(root: &Path) -> DomainResult<Vec<CompletionEntry>> {
        let path = root.join(COMPLETED_FILE);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DomainError::from(e)),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| DomainError::DatabaseError(format!("corrupt completed.jsonl line: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl BacklogRepository for FileBacklogRepository {
    async fn add_goal(&self, goal: &Goal) -> DomainResult<()> {
        let _guard = self.lock.lock().await;
        let mut state = self.read_state().await?;
        state.goals.entry(goal.id.clone()).or_insert_with(|| goal.clone());
        self.write_state(&state).await
    }

    async fn get_goal(&self, id: &str) -> DomainResult<Option<Goal>> {
        let _guard = self.lock.lock().await;
        let state = self.read_state().await?;
        Ok(state.goals.get(id).cloned())
    }

    async fn claim_goal(&self, id: &str, claimed_by: i64) -> DomainResult<bool> {
        let _guard = self.lock.lock().await;
        let mut state = self.read_state().await?;
        let Some(goal) = state.goals.get_mut(id) else {
            return Ok(false);
        };
        if goal.claimed_by.is_some() {
            return Ok(false);
        }
        goal.claimed_by = Some(claimed_by);
        goal.claimed_at = Some(chrono::Utc::now());
        self.write_state(&state).await?;
        Ok(true)
    }

    async fn unclaim_goal(&self, id: &str) -> DomainResult<()> {
        let _guard = self.lock.lock().await;
        let mut state = self.read_state().await?;
        if let Some(goal) = state.goals.get_mut(id) {
            goal.claimed_by = None;
            goal.claimed_at = None;
            self.write_state(&state).await?;
        }
        Ok(())
    }

    async fn complete_goal(&self, entry: &CompletionEntry) -> DomainResult<()> {
        let _guard = self.lock.lock().await;
        let mut state = self.read_state().await?;
        if let Some(goal) = state.goals.get_mut(&entry.goal_id) {
            goal.claimed_by = None;
            goal.claimed_at = None;
        }
        self.write_state(&state).await?;
        let root = self.root.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || Self::append_completed(&root, &entry))
            .await
            .map_err(|e| DomainError::DatabaseError(format!("append_completed task panicked: {e}")))?
    }

    async fn list_pending(&self, filter: GoalFilter) -> DomainResult<Vec<Goal>> {
        let _guard = self.lock.lock().await;
        let state = self.read_state().await?;
        let mut goals: Vec<Goal> = state
            .goals
            .into_values()
            .filter(|goal| {
                if filter.claimed_only && !goal.is_claimed() {
                    return false;
                }
                if filter.unclaimed_only && goal.is_claimed() {
                    return false;
                }
                if let Some(category) = &filter.category {
                    if &goal.category != category {
                        return false;
                    }
                }
                true
            })
            .collect();
        goals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(goals)
    }

    async fn list_completed(&self) -> DomainResult<Vec<CompletionEntry>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::read_completed(&root))
            .await
            .map_err(|e| DomainError::DatabaseError(format!("read_completed task panicked: {e}")))?
    }

    async fn reclaim_stale(&self, claim_timeout_seconds: u64) -> DomainResult<Vec<String>> {
        if claim_timeout_seconds == 0 {
            return Ok(Vec::new());
        }
        let _guard = self.lock.lock().await;
        let mut state = self.read_state().await?;
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(claim_timeout_seconds as i64);
        let mut reclaimed = Vec::new();
        for (id, goal) in &mut state.goals {
            if goal.claimed_by.is_some() && goal.claimed_at.is_some_and(|t| t < cutoff) {
                goal.claimed_by = None;
                goal.claimed_at = None;
                reclaimed.push(id.clone());
            }
        }
        if !reclaimed.is_empty() {
            self.write_state(&state).await?;
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::GoalResult;
    use tempfile::tempdir;

    fn repo(dir: &Path) -> FileBacklogRepository {
        FileBacklogRepository::new(dir.join(".backlog"))
    }

    #[tokio::test]
    async fn add_goal_is_idempotent_and_persists_across_instances() {
        let dir = tempdir().unwrap();
        let goal = Goal::new("write hello.py");

        repo(dir.path()).add_goal(&goal).await.unwrap();
        repo(dir.path()).add_goal(&goal).await.unwrap();

        let reloaded = repo(dir.path());
        let pending = reloaded.list_pending(GoalFilter::default()).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_claim_is_blocked() {
        let dir = tempdir().unwrap();
        let goal = Goal::new("write hello.py");
        let repo = repo(dir.path());
        repo.add_goal(&goal).await.unwrap();

        assert!(repo.claim_goal(&goal.id, 1).await.unwrap());
        assert!(!repo.claim_goal(&goal.id, 2).await.unwrap());
    }

    #[tokio::test]
    async fn complete_goal_clears_claim_and_appends_history() {
        let dir = tempdir().unwrap();
        let goal = Goal::new("write hello.py");
        let repo = repo(dir.path());
        repo.add_goal(&goal).await.unwrap();
        repo.claim_goal(&goal.id, 1).await.unwrap();

        let mut result = GoalResult::new("done");
        result.artifacts_created.push("hello.py".into());
        repo.complete_goal(&CompletionEntry::new(goal.id.clone(), result)).await.unwrap();

        let fetched = repo.get_goal(&goal.id).await.unwrap().unwrap();
        assert!(!fetched.is_claimed());

        let completed = repo.list_completed().await.unwrap();
        assert_eq!(completed.len(), 1);
        assert!(completed[0].result.success());

        assert!(dir.path().join(".backlog").join(STATE_FILE).exists());
        assert!(dir.path().join(".backlog").join(COMPLETED_FILE).exists());
    }

    #[tokio::test]
    async fn reclaim_stale_releases_expired_claims() {
        let dir = tempdir().unwrap();
        let goal = Goal::new("write hello.py");
        let repo = repo(dir.path());
        repo.add_goal(&goal).await.unwrap();
        repo.claim_goal(&goal.id, 1).await.unwrap();

        assert!(repo.reclaim_stale(0).await.unwrap().is_empty());

        {
            let mut state = repo.read_state().await.unwrap();
            state.goals.get_mut(&goal.id).unwrap().claimed_at =
                Some(chrono::Utc::now() - chrono::Duration::seconds(120));
            repo.write_state(&state).await.unwrap();
        }

        let reclaimed = repo.reclaim_stale(60).await.unwrap();
        assert_eq!(reclaimed, vec![goal.id.clone()]);
        assert!(!repo.get_goal(&goal.id).await.unwrap().unwrap().is_claimed());
    }

    #[tokio::test]
    async fn state_file_survives_a_reload_of_a_fresh_repository() {
        let dir = tempdir().unwrap();
        let goal = Goal::new("document the backlog format").with_category("docs");
        repo(dir.path()).add_goal(&goal).await.unwrap();

        let reloaded = repo(dir.path());
        let fetched = reloaded.get_goal(&goal.id).await.unwrap().unwrap();
        assert_eq!(fetched.category, "docs");
    }
}
