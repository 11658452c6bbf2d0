//! Goal domain model (spec §3).
//!
//! A goal is a unit of user intent. Its id is a stable hash of the
//! description so that `_ensure_goal("X") == _ensure_goal("X")` holds
//! across processes (spec §8, "Hash determinism").

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Sentinel `claimed_by` value for single-instance (non-pooled) execution.
pub const SINGLE_INSTANCE_WORKER: i64 = -1;

/// Priority level for goals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Default for GoalPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Scope limits that bound how much a goal's execution may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalScope {
    pub max_files: u32,
    pub max_lines_changed: u32,
}

impl Default for GoalScope {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_lines_changed: 2000,
        }
    }
}

/// A unit of user intent (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    /// Stable hash of `description` (spec §8 hash determinism).
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: GoalPriority,
    pub category: String,
    pub scope: GoalScope,
    /// Other goal ids this goal requires to be completed first.
    pub requires: Vec<String>,
    /// `None` / `-1` (`SINGLE_INSTANCE_WORKER`) denotes single-instance
    /// execution. Positive ids are worker-pool members.
    pub claimed_by: Option<i64>,
    pub claimed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Goal {
    /// Compute the stable goal id for a description (spec §4.8 `_ensure_goal`).
    pub fn hash_id(description: &str) -> String {
        let mut hasher = DefaultHasher::new();
        description.trim().hash(&mut hasher);
        format!("g-{:016x}", hasher.finish())
    }

    /// Create a new goal from a natural-language description. `title` is
    /// derived from the first line of the description, matching the
    /// teacher's `generate_title` convention.
    pub fn new(description: impl Into<String>) -> Self {
        let description = description.into();
        let id = Self::hash_id(&description);
        let title = generate_title(&description);
        Self {
            id,
            title,
            description,
            priority: GoalPriority::default(),
            category: "default".to_string(),
            scope: GoalScope::default(),
            requires: Vec::new(),
            claimed_by: None,
            claimed_at: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: GoalPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_requirement(mut self, goal_id: impl Into<String>) -> Self {
        self.requires.push(goal_id.into());
        self
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed_by.is_some()
    }
}

fn generate_title(description: &str) -> String {
    let first_line = description.lines().next().unwrap_or(description).trim();
    if first_line.is_empty() {
        return "Untitled goal".to_string();
    }
    let max_len = 80;
    if first_line.len() <= max_len {
        return first_line.to_string();
    }
    match first_line[..max_len].rfind(' ') {
        Some(pos) => format!("{}...", &first_line[..pos]),
        None => format!("{}...", &first_line[..max_len]),
    }
}

/// Outcome of executing a goal (spec §3 GoalResult).
///
/// `success` is derived, never set directly: `success = artifacts_failed
/// .is_empty() && !artifacts_created.is_empty()`. Partial success still
/// counts as completion (spec §3 rule).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalResult {
    pub summary: String,
    pub artifacts_created: Vec<String>,
    pub artifacts_failed: Vec<String>,
    pub duration_seconds: f64,
    pub files_changed: u32,
    pub failure_reason: Option<String>,
}

impl GoalResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    /// `success = true` iff zero failed artifacts AND at least one created
    /// artifact (spec §3, §8 "Partial success rule").
    pub fn success(&self) -> bool {
        self.artifacts_failed.is_empty() && !self.artifacts_created.is_empty()
    }

    /// `partial = true` iff the goal completed (at least one artifact
    /// created) but not every artifact succeeded.
    pub fn partial(&self) -> bool {
        !self.artifacts_failed.is_empty() && !self.artifacts_created.is_empty()
    }

    /// Total failure: no artifacts were created at all.
    pub fn is_total_failure(&self) -> bool {
        self.artifacts_created.is_empty()
    }
}

/// Append-only history record (spec §3 CompletionEntry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEntry {
    pub goal_id: String,
    pub result: GoalResult,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl CompletionEntry {
    pub fn new(goal_id: impl Into<String>, result: GoalResult) -> Self {
        Self {
            goal_id: goal_id.into(),
            result,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Metadata bag attached to a goal for extension without schema churn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_id_is_deterministic() {
        assert_eq!(Goal::hash_id("write hello.py"), Goal::hash_id("write hello.py"));
        let a = Goal::new("write hello.py");
        let b = Goal::new("write hello.py");
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn hash_id_differs_by_description() {
        assert_ne!(Goal::hash_id("a"), Goal::hash_id("b"));
    }

    #[test]
    fn hash_id_trims_whitespace() {
        assert_eq!(Goal::hash_id("write hello.py"), Goal::hash_id("  write hello.py  "));
    }

    #[test]
    fn goal_result_success_requires_created_and_no_failures() {
        let mut r = GoalResult::new("ok");
        assert!(!r.success(), "no artifacts at all is not success");

        r.artifacts_created.push("hello.py".into());
        assert!(r.success());
        assert!(!r.partial());

        r.artifacts_failed.push("task-2".into());
        assert!(!r.success());
        assert!(r.partial());
    }

    #[test]
    fn total_failure_means_zero_created() {
        let r = GoalResult::new("fail");
        assert!(r.is_total_failure());

        let mut r2 = GoalResult::new("ok");
        r2.artifacts_created.push("a".into());
        assert!(!r2.is_total_failure());
    }

    #[test]
    fn single_instance_sentinel_is_negative_one() {
        assert_eq!(SINGLE_INSTANCE_WORKER, -1);
    }
}
