use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CompletionEntry, Goal, GoalPriority, GoalResult, GoalScope};
use crate::domain::ports::{BacklogRepository, GoalFilter};

/// `SQLite`-backed [`BacklogRepository`] (spec §3, §4.2, §6).
pub struct SqliteBacklogRepository {
    pool: SqlitePool,
}

impl SqliteBacklogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_goal(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Goal> {
        let requires: String = row.get("requires");
        let priority: String = row.get("priority");
        Ok(Goal {
            id: row.get("id"),
            title: row.get("title"),
            description: row.get("description"),
            priority: priority_from_str(&priority)?,
            category: row.get("category"),
            scope: GoalScope {
                max_files: row.get::<i64, _>("max_files") as u32,
                max_lines_changed: row.get::<i64, _>("max_lines_changed") as u32,
            },
            requires: serde_json::from_str(&requires)
                .map_err(|e| DomainError::DatabaseError(format!("corrupt requires json: {e}")))?,
            claimed_by: row.get::<Option<i64>, _>("claimed_by"),
            claimed_at: row
                .get::<Option<String>, _>("claimed_at")
                .as_deref()
                .and_then(parse_timestamp),
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))
                .ok_or_else(|| DomainError::DatabaseError("corrupt created_at".into()))?,
        })
    }
}

fn priority_to_str(priority: GoalPriority) -> &'static str {
    match priority {
        GoalPriority::Low => "low",
        GoalPriority::Normal => "normal",
        GoalPriority::High => "high",
        GoalPriority::Critical => "critical",
    }
}

fn priority_from_str(s: &str) -> DomainResult<GoalPriority> {
    match s {
        "low" => Ok(GoalPriority::Low),
        "normal" => Ok(GoalPriority::Normal),
        "high" => Ok(GoalPriority::High),
        "critical" => Ok(GoalPriority::Critical),
        other => Err(DomainError::DatabaseError(format!("unknown priority: {other}"))),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl BacklogRepository for SqliteBacklogRepository {
    async fn add_goal(&self, goal: &Goal) -> DomainResult<()> {
        let requires = serde_json::to_string(&goal.requires)
            .map_err(|e| DomainError::DatabaseError(format!("failed to serialize requires: {e}")))?;
        let priority = priority_to_str(goal.priority);

        let result = sqlx::query(
            "INSERT INTO goals (id, title, description, priority, category, max_files, max_lines_changed, requires, claimed_by, claimed_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&goal.id)
        .bind(&goal.title)
        .bind(&goal.description)
        .bind(priority)
        .bind(&goal.category)
        .bind(i64::from(goal.scope.max_files))
        .bind(i64::from(goal.scope.max_lines_changed))
        .bind(&requires)
        .bind(goal.claimed_by)
        .bind(goal.claimed_at.map(|t| t.to_rfc3339()))
        .bind(goal.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(goal_id = %goal.id, "goal already exists, ignoring duplicate insert");
        }
        Ok(())
    }

    async fn get_goal(&self, id: &str) -> DomainResult<Option<Goal>> {
        let row = sqlx::query("SELECT * FROM goals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_goal).transpose()
    }

    async fn claim_goal(&self, id: &str, claimed_by: i64) -> DomainResult<bool> {
        let result = sqlx::query(
            "UPDATE goals SET claimed_by = ?, claimed_at = ? WHERE id = ? AND claimed_by IS NULL",
        )
        .bind(claimed_by)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() > 0;
        if !claimed {
            debug!(goal_id = %id, "claim_goal lost race or goal not found");
        }
        Ok(claimed)
    }

    async fn unclaim_goal(&self, id: &str) -> DomainResult<()> {
        sqlx::query("UPDATE goals SET claimed_by = NULL, claimed_at = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_goal(&self, entry: &CompletionEntry) -> DomainResult<()> {
        let result: &GoalResult = &entry.result;
        let artifacts_created = serde_json::to_string(&result.artifacts_created)
            .map_err(|e| DomainError::DatabaseError(format!("failed to serialize artifacts_created: {e}")))?;
        let artifacts_failed = serde_json::to_string(&result.artifacts_failed)
            .map_err(|e| DomainError::DatabaseError(format!("failed to serialize artifacts_failed: {e}")))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO completions (goal_id, summary, artifacts_created, artifacts_failed, duration_seconds, files_changed, failure_reason, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.goal_id)
        .bind(&result.summary)
        .bind(&artifacts_created)
        .bind(&artifacts_failed)
        .bind(result.duration_seconds)
        .bind(i64::from(result.files_changed))
        .bind(&result.failure_reason)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE goals SET claimed_by = NULL, claimed_at = NULL WHERE id = ?")
            .bind(&entry.goal_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_pending(&self, filter: GoalFilter) -> DomainResult<Vec<Goal>> {
        // Filters are applied in-process rather than built into dynamic
        // SQL, keeping the query text static.
        let rows = sqlx::query("SELECT * FROM goals ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut goals = Vec::with_capacity(rows.len());
        for row in &rows {
            let goal = Self::row_to_goal(row)?;
            if filter.claimed_only && !goal.is_claimed() {
                continue;
            }
            if filter.unclaimed_only && goal.is_claimed() {
                continue;
            }
            if let Some(category) = &filter.category {
                if &goal.category != category {
                    continue;
                }
            }
            goals.push(goal);
        }
        Ok(goals)
    }

    async fn list_completed(&self) -> DomainResult<Vec<CompletionEntry>> {
        let rows = sqlx::query("SELECT * FROM completions ORDER BY timestamp ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let artifacts_created: String = row.get("artifacts_created");
            let artifacts_failed: String = row.get("artifacts_failed");
            let result = GoalResult {
                summary: row.get("summary"),
                artifacts_created: serde_json::from_str(&artifacts_created)
                    .map_err(|e| DomainError::DatabaseError(format!("corrupt artifacts_created json: {e}")))?,
                artifacts_failed: serde_json::from_str(&artifacts_failed)
                    .map_err(|e| DomainError::DatabaseError(format!("corrupt artifacts_failed json: {e}")))?,
                duration_seconds: row.get("duration_seconds"),
                files_changed: row.get::<i64, _>("files_changed") as u32,
                failure_reason: row.get("failure_reason"),
            };
            entries.push(CompletionEntry {
                goal_id: row.get("goal_id"),
                result,
                timestamp: parse_timestamp(&row.get::<String, _>("timestamp"))
                    .ok_or_else(|| DomainError::DatabaseError("corrupt timestamp".into()))?,
            });
        }
        Ok(entries)
    }

    async fn reclaim_stale(&self, claim_timeout_seconds: u64) -> DomainResult<Vec<String>> {
        if claim_timeout_seconds == 0 {
            return Ok(Vec::new());
        }
        let cutoff = Utc::now() - chrono::Duration::seconds(claim_timeout_seconds as i64);

        let rows = sqlx::query("SELECT id FROM goals WHERE claimed_by IS NOT NULL AND claimed_at < ?")
            .bind(cutoff.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;
        let ids: Vec<String> = rows.iter().map(|r| r.get::<String, _>("id")).collect();

        if !ids.is_empty() {
            warn!(count = ids.len(), "reclaiming stale goal claims");
            sqlx::query("UPDATE goals SET claimed_by = NULL, claimed_at = NULL WHERE claimed_by IS NOT NULL AND claimed_at < ?")
                .bind(cutoff.to_rfc3339())
                .execute(&self.pool)
                .await?;
        }
        Ok(ids)
    }
}
