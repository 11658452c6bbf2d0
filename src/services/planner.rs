//! Planner (spec §4.6): turns `(goal, context)` into an Artifact DAG.
//! Grounded on the teacher's `services::llm_planner::LlmPlanner` —
//! build a decomposition prompt, call the model, parse its JSON
//! response into a task list — generalized from the teacher's Claude-
//! CLI/direct-API split to a single [`ModelGateway`] call, and from its
//! title-based dependency lookup to index-based `requires` so the
//! parser doesn't depend on titles staying unique.

use std::collections::HashSet;

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Artifact, ArtifactDag, DomainType, Goal, Lens, MemoryContext};
use crate::services::model_gateway::ModelGateway;
use crate::services::model_router::TaskCategory;
use crate::services::extract_json_from_response;

/// Bound on cycle-detected decomposition retries (spec §4.6 "detect and
/// retry up to 3 times").
const DEFAULT_MAX_CYCLE_RETRIES: u32 = 3;

/// Jaccard word-overlap threshold for near-duplicate goal detection
/// (spec §4.6).
const DEFAULT_JACCARD_THRESHOLD: f64 = 0.8;

pub struct PlannerConfig {
    pub max_cycle_retries: u32,
    pub jaccard_threshold: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_cycle_retries: DEFAULT_MAX_CYCLE_RETRIES,
            jaccard_threshold: DEFAULT_JACCARD_THRESHOLD,
        }
    }
}

/// What `Planner::plan` produced: a fresh (or partially-reused) DAG, or
/// a pointer back to a near-duplicate goal already on the books (spec
/// §4.6 "return the existing goal if a near-duplicate exists").
pub enum PlanOutcome {
    Dag {
        dag: ArtifactDag,
        /// Artifact ids the planner recognized as already produced via
        /// `context.completed_artifacts`, so the `ExecutionManager`
        /// skips re-running their pattern (spec §4.6 "reuse existing
        /// artifacts by reference rather than regenerating").
        reused_artifacts: HashSet<Uuid>,
    },
    ReuseGoal(Goal),
}

pub struct Planner<'a> {
    gateway: &'a ModelGateway,
    config: PlannerConfig,
}

impl<'a> Planner<'a> {
    pub fn new(gateway: &'a ModelGateway, config: PlannerConfig) -> Self {
        Self { gateway, config }
    }

    /// Produce an Artifact DAG for `goal`, or point back to an existing
    /// near-duplicate (spec §4.6).
    #[tracing::instrument(skip(self, context, lens), err)]
    pub async fn plan(&self, goal: &Goal, context: &MemoryContext, lens: Option<&Lens>) -> DomainResult<PlanOutcome> {
        if let Some(existing) = has_similar_goal(&context.existing_goals, &goal.description, self.config.jaccard_threshold) {
            return Ok(PlanOutcome::ReuseGoal(existing.clone()));
        }

        let mut feedback: Option<String> = None;
        for attempt in 0..=self.config.max_cycle_retries {
            let raw = self.decompose(goal, context, lens, feedback.as_deref()).await?;
            match build_dag(&raw, &context.completed_artifacts) {
                Ok((dag, reused_artifacts)) => return Ok(PlanOutcome::Dag { dag, reused_artifacts }),
                Err(cycle) if attempt < self.config.max_cycle_retries => {
                    feedback = Some(format!(
                        "Your previous decomposition contained a dependency cycle involving {} artifacts. \
                         Remove the circular `requires` and try again.",
                        cycle.len()
                    ));
                }
                Err(cycle) => return Err(DomainError::DependencyCycle(cycle)),
            }
        }
        unreachable!("loop always returns by the final iteration")
    }

    async fn decompose(
        &self,
        goal: &Goal,
        context: &MemoryContext,
        lens: Option<&Lens>,
        feedback: Option<&str>,
    ) -> DomainResult<Vec<RawArtifact>> {
        let prompt = build_decomposition_prompt(goal, context, lens, feedback);
        let response = self
            .gateway
            .complete(TaskCategory::Analysis, lens, prompt, Some(&goal.id))
            .await
            .map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;

        let json = extract_json_from_response(&response.content);
        match serde_json::from_str::<Vec<RawArtifact>>(&json) {
            Ok(artifacts) if !artifacts.is_empty() => Ok(artifacts),
            // A model that returns unparseable or empty JSON still
            // leaves the goal plannable as a single artifact, rather
            // than aborting the whole run on a formatting slip.
            _ => Ok(vec![RawArtifact {
                description: goal.description.clone(),
                requires: Vec::new(),
                domain_type: "file".to_string(),
                produces_file: None,
            }]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawArtifact {
    description: String,
    #[serde(default)]
    requires: Vec<usize>,
    #[serde(default = "default_domain_type")]
    domain_type: String,
    #[serde(default)]
    produces_file: Option<String>,
}

fn default_domain_type() -> String {
    "file".to_string()
}

fn parse_domain_type(raw: &str) -> DomainType {
    match raw {
        "file" => DomainType::File,
        "edit" => DomainType::Edit,
        "report" => DomainType::Report,
        other => DomainType::Other(other.to_string()),
    }
}

/// Deterministic artifact id from its description, so re-planning the
/// same goal (or a retried decomposition) yields the same ids and
/// `context.completed_artifacts` lookups stay stable across attempts.
fn artifact_id_for(description: &str) -> Uuid {
    const NAMESPACE: Uuid = Uuid::from_bytes([
        0x53, 0x75, 0x6e, 0x77, 0x65, 0x6c, 0x6c, 0x2d, 0x61, 0x72, 0x74, 0x69, 0x66, 0x61, 0x63, 0x74,
    ]);
    Uuid::new_v5(&NAMESPACE, description.trim().as_bytes())
}

/// Build an [`ArtifactDag`] from the model's raw decomposition, marking
/// artifacts that `completed_artifacts` already covers (spec §4.6). On
/// a cycle, returns the ids involved so the caller can retry with
/// feedback (spec §4.6 "detect and retry up to 3 times").
fn build_dag(raw: &[RawArtifact], completed_artifacts: &HashSet<Uuid>) -> Result<(ArtifactDag, HashSet<Uuid>), Vec<Uuid>> {
    let ids: Vec<Uuid> = raw.iter().map(|r| artifact_id_for(&r.description)).collect();
    let mut dag = ArtifactDag::new();
    let mut reused = HashSet::new();

    for (i, r) in raw.iter().enumerate() {
        let id = ids[i];
        if completed_artifacts.contains(&id) {
            reused.insert(id);
        }
        let requires: Vec<Uuid> = r
            .requires
            .iter()
            .filter_map(|&idx| ids.get(idx).copied())
            .filter(|dep| *dep != id)
            .collect();
        let artifact = Artifact {
            id,
            description: r.description.clone(),
            requires,
            produces_file: r.produces_file.clone(),
            domain_type: parse_domain_type(&r.domain_type),
        };
        if dag.add_artifact(artifact).is_err() {
            return Err(dag.find_cycle().unwrap_or_default());
        }
    }

    Ok((dag, reused))
}

fn build_decomposition_prompt(goal: &Goal, context: &MemoryContext, lens: Option<&Lens>, feedback: Option<&str>) -> String {
    let framework_note = lens
        .and_then(|l| l.framework.clone())
        .map(|f| format!("Decompose using the {f} methodology where it applies.\n"))
        .unwrap_or_default();

    let completed_note = if context.completed_artifacts.is_empty() {
        String::new()
    } else {
        format!(
            "{} artifacts from prior attempts at this goal already exist; describe them identically if they're still needed so they can be reused rather than regenerated.\n",
            context.completed_artifacts.len()
        )
    };

    let feedback_note = feedback.map(|f| format!("\nIMPORTANT: {f}\n")).unwrap_or_default();

    format!(
        "Decompose this goal into a list of concrete artifacts.\n\n\
         Goal: {}\n\
         {framework_note}{completed_note}{feedback_note}\n\
         Respond with ONLY a JSON array, no prose. Each element:\n\
         {{\"description\": string, \"requires\": [zero-based indices of other array elements], \
         \"domain_type\": \"file\"|\"edit\"|\"report\", \"produces_file\": string or null}}.",
        goal.description
    )
}

/// Jaccard word-overlap similarity between two descriptions, used for
/// near-duplicate goal detection (spec §4.6).
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let sa: HashSet<String> = a.to_lowercase().split_whitespace().map(str::to_string).collect();
    let sb: HashSet<String> = b.to_lowercase().split_whitespace().map(str::to_string).collect();
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    intersection as f64 / union as f64
}

fn has_similar_goal<'a>(existing: &'a [Goal], description: &str, threshold: f64) -> Option<&'a Goal> {
    existing.iter().find(|g| jaccard_similarity(&g.description, description) >= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_similarity_identical_strings_is_one() {
        assert!((jaccard_similarity("write hello world", "write hello world") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn jaccard_similarity_disjoint_strings_is_zero() {
        assert_eq!(jaccard_similarity("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn has_similar_goal_finds_near_duplicate_above_threshold() {
        let goals = vec![Goal::new("write a hello world script in python")];
        let found = has_similar_goal(&goals, "write a hello world script in python please", 0.8);
        assert!(found.is_some());
    }

    #[test]
    fn has_similar_goal_misses_unrelated_description() {
        let goals = vec![Goal::new("write a hello world script in python")];
        let found = has_similar_goal(&goals, "refactor the authentication middleware", 0.8);
        assert!(found.is_none());
    }

    #[test]
    fn build_dag_marks_completed_artifacts_as_reused() {
        let raw = vec![RawArtifact {
            description: "write hello.py".to_string(),
            requires: Vec::new(),
            domain_type: "file".to_string(),
            produces_file: Some("hello.py".to_string()),
        }];
        let id = artifact_id_for(&raw[0].description);
        let mut completed = HashSet::new();
        completed.insert(id);
        let (dag, reused) = build_dag(&raw, &completed).unwrap();
        assert_eq!(dag.len(), 1);
        assert!(reused.contains(&id));
    }

    #[test]
    fn build_dag_rejects_cyclic_requires() {
        let raw = vec![
            RawArtifact {
                description: "a".to_string(),
                requires: vec![1],
                domain_type: "file".to_string(),
                produces_file: None,
            },
            RawArtifact {
                description: "b".to_string(),
                requires: vec![0],
                domain_type: "file".to_string(),
                produces_file: None,
            },
        ];
        assert!(build_dag(&raw, &HashSet::new()).is_err());
    }

    #[test]
    fn artifact_id_for_is_deterministic() {
        assert_eq!(artifact_id_for("write hello.py"), artifact_id_for("write hello.py"));
        assert_eq!(artifact_id_for("  write hello.py  "), artifact_id_for("write hello.py"));
    }
}
