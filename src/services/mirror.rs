//! Mirror (spec §4.9): self-introspection subsystem. Reads its own
//! source modules, the active Lens, and recent tool-call/memory state,
//! then proposes modifications that are only ever written to disk
//! through `analyse -> propose -> confirm -> apply -> test -> validate`.
//! Grounded on the teacher's `services::evolution_loop::EvolutionLoop`
//! for the propose-then-gate shape (accumulate evidence, decide a
//! change is warranted, version it, auto-revert on regression) —
//! adapted from template-version refinement to source-file proposals —
//! and on `services::intent_verifier` for the pattern of asking a model
//! to grade its own output before a caller trusts it.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EventPayload, Lens};
use crate::services::event_bus::EventBus;
use crate::services::model_gateway::ModelGateway;
use crate::services::model_router::TaskCategory;
use crate::services::tool_executor::ToolExecutor;

/// Modification targets Mirror may never touch regardless of what a
/// proposal asks for (spec §4.9 "blocklist of modification targets:
/// trust levels, rate limits, the blocklist" itself).
pub fn default_immutable_modules() -> Vec<String> {
    vec![
        "src/domain/models/tool.rs".to_string(),
        "src/services/mirror.rs".to_string(),
        "src/domain/models/config.rs".to_string(),
    ]
}

pub struct MirrorConfig {
    pub immutable_modules: Vec<String>,
    pub max_proposals_per_hour: u32,
    pub max_applications_per_day: u32,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            immutable_modules: default_immutable_modules(),
            max_proposals_per_hour: 6,
            max_applications_per_day: 3,
        }
    }
}

/// A candidate change Mirror wants to make, not yet written to disk.
#[derive(Debug, Clone)]
pub struct ModificationProposal {
    pub target: PathBuf,
    pub summary: String,
    pub new_contents: String,
    pub confidence: f64,
}

/// Outcome of `Mirror::apply`: either the change stuck, or it was
/// rolled back after the self-test failed (spec §4.9 "automatic
/// rollback if a self-test fails").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    RolledBack { reason: String },
}

pub struct Mirror {
    config: MirrorConfig,
    gateway: Option<Arc<ModelGateway>>,
    event_bus: Option<Arc<EventBus>>,
    proposals: Mutex<VecDeque<DateTime<Utc>>>,
    applications: Mutex<VecDeque<DateTime<Utc>>>,
}

impl Mirror {
    pub fn new(config: MirrorConfig, gateway: Option<Arc<ModelGateway>>, event_bus: Option<Arc<EventBus>>) -> Self {
        Self {
            config,
            gateway,
            event_bus,
            proposals: Mutex::new(VecDeque::new()),
            applications: Mutex::new(VecDeque::new()),
        }
    }

    fn is_immutable(&self, target: &Path) -> bool {
        self.config.immutable_modules.iter().any(|blocked| target.ends_with(blocked))
    }

    /// Read `target`'s current contents and ask the model to analyse it
    /// against the active Lens's heuristics for improvement
    /// opportunities (spec §4.9 "introspection ... analysis (pattern
    /// detection, failure categorisation)").
    #[tracing::instrument(skip(self, executor, lens), err)]
    pub async fn analyse(&self, executor: &ToolExecutor, target: &Path, lens: Option<&Lens>) -> DomainResult<String> {
        let Some(gateway) = &self.gateway else {
            return Err(DomainError::ExecutionFailed("mirror has no model gateway configured".to_string()));
        };

        if let Some(bus) = &self.event_bus {
            bus.publish(
                None,
                EventPayload::MirrorAnalysisStarted { target: target.display().to_string() },
            )
            .await;
        }

        let contents = executor.read_file(target).await?;
        let heuristics_note = lens
            .map(|l| {
                l.heuristics
                    .iter()
                    .map(|h| format!("- {}: {}", h.name, h.rule))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let prompt = format!(
            "Analyse this source module for concrete improvement opportunities. \
             Be specific; do not propose rewrites with no behavioral benefit.\n\n\
             Module: {}\n```\n{}\n```\n\nActive heuristics:\n{heuristics_note}",
            target.display(),
            contents.stdout
        );

        let response = gateway
            .complete(TaskCategory::Introspection, lens, prompt, None)
            .await
            .map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;
        Ok(response.content)
    }

    /// Turn an analysis into a concrete [`ModificationProposal`], gated
    /// by the immutable-module blocklist and the proposals/hour rate
    /// limit (spec §4.9).
    #[tracing::instrument(skip(self, analysis), err)]
    pub async fn propose(&self, target: &Path, analysis: &str) -> DomainResult<ModificationProposal> {
        if self.is_immutable(target) {
            return Err(DomainError::SandboxViolation(format!("{} is an immutable Mirror target", target.display())));
        }
        self.check_and_record_rate(&self.proposals, self.config.max_proposals_per_hour, Duration::hours(1), "proposal")
            .await?;

        let Some(gateway) = &self.gateway else {
            return Err(DomainError::ExecutionFailed("mirror has no model gateway configured".to_string()));
        };

        let prompt = format!(
            "Based on this analysis, propose a concrete replacement for the file's \
             full contents.\n\nAnalysis:\n{analysis}\n\n\
             Respond with ONLY JSON: {{\"summary\": string, \"new_contents\": string, \
             \"confidence\": 0..1}}."
        );
        let response = gateway
            .complete(TaskCategory::Introspection, None, prompt, None)
            .await
            .map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;

        let json = crate::services::extract_json_from_response(&response.content);
        let draft: ProposalDraft = serde_json::from_str(&json)
            .map_err(|e| DomainError::ValidationFailed(format!("mirror proposal did not parse: {e}")))?;

        let proposal = ModificationProposal {
            target: target.to_path_buf(),
            summary: draft.summary,
            new_contents: draft.new_contents,
            confidence: draft.confidence.clamp(0.0, 1.0),
        };

        if let Some(bus) = &self.event_bus {
            bus.publish(
                None,
                EventPayload::MirrorChangeProposed {
                    target: target.display().to_string(),
                    summary: proposal.summary.clone(),
                },
            )
            .await;
        }

        Ok(proposal)
    }

    /// Apply a confirmed proposal: write the new contents, run the
    /// caller-supplied self-test command, and roll back automatically
    /// if it fails (spec §4.9 "mandatory rollback point before apply;
    /// automatic rollback if a self-test fails"). `confirmed` is the
    /// explicit human-in-the-loop gate — Mirror never applies a
    /// proposal nobody approved.
    #[tracing::instrument(skip(self, executor, proposal, self_test), err)]
    pub async fn apply(
        &self,
        executor: &ToolExecutor,
        proposal: &ModificationProposal,
        confirmed: bool,
        self_test: Option<(&str, &[String])>,
    ) -> DomainResult<ApplyOutcome> {
        if !confirmed {
            return Err(DomainError::ValidationFailed("mirror change was not confirmed".to_string()));
        }
        if self.is_immutable(&proposal.target) {
            return Err(DomainError::SandboxViolation(format!(
                "{} is an immutable Mirror target",
                proposal.target.display()
            )));
        }
        self.check_and_record_rate(&self.applications, self.config.max_applications_per_day, Duration::days(1), "application")
            .await?;

        // Rollback point: the file's current contents, restored verbatim
        // if the self-test below fails. Subject to the executor's
        // max_output_bytes truncation like any other read_file call.
        let rollback = executor.read_file(&proposal.target).await.ok().map(|r| r.stdout);

        executor.write_file(&proposal.target, &proposal.new_contents).await?;

        if let Some((program, args)) = self_test {
            let result = executor.run_command(program, args, None).await?;
            if !result.ok() {
                if let Some(original) = rollback {
                    executor.write_file(&proposal.target, &original).await?;
                }
                if let Some(bus) = &self.event_bus {
                    bus.publish(
                        None,
                        EventPayload::MirrorValidationFailed {
                            target: proposal.target.display().to_string(),
                            reason: result.stderr.clone(),
                        },
                    )
                    .await;
                }
                return Ok(ApplyOutcome::RolledBack { reason: result.stderr });
            }
        }

        if let Some(bus) = &self.event_bus {
            bus.publish(None, EventPayload::MirrorChangeApplied { target: proposal.target.display().to_string() }).await;
        }
        Ok(ApplyOutcome::Applied)
    }

    /// Prune entries older than `window`, then reject if the remaining
    /// count is already at the cap; otherwise record this event.
    async fn check_and_record_rate(&self, log: &Mutex<VecDeque<DateTime<Utc>>>, cap: u32, window: Duration, kind: &str) -> DomainResult<()> {
        let mut log = log.lock().await;
        let cutoff = Utc::now() - window;
        while log.front().is_some_and(|t| *t < cutoff) {
            log.pop_front();
        }
        if log.len() as u32 >= cap {
            return Err(DomainError::ValidationFailed(format!("mirror {kind} rate limit exceeded")));
        }
        log.push_back(Utc::now());
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ProposalDraft {
    summary: String,
    new_contents: String,
    #[serde(default)]
    confidence: f64,
}
