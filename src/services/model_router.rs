//! ModelRouter (spec §4.3): selects a provider/model per task category
//! and tracks per-model performance. Grounded on the teacher's
//! `services::model_router::ModelRouter`, generalized from the
//! teacher's fixed complexity ladder (trivial/simple/moderate/complex)
//! to the spec's closed task-category set and four-step selection
//! order, with the Performance Tracker backed by
//! [`crate::domain::ports::MemoryRepository`] rather than an in-memory
//! table, since the score must survive across sessions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::Lens;
use crate::domain::ports::MemoryRepository;

/// Closed set of task categories the router selects a model for (spec
/// §4.3). Unknown categories never reach this type — callers map their
/// own labels onto it at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    Introspection,
    Analysis,
    CodeGeneration,
    QuickAnalysis,
    DeepReasoning,
    Conversation,
    Default,
}

impl TaskCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Introspection => "introspection",
            Self::Analysis => "analysis",
            Self::CodeGeneration => "code_generation",
            Self::QuickAnalysis => "quick_analysis",
            Self::DeepReasoning => "deep_reasoning",
            Self::Conversation => "conversation",
            Self::Default => "default",
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a particular model was selected, surfaced on
/// `model_call_started` events (spec §4.1, §8 scenario 6).
#[derive(Debug, Clone)]
pub struct ModelSelection {
    pub model: String,
    pub reason: String,
}

/// Minimum historical samples before the Performance Tracker's
/// preference overrides the session default (spec §4.3 default).
pub const DEFAULT_MIN_SAMPLES: u32 = 5;

pub struct ModelRouterConfig {
    pub session_default: String,
    pub min_samples: u32,
    /// Categories that must never route to a cloud provider regardless
    /// of other preferences (spec §4.3 privacy).
    pub keep_local: Vec<String>,
    pub local_provider_model: String,
}

impl Default for ModelRouterConfig {
    fn default() -> Self {
        Self {
            session_default: "claude-sonnet-4-5".to_string(),
            min_samples: DEFAULT_MIN_SAMPLES,
            keep_local: Vec::new(),
            local_provider_model: "ollama-llama3".to_string(),
        }
    }
}

pub struct ModelRouter {
    config: ModelRouterConfig,
    memory: Option<Arc<dyn MemoryRepository>>,
    /// Explicit per-session overrides, e.g. from `--model` on the CLI
    /// (spec §4.3 selection step 1, highest priority).
    overrides: HashMap<String, String>,
}

impl ModelRouter {
    pub fn new(config: ModelRouterConfig, memory: Option<Arc<dyn MemoryRepository>>) -> Self {
        Self {
            config,
            memory,
            overrides: HashMap::new(),
        }
    }

    /// Register an explicit override for a category (spec §4.3 step 1).
    pub fn set_override(&mut self, category: TaskCategory, model: impl Into<String>) {
        self.overrides.insert(category.as_str().to_string(), model.into());
    }

    /// Select a model for `category`, honoring privacy first: a
    /// `keep_local` category is forced onto the local provider
    /// regardless of override, Lens preference, or historical
    /// performance (spec §4.3 "MUST NOT route to cloud providers").
    pub async fn select_model(&self, category: TaskCategory, lens: Option<&Lens>) -> DomainResult<ModelSelection> {
        if self.config.keep_local.iter().any(|c| c == category.as_str()) {
            return Ok(ModelSelection {
                model: self.config.local_provider_model.clone(),
                reason: format!("{category} is in privacy.keep_local; forced to local provider"),
            });
        }

        // 1. Explicit override.
        if let Some(model) = self.overrides.get(category.as_str()) {
            return Ok(ModelSelection {
                model: model.clone(),
                reason: "explicit override".to_string(),
            });
        }

        // 2. Lens `model_routing.preferences[category].model`, if the
        //    Lens enables routing.
        if let Some(lens) = lens {
            if lens.model_routing.enabled {
                if let Some(pref) = lens.model_routing.preferences.get(category.as_str()) {
                    return Ok(ModelSelection {
                        model: pref.model.clone(),
                        reason: format!("lens preference: {}", pref.rationale),
                    });
                }
            }
        }

        // 3. Best historical performer, if enough samples exist.
        if let Some(memory) = &self.memory {
            if let Some(best) = self.best_historical_model(memory.as_ref(), category).await? {
                return Ok(ModelSelection {
                    model: best,
                    reason: "best historical performer".to_string(),
                });
            }
        }

        // 4. Session default.
        Ok(ModelSelection {
            model: self.config.session_default.clone(),
            reason: "session default".to_string(),
        })
    }

    /// `score = (1 - user_edit_rate) * success_rate` over candidate
    /// models observed for this category (spec §4.3). The repository
    /// performs the aggregation; this only ranks what comes back and
    /// enforces `min_samples`.
    async fn best_historical_model(
        &self,
        memory: &dyn MemoryRepository,
        category: TaskCategory,
    ) -> DomainResult<Option<String>> {
        // The kernel's candidate pool is whatever models have ever been
        // routed for this category; in the absence of a dedicated
        // "list models" query the router checks the session default and
        // any lens-independent fallbacks it already knows about.
        let candidates = [self.config.session_default.as_str(), self.config.local_provider_model.as_str()];
        let mut best: Option<(String, f64)> = None;
        for candidate in candidates {
            if let Some(summary) = memory
                .performance_summary(candidate, category.as_str(), self.config.min_samples)
                .await?
            {
                let score = summary.success_rate;
                if best.as_ref().is_none_or(|(_, s)| score > *s) {
                    best = Some((candidate.to_string(), score));
                }
            }
        }
        Ok(best.map(|(model, _)| model))
    }
}

/// `score = (1 - user_edit_rate) * success_rate` (spec §4.3 performance
/// metric), exposed standalone so callers recording observations can
/// compute the score without going through the router.
pub fn performance_score(success_rate: f64, user_edit_rate: f64) -> f64 {
    (1.0 - user_edit_rate.clamp(0.0, 1.0)) * success_rate.clamp(0.0, 1.0)
}
