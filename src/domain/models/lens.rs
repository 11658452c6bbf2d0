//! Lens: the domain-expertise container (spec §3, §6).
//!
//! A Lens is a read-only value object — immutable per session — passed
//! into compound patterns. Patterns contain no domain logic of their own;
//! all heuristics, personas, and validators live here. Parsed from the
//! YAML file described in spec §6.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single heuristic principle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Heuristic {
    pub name: String,
    pub rule: String,
    #[serde(default)]
    pub always: Vec<String>,
    #[serde(default)]
    pub never: Vec<String>,
    #[serde(default)]
    pub examples: HeuristicExamples,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

const fn default_priority() -> u8 {
    5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeuristicExamples {
    #[serde(default)]
    pub good: Vec<String>,
    #[serde(default)]
    pub bad: Vec<String>,
}

/// A persona used to generate a perspective (thesis, antithesis, or a
/// voting-ensemble candidate).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub friction_points: Vec<String>,
    /// Exploited by `GroundedDebate`'s antithesis step (spec §4.5) to
    /// generate a structured critique.
    #[serde(default)]
    pub attack_vectors: Vec<String>,
    /// Tie-break order for `VotingEnsemble` (spec §4.5): lower is earlier.
    #[serde(default)]
    pub priority: u8,
}

/// A deterministic (code-executed) validator identifier, e.g. a lint or
/// test command. The kernel treats these as opaque names resolved by the
/// ToolExecutor; validation semantics for this spec focus on the
/// heuristic validators below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeterministicValidator {
    pub name: String,
    pub command: String,
}

/// A heuristic (LLM-graded) validator: a rule evaluated by a model call
/// rather than executed code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeuristicValidator {
    pub name: String,
    pub rule: String,
    #[serde(default = "default_threshold")]
    pub pass_threshold: f64,
}

const fn default_threshold() -> f64 {
    0.7
}

/// A refiner: a named post-processing pass applied after synthesis
/// (e.g. "tighten prose", "strip TODOs").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Refiner {
    pub name: String,
    pub instruction: String,
}

/// A named multi-step workflow template the planner can consult.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<String>,
}

/// Metadata describing the Lens itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LensMetadata {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
}

/// Per-category model routing preference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPreference {
    pub model: String,
    #[serde(default)]
    pub rationale: String,
}

/// Privacy configuration: categories that must never route to a cloud
/// provider (spec §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrivacyConfig {
    #[serde(default)]
    pub local_only: bool,
    #[serde(default)]
    pub keep_local: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRoutingLensConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub preferences: HashMap<String, ModelPreference>,
    #[serde(default)]
    pub privacy: PrivacyConfig,
}

/// Domain expertise container, immutable per session (spec §3, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lens {
    #[serde(default)]
    pub metadata: LensMetadata,
    #[serde(default)]
    pub heuristics: Vec<Heuristic>,
    #[serde(default)]
    pub anti_heuristics: Vec<Heuristic>,
    #[serde(default)]
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub deterministic_validators: Vec<DeterministicValidator>,
    #[serde(default)]
    pub heuristic_validators: Vec<HeuristicValidator>,
    /// Methodology name consulted by the planner and by `GroundedDebate`'s
    /// synthesis step, when present.
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub refiners: Vec<Refiner>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub model_routing: ModelRoutingLensConfig,
}

impl Lens {
    /// Parse a Lens from its on-disk YAML representation (spec §6).
    pub fn from_yaml(input: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(input)
    }

    /// Personas sorted by tie-break priority ascending (spec §4.5 voting
    /// ensemble tie-break order).
    pub fn personas_by_priority(&self) -> Vec<&Persona> {
        let mut personas: Vec<&Persona> = self.personas.iter().collect();
        personas.sort_by_key(|p| p.priority);
        personas
    }

    /// Heuristics sorted by descending priority (highest priority first).
    pub fn heuristics_by_priority(&self) -> Vec<&Heuristic> {
        let mut heuristics: Vec<&Heuristic> = self.heuristics.iter().collect();
        heuristics.sort_by(|a, b| b.priority.cmp(&a.priority));
        heuristics
    }

    /// A persona carrying attack vectors, used for `GroundedDebate`'s
    /// antithesis step. Falls back to the first persona if none declare
    /// attack vectors explicitly.
    pub fn antagonist(&self) -> Option<&Persona> {
        self.personas
            .iter()
            .find(|p| !p.attack_vectors.is_empty())
            .or_else(|| self.personas.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_lens_yaml() {
        let yaml = r#"
metadata:
  name: test-lens
heuristics:
  - name: dry
    rule: Don't repeat yourself
    priority: 8
personas:
  - name: skeptic
    description: challenges assumptions
    attack_vectors: ["edge cases", "race conditions"]
    priority: 1
"#;
        let lens = Lens::from_yaml(yaml).unwrap();
        assert_eq!(lens.metadata.name, "test-lens");
        assert_eq!(lens.heuristics.len(), 1);
        assert_eq!(lens.antagonist().unwrap().name, "skeptic");
    }

    #[test]
    fn heuristics_sort_by_descending_priority() {
        let mut lens = Lens::default();
        lens.heuristics.push(Heuristic {
            name: "low".into(),
            priority: 2,
            ..Default::default()
        });
        lens.heuristics.push(Heuristic {
            name: "high".into(),
            priority: 9,
            ..Default::default()
        });
        let sorted = lens.heuristics_by_priority();
        assert_eq!(sorted[0].name, "high");
    }

    #[test]
    fn personas_sort_ascending_for_tiebreak() {
        let mut lens = Lens::default();
        lens.personas.push(Persona {
            name: "b".into(),
            priority: 2,
            ..Default::default()
        });
        lens.personas.push(Persona {
            name: "a".into(),
            priority: 1,
            ..Default::default()
        });
        let sorted = lens.personas_by_priority();
        assert_eq!(sorted[0].name, "a");
    }
}
