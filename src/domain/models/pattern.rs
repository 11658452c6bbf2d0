//! Compound reasoning pattern domain models (spec §3, §4.5, §9).
//!
//! The spec's design note observes that the three compound patterns
//! share a uniform contract (question + lens + memory in, a graded
//! answer out) and models them as a tagged variant rather than three
//! unrelated traits. `PatternKind` is that tag; `services::patterns`
//! holds the per-kind `run` implementations.

use serde::{Deserialize, Serialize};

/// Which compound reasoning pattern produced a [`PatternResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    GroundedDebate,
    IterativeRefinement,
    VotingEnsemble,
}

impl PatternKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GroundedDebate => "grounded_debate",
            Self::IterativeRefinement => "iterative_refinement",
            Self::VotingEnsemble => "voting_ensemble",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The signal a pattern's confidence maps to for escalation decisions
/// (spec §4.5): `>= 0.85` is safe to accept outright, `[0.7, 0.85)`
/// warrants a review pass, and `< 0.7` must escalate to a human or a
/// stronger pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSignal {
    Safe,
    Review,
    Uncertain,
}

/// Map a confidence score in `[0, 1]` to its escalation signal.
pub fn confidence_signal(confidence: f64) -> ConfidenceSignal {
    if confidence >= 0.85 {
        ConfidenceSignal::Safe
    } else if confidence >= 0.7 {
        ConfidenceSignal::Review
    } else {
        ConfidenceSignal::Uncertain
    }
}

/// The uniform result contract every compound pattern returns (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternResult {
    pub answer: String,
    /// Confidence in `[0, 1]`. Constructors clamp rather than reject an
    /// out-of-range value, since a misbehaving model call should degrade
    /// the score rather than abort the whole goal.
    pub confidence: f64,
    pub escalate: bool,
    pub pattern_used: PatternKind,
    /// Number of underlying model calls this run consumed, for cost
    /// accounting in the `ExecutionManager`.
    pub calls: usize,
}

impl PatternResult {
    pub fn new(answer: impl Into<String>, confidence: f64, pattern_used: PatternKind, calls: usize) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        let escalate = confidence_signal(confidence) == ConfidenceSignal::Uncertain;
        Self {
            answer: answer.into(),
            confidence,
            escalate,
            pattern_used,
            calls,
        }
    }

    pub fn signal(&self) -> ConfidenceSignal {
        confidence_signal(self.confidence)
    }
}

/// A single round of debate, used by `GroundedDebate` (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateRound {
    pub thesis: String,
    pub antithesis: String,
    pub synthesis: String,
}

/// A single refinement pass, used by `IterativeRefinement` (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementPass {
    pub iteration: u32,
    pub draft: String,
    pub critique: String,
    pub delta_score: f64,
}

/// A single candidate and its votes, used by `VotingEnsemble` (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteCandidate {
    pub source_persona: String,
    pub answer: String,
    pub votes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_signal_thresholds() {
        assert_eq!(confidence_signal(0.9), ConfidenceSignal::Safe);
        assert_eq!(confidence_signal(0.85), ConfidenceSignal::Safe);
        assert_eq!(confidence_signal(0.8), ConfidenceSignal::Review);
        assert_eq!(confidence_signal(0.7), ConfidenceSignal::Review);
        assert_eq!(confidence_signal(0.69), ConfidenceSignal::Uncertain);
    }

    #[test]
    fn pattern_result_escalates_only_when_uncertain() {
        let low = PatternResult::new("maybe", 0.5, PatternKind::VotingEnsemble, 3);
        assert!(low.escalate);

        let high = PatternResult::new("yes", 0.95, PatternKind::GroundedDebate, 2);
        assert!(!high.escalate);
    }

    #[test]
    fn pattern_result_clamps_out_of_range_confidence() {
        let over = PatternResult::new("x", 1.5, PatternKind::IterativeRefinement, 1);
        assert_eq!(over.confidence, 1.0);
        let under = PatternResult::new("x", -0.3, PatternKind::IterativeRefinement, 1);
        assert_eq!(under.confidence, 0.0);
    }

    #[test]
    fn pattern_kind_round_trips_through_as_str() {
        assert_eq!(PatternKind::GroundedDebate.as_str(), "grounded_debate");
        assert_eq!(PatternKind::VotingEnsemble.to_string(), "voting_ensemble");
    }
}
