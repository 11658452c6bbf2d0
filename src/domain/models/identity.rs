//! Identity / Mirror domain models (spec §3, §4.9, §4.10).
//!
//! Identity is split into a per-session tier (facts observed this run,
//! discarded at exit unless promoted) and a global tier (the durable
//! digest a future session loads). Promotion is confidence-gated so a
//! single noisy observation never corrupts the long-lived profile.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of thing an [`Observation`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    /// A concrete, checkable fact ("uses pytest", "targets Python 3.12").
    Fact,
    /// A recurring behavioral pattern ("prefers small PRs", "reviews
    /// tests before implementation").
    Behavior,
}

/// A single observation made during a session, before promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub kind: ObservationKind,
    pub content: String,
    /// Confidence in `[0, 1]` that this observation is accurate and
    /// durable rather than a one-off.
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub observed_at: chrono::DateTime<chrono::Utc>,
}

/// Minimum confidence an observation must clear to be folded into the
/// global digest (spec §4.9 "confidence-gated").
pub const PROMOTION_THRESHOLD: f64 = 0.75;

impl Observation {
    pub fn eligible_for_promotion(&self) -> bool {
        self.confidence >= PROMOTION_THRESHOLD
    }
}

/// Number of most-recent observations retained in the session record
/// once it is folded into global identity on exit (spec §4.9 "recent
/// 100 observations retained").
pub const RETAINED_OBSERVATIONS: usize = 100;

/// The per-session identity tier: observations made this run, not yet
/// reconciled with the global digest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: Uuid,
    pub observations: Vec<Observation>,
    /// Short second-person interaction guide rebuilt by the adaptive
    /// digest (spec §3/§4.9); `None` until the first digest fires.
    pub digest: Option<String>,
    pub digest_confidence: f64,
    /// Observation count as of the last digest rebuild, used to decide
    /// whether enough new behaviour has accumulated to justify another
    /// rebuild (spec §4.9 adaptive triggers).
    pub turn_count_at_digest: u32,
    /// The prior session this one inherited its opening digest from, if
    /// any (spec §3 "inherits_from pointer").
    pub inherits_from: Option<Uuid>,
}

impl SessionIdentity {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            observations: Vec::new(),
            digest: None,
            digest_confidence: 0.0,
            turn_count_at_digest: 0,
            inherits_from: None,
        }
    }

    pub fn record(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    /// Number of behaviour observations recorded since the last digest
    /// rebuild (spec §4.9 "5+ behaviours in the last 3 turns").
    pub fn behaviors_since_digest(&self) -> usize {
        self.observations
            .iter()
            .skip(self.turn_count_at_digest as usize)
            .filter(|o| o.kind == ObservationKind::Behavior)
            .count()
    }

    /// Total behaviour observations recorded this session, regardless
    /// of digest state (spec §4.9 "≥3 behaviours observed and no digest
    /// yet").
    pub fn behavior_count(&self) -> usize {
        self.observations.iter().filter(|o| o.kind == ObservationKind::Behavior).count()
    }

    /// Turns elapsed since the last digest rebuild (spec §4.9 "10 turns
    /// since last digest").
    pub fn turns_since_digest(&self) -> usize {
        self.observations.len().saturating_sub(self.turn_count_at_digest as usize)
    }

    /// Observations that clear [`PROMOTION_THRESHOLD`], in the order
    /// they were recorded.
    pub fn promotable(&self) -> Vec<&Observation> {
        self.observations
            .iter()
            .filter(|o| o.eligible_for_promotion())
            .collect()
    }

    /// Drop all but the most recent [`RETAINED_OBSERVATIONS`] entries
    /// (spec §4.9 "recent 100 observations retained" on graceful exit).
    pub fn retain_recent(&mut self) {
        let len = self.observations.len();
        if len > RETAINED_OBSERVATIONS {
            self.observations.drain(0..len - RETAINED_OBSERVATIONS);
        }
    }
}

/// Minimum confidence (and minimum length) a digest must clear before
/// it is eligible for injection into the system prompt (spec §3
/// "confidence gate").
pub const PROMPT_CONFIDENCE_GATE: f64 = 0.6;

/// Prompts longer than this are truncated before storage (spec §3
/// "length <= 500 chars").
pub const MAX_PROMPT_LEN: usize = 500;

/// The durable, cross-session identity digest (spec §3 Identity).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalIdentity {
    /// Cumulative second-person interaction guide, rebuilt whenever a
    /// session's digest is promoted (spec §3 "cumulative prompt").
    pub prompt: String,
    pub prompt_confidence: f64,
    pub facts: Vec<String>,
    pub behaviors: Vec<String>,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
    /// Count of sessions that have contributed to this digest; used to
    /// decide whether an adaptive re-digest is due (spec §4.9).
    pub session_count: u32,
}

impl GlobalIdentity {
    /// The prompt text to inject into the system prompt, or `None` if
    /// it fails the confidence/length gate (spec §3 "Confidence gate:
    /// identity prompt injected into the system prompt ⇔ confidence ≥
    /// 0.6 ∧ len(prompt) ≥ 10").
    pub fn eligible_prompt(&self) -> Option<&str> {
        if self.prompt_confidence >= PROMPT_CONFIDENCE_GATE && self.prompt.len() >= 10 {
            Some(&self.prompt)
        } else {
            None
        }
    }

    /// Replace the cumulative prompt, truncating to [`MAX_PROMPT_LEN`]
    /// and rejecting below [`PROMPT_CONFIDENCE_GATE`] (spec §4.9 "the
    /// digest ... rejected if confidence < 0.6").
    pub fn update_prompt(&mut self, prompt: &str, confidence: f64) -> bool {
        if confidence < PROMPT_CONFIDENCE_GATE {
            return false;
        }
        let mut truncated = prompt.trim().to_string();
        if truncated.len() > MAX_PROMPT_LEN {
            let mut cut = MAX_PROMPT_LEN;
            while cut > 0 && !truncated.is_char_boundary(cut) {
                cut -= 1;
            }
            truncated.truncate(cut);
        }
        self.prompt = truncated;
        self.prompt_confidence = confidence;
        true
    }
}

/// Number of sessions between adaptive digest rebuilds (spec §4.9).
pub const DIGEST_REBUILD_INTERVAL: u32 = 10;

impl GlobalIdentity {
    /// Fold a session's promotable observations into the digest,
    /// deduplicating by exact content match. Returns the number of new
    /// entries actually added.
    pub fn promote(&mut self, session: &SessionIdentity) -> usize {
        let mut added = 0;
        for obs in session.promotable() {
            let bucket = match obs.kind {
                ObservationKind::Fact => &mut self.facts,
                ObservationKind::Behavior => &mut self.behaviors,
            };
            if !bucket.iter().any(|existing| existing == &obs.content) {
                bucket.push(obs.content.clone());
                added += 1;
            }
        }
        self.session_count += 1;
        self.last_updated = Some(chrono::Utc::now());
        added
    }

    /// Whether this digest is due for a full rebuild rather than an
    /// incremental fold (spec §4.9 adaptive trigger).
    pub fn due_for_rebuild(&self) -> bool {
        self.session_count > 0 && self.session_count % DIGEST_REBUILD_INTERVAL == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(kind: ObservationKind, content: &str, confidence: f64) -> Observation {
        Observation {
            id: Uuid::new_v4(),
            kind,
            content: content.to_string(),
            confidence,
            evidence: Vec::new(),
            observed_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn low_confidence_observations_are_not_promotable() {
        let mut session = SessionIdentity::new(Uuid::new_v4());
        session.record(obs(ObservationKind::Fact, "uses rust", 0.5));
        assert!(session.promotable().is_empty());
    }

    #[test]
    fn high_confidence_observations_fold_into_digest() {
        let mut session = SessionIdentity::new(Uuid::new_v4());
        session.record(obs(ObservationKind::Fact, "targets edition 2021", 0.9));
        let mut digest = GlobalIdentity::default();
        let added = digest.promote(&session);
        assert_eq!(added, 1);
        assert_eq!(digest.facts, vec!["targets edition 2021"]);
    }

    #[test]
    fn promote_deduplicates_repeated_facts() {
        let mut session = SessionIdentity::new(Uuid::new_v4());
        session.record(obs(ObservationKind::Fact, "uses pytest", 0.9));
        let mut digest = GlobalIdentity::default();
        digest.promote(&session);
        let added_again = digest.promote(&session);
        assert_eq!(added_again, 0);
        assert_eq!(digest.facts.len(), 1);
    }

    #[test]
    fn rebuild_due_every_tenth_session() {
        let mut digest = GlobalIdentity::default();
        for _ in 0..9 {
            digest.session_count += 1;
            assert!(!digest.due_for_rebuild());
        }
        digest.session_count += 1;
        assert!(digest.due_for_rebuild());
    }
}
