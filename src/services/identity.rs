//! IdentityService (spec §3 Identity, §4.10): the two-tier fact/behavior
//! extractor and adaptive digest state machine. Grounded on the
//! teacher's `services::evolution_loop::EvolutionLoop` — both watch a
//! running stream of events, decide when enough has accumulated to
//! justify a rebuild, and persist the result through a repository port
//! — adapted here from template refinement stats to observation
//! extraction and digest synthesis, and on `services::intent_verifier`
//! for the pattern of asking a model to grade its own output against a
//! threshold and rejecting below it.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    GlobalIdentity, Observation, ObservationKind, SessionIdentity, DIGEST_REBUILD_INTERVAL,
};
use crate::domain::ports::IdentityRepository;
use crate::services::event_bus::EventBus;
use crate::services::model_gateway::ModelGateway;
use crate::services::model_router::TaskCategory;

/// Minimum behaviour observations before the first digest is eligible
/// (spec §4.10 trigger (a)).
const MIN_BEHAVIORS_FOR_FIRST_DIGEST: usize = 3;

/// Behaviour observations within the recent window that force a rebuild
/// even if the turn-count trigger hasn't fired yet (spec §4.10 trigger
/// (b)).
const RECENT_BEHAVIOR_BURST: usize = 5;

/// Window, in turns, that trigger (b) looks back over.
const RECENT_BEHAVIOR_WINDOW: usize = 3;

pub struct IdentityService {
    repository: Arc<dyn IdentityRepository>,
    gateway: Option<Arc<ModelGateway>>,
    event_bus: Option<Arc<EventBus>>,
}

impl IdentityService {
    pub fn new(repository: Arc<dyn IdentityRepository>, gateway: Option<Arc<ModelGateway>>, event_bus: Option<Arc<EventBus>>) -> Self {
        Self { repository, gateway, event_bus }
    }

    /// Extract `(facts, behaviors)` from a single user message (spec
    /// §4.10 "two-tier extractor"). Falls back to no observations if
    /// the model's response doesn't parse as the expected JSON shape,
    /// rather than failing the caller's turn over a formatting slip.
    #[tracing::instrument(skip(self, message), err)]
    pub async fn extract(&self, message: &str) -> DomainResult<Vec<Observation>> {
        let Some(gateway) = &self.gateway else {
            return Ok(Vec::new());
        };

        let prompt = format!(
            "Analyse this user message and extract durable facts and behavioural \
             patterns about the user, not the task at hand.\n\n\
             Message: {message}\n\n\
             Respond with ONLY JSON: {{\"facts\": [{{\"content\": string, \
             \"confidence\": 0..1}}], \"behaviors\": [{{\"content\": string, \
             \"confidence\": 0..1}}]}}. Empty arrays are fine if nothing durable \
             was said."
        );

        let response = gateway
            .complete(TaskCategory::Introspection, None, prompt, None)
            .await
            .map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;

        let json = crate::services::extract_json_from_response(&response.content);
        let Ok(parsed) = serde_json::from_str::<ExtractedObservations>(&json) else {
            return Ok(Vec::new());
        };

        let mut observations = Vec::new();
        for draft in parsed.facts {
            observations.push(draft.into_observation(ObservationKind::Fact));
        }
        for draft in parsed.behaviors {
            observations.push(draft.into_observation(ObservationKind::Behavior));
        }

        if let Some(bus) = &self.event_bus {
            for obs in &observations {
                bus.publish(
                    None,
                    crate::domain::models::EventPayload::IdentityObserved {
                        kind: match obs.kind {
                            ObservationKind::Fact => "fact".to_string(),
                            ObservationKind::Behavior => "behavior".to_string(),
                        },
                        confidence: obs.confidence,
                    },
                )
                .await;
            }
        }

        Ok(observations)
    }

    /// Record observations into the session tier, then rebuild the
    /// session digest if one of the adaptive triggers fires (spec
    /// §4.10). `session_end` forces trigger (d) regardless of the
    /// others.
    #[tracing::instrument(skip(self, session, observations), err)]
    pub async fn observe_and_maybe_digest(
        &self,
        session: &mut SessionIdentity,
        observations: Vec<Observation>,
        session_end: bool,
    ) -> DomainResult<()> {
        for obs in observations {
            session.record(obs);
        }

        if !self.digest_due(session, session_end) {
            return Ok(());
        }

        let Some(gateway) = &self.gateway else { return Ok(()) };
        let prompt = build_digest_prompt(session);
        let response = gateway
            .complete(TaskCategory::Introspection, None, prompt, None)
            .await
            .map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;

        let (text, confidence) = parse_digest_response(&response.content);
        if confidence >= crate::domain::models::identity::PROMPT_CONFIDENCE_GATE {
            session.digest = Some(truncate_prompt(&text));
            session.digest_confidence = confidence;
        }
        session.turn_count_at_digest = session.observations.len() as u32;

        self.repository.save_session(session).await
    }

    /// Whether an adaptive digest rebuild is due (spec §4.10: "(a) ≥3
    /// behaviours observed and no digest yet, or (b) 5+ behaviours in
    /// the last 3 turns, or (c) 10 turns since last digest, or (d)
    /// session end").
    fn digest_due(&self, session: &SessionIdentity, session_end: bool) -> bool {
        if session_end {
            return true;
        }
        if session.digest.is_none() && session.behavior_count() >= MIN_BEHAVIORS_FOR_FIRST_DIGEST {
            return true;
        }
        if session.turns_since_digest() >= RECENT_BEHAVIOR_WINDOW && session.behaviors_since_digest() >= RECENT_BEHAVIOR_BURST {
            return true;
        }
        session.turns_since_digest() >= DIGEST_REBUILD_INTERVAL as usize
    }

    /// Fold a session's promotable observations into the durable global
    /// digest on graceful exit, retaining only the most recent
    /// observations in the session record (spec §4.10 "Global identity
    /// receives session learnings on graceful exit (recent 100
    /// observations retained)").
    #[tracing::instrument(skip(self, session), err)]
    pub async fn promote_session(&self, session: &mut SessionIdentity) -> DomainResult<GlobalIdentity> {
        let mut global = self.repository.load_global().await?;
        let added = global.promote(session);

        if let (Some(digest), confidence) = (session.digest.clone(), session.digest_confidence) {
            global.update_prompt(&digest, confidence);
        }

        session.retain_recent();

        self.repository.save_global(&global).await?;
        self.repository.save_session(session).await?;

        if let Some(bus) = &self.event_bus {
            bus.publish(None, crate::domain::models::EventPayload::IdentityPromoted { added }).await;
        }

        Ok(global)
    }

    /// The text to inject into the system prompt, gated on confidence
    /// and length (spec §3 invariant).
    pub async fn system_prompt_fragment(&self) -> DomainResult<Option<String>> {
        Ok(self.repository.load_global().await?.eligible_prompt().map(str::to_string))
    }
}

#[derive(Debug, Deserialize)]
struct ObservationDraft {
    content: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

impl ObservationDraft {
    fn into_observation(self, kind: ObservationKind) -> Observation {
        Observation {
            id: Uuid::new_v4(),
            kind,
            content: self.content,
            confidence: self.confidence.clamp(0.0, 1.0),
            evidence: Vec::new(),
            observed_at: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ExtractedObservations {
    #[serde(default)]
    facts: Vec<ObservationDraft>,
    #[serde(default)]
    behaviors: Vec<ObservationDraft>,
}

fn build_digest_prompt(session: &SessionIdentity) -> String {
    let facts: Vec<&str> = session
        .observations
        .iter()
        .filter(|o| o.kind == ObservationKind::Fact)
        .map(|o| o.content.as_str())
        .collect();
    let behaviors: Vec<&str> = session
        .observations
        .iter()
        .filter(|o| o.kind == ObservationKind::Behavior)
        .map(|o| o.content.as_str())
        .collect();

    format!(
        "Synthesise a short second-person interaction guide (at most 500 \
         characters, addressed to an assistant working with this user) from \
         these observations.\n\nFacts: {facts:?}\nBehaviors: {behaviors:?}\n\n\
         Respond with the guide text on the first line, then a line \
         \"CONFIDENCE: <0..1>\"."
    )
}

fn parse_digest_response(text: &str) -> (String, f64) {
    let mut lines = text.lines();
    let body: Vec<&str> = lines.by_ref().take_while(|l| !l.to_uppercase().starts_with("CONFIDENCE")).collect();
    let guide = body.join(" ").trim().to_string();
    let confidence = text
        .to_uppercase()
        .find("CONFIDENCE")
        .and_then(|idx| text[idx..].split(|c: char| !c.is_ascii_digit() && c != '.').find_map(|t| t.parse::<f64>().ok()))
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    (guide, confidence)
}

fn truncate_prompt(text: &str) -> String {
    if text.len() <= crate::domain::models::identity::MAX_PROMPT_LEN {
        text.to_string()
    } else {
        let mut cut = crate::domain::models::identity::MAX_PROMPT_LEN;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text[..cut].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryIdentityRepo {
        global: Mutex<GlobalIdentity>,
        sessions: Mutex<Vec<SessionIdentity>>,
    }

    #[async_trait]
    impl IdentityRepository for InMemoryIdentityRepo {
        async fn load_global(&self) -> DomainResult<GlobalIdentity> {
            Ok(self.global.lock().unwrap().clone())
        }

        async fn save_global(&self, identity: &GlobalIdentity) -> DomainResult<()> {
            *self.global.lock().unwrap() = identity.clone();
            Ok(())
        }

        async fn save_session(&self, session: &SessionIdentity) -> DomainResult<()> {
            self.sessions.lock().unwrap().push(session.clone());
            Ok(())
        }
    }

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

    #[tokio::test]
    async fn observe_without_gateway_records_but_never_digests() {
        let repo = Arc::new(InMemoryIdentityRepo::default());
        let service = IdentityService::new(repo, None, None);
        let mut session = SessionIdentity::new(Uuid::new_v4());

        let observations = vec![
            obs(ObservationKind::Behavior, "prefers small PRs", 0.9),
            obs(ObservationKind::Behavior, "reviews tests first", 0.9),
            obs(ObservationKind::Behavior, "writes terse commits", 0.9),
        ];
        service.observe_and_maybe_digest(&mut session, observations, false).await.unwrap();
        assert!(session.digest.is_none());
        assert_eq!(session.observations.len(), 3);
    }

    #[tokio::test]
    async fn promote_session_folds_observations_into_global_and_retains_recent() {
        let repo = Arc::new(InMemoryIdentityRepo::default());
        let service = IdentityService::new(repo.clone(), None, None);
        let mut session = SessionIdentity::new(Uuid::new_v4());
        for i in 0..150 {
            session.record(obs(ObservationKind::Fact, &format!("fact-{i}"), 0.9));
        }

        let global = service.promote_session(&mut session).await.unwrap();
        assert_eq!(global.facts.len(), 150);
        assert_eq!(session.observations.len(), 100);
        assert_eq!(session.observations.last().unwrap().content, "fact-149");
    }

    #[tokio::test]
    async fn system_prompt_fragment_is_none_below_confidence_gate() {
        let repo = Arc::new(InMemoryIdentityRepo::default());
        repo.global.lock().unwrap().update_prompt("be terse and direct", 0.4);
        let service = IdentityService::new(repo, None, None);
        assert!(service.system_prompt_fragment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn system_prompt_fragment_is_some_above_confidence_gate() {
        let repo = Arc::new(InMemoryIdentityRepo::default());
        repo.global.lock().unwrap().update_prompt("be terse and direct with this user", 0.8);
        let service = IdentityService::new(repo, None, None);
        assert_eq!(
            service.system_prompt_fragment().await.unwrap().as_deref(),
            Some("be terse and direct with this user")
        );
    }

    #[test]
    fn digest_prompt_response_parses_guide_and_confidence() {
        let response = "Be concise and prefer small diffs.\nCONFIDENCE: 0.82";
        let (guide, confidence) = parse_digest_response(response);
        assert_eq!(guide, "Be concise and prefer small diffs.");
        assert!((confidence - 0.82).abs() < 1e-9);
    }

    #[test]
    fn digest_due_fires_on_first_three_behaviors() {
        let repo = Arc::new(InMemoryIdentityRepo::default());
        let service = IdentityService::new(repo, None, None);
        let mut session = SessionIdentity::new(Uuid::new_v4());
        session.record(obs(ObservationKind::Behavior, "a", 0.9));
        session.record(obs(ObservationKind::Behavior, "b", 0.9));
        assert!(!service.digest_due(&session, false));
        session.record(obs(ObservationKind::Behavior, "c", 0.9));
        assert!(service.digest_due(&session, false));
    }

    #[test]
    fn digest_due_forced_on_session_end() {
        let repo = Arc::new(InMemoryIdentityRepo::default());
        let service = IdentityService::new(repo, None, None);
        let session = SessionIdentity::new(Uuid::new_v4());
        assert!(service.digest_due(&session, true));
    }
}
