//! EventBus envelope and payload taxonomy (spec §3, §4.1).
//!
//! Every subsystem announces state transitions through one broadcast
//! channel rather than calling into each other directly. `UnifiedEvent`
//! is the envelope; `EventPayload` is the closed set of event kinds a
//! subscriber can match on. Modeled as a tagged variant the same way
//! the convergence engine's event taxonomy is, since both describe a
//! single append-only stream fanned out to many listeners.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Monotonic, process-wide event ordinal. Used to detect gaps or
/// reordering in a subscriber's view of the stream (spec §8 "event
/// ordering" property).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub fn next(&self) -> SequenceNumber {
        SequenceNumber(self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// Opaque event identifier, distinct from its sequence number so events
/// replayed from storage keep a stable identity even if re-sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Goal,
    Artifact,
    Pattern,
    Memory,
    Model,
    Tool,
    Mirror,
    Identity,
    Error,
}

/// The closed set of kernel event kinds (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    GoalAdded { goal_id: String },
    GoalClaimed { goal_id: String, claimed_by: i64 },
    GoalStarted { goal_id: String },
    GoalUnclaimed { goal_id: String },
    /// `partial` mirrors [`crate::domain::models::GoalResult::partial`]:
    /// true when some but not all planned artifacts were produced.
    GoalCompleted { goal_id: String, success: bool, partial: bool },
    GoalFailed { goal_id: String, reason: String },
    /// The backlog's pending set changed shape (goals added, reclaimed,
    /// or externally edited) independent of any single goal's lifecycle.
    BacklogRefreshed { pending_count: usize },

    ArtifactPlanned { goal_id: String, artifact_id: Uuid },
    ArtifactStarted { artifact_id: Uuid },
    ArtifactCompleted { artifact_id: Uuid },
    ArtifactFailed { artifact_id: Uuid, reason: String },

    PatternInvoked { pattern: String, goal_id: String },
    PatternCompleted { pattern: String, confidence: f64, escalate: bool },
    /// A deterministic or heuristic validator attached to the active
    /// Lens rejected the current artifact/draft.
    GateFail { validator: String, goal_id: String, reason: String },

    MemoryStored { tier: String, key: String },
    MemoryRetrieved { tier: String, key: String, hit: bool },
    EpisodicShortCircuit { goal_id: String, similarity: f64 },

    ModelCallStarted { provider: String, model: String, category: String },
    ModelCallCompleted { provider: String, model: String, latency_ms: u64, success: bool },
    ModelCallFailed { provider: String, model: String, reason: String },
    ModelRouteSelected { model: String, reason: String },

    ToolInvoked { tool: String, trust_level: String },
    ToolCompleted { tool: String, exit_code: Option<i32> },
    ToolTimedOut { tool: String },

    MirrorAnalysisStarted { target: String },
    MirrorChangeProposed { target: String, summary: String },
    MirrorChangeApplied { target: String },
    MirrorValidationFailed { target: String, reason: String },

    IdentityObserved { kind: String, confidence: f64 },
    IdentityPromoted { added: usize },

    ErrorOccurred { error_id: String, category: String, message: String },
}

impl EventPayload {
    pub const fn category(&self) -> EventCategory {
        match self {
            Self::GoalAdded { .. }
            | Self::GoalClaimed { .. }
            | Self::GoalStarted { .. }
            | Self::GoalUnclaimed { .. }
            | Self::GoalCompleted { .. }
            | Self::GoalFailed { .. }
            | Self::BacklogRefreshed { .. } => EventCategory::Goal,

            Self::ArtifactPlanned { .. }
            | Self::ArtifactStarted { .. }
            | Self::ArtifactCompleted { .. }
            | Self::ArtifactFailed { .. } => EventCategory::Artifact,

            Self::PatternInvoked { .. } | Self::PatternCompleted { .. } | Self::GateFail { .. } => {
                EventCategory::Pattern
            }

            Self::MemoryStored { .. } | Self::MemoryRetrieved { .. } | Self::EpisodicShortCircuit { .. } => {
                EventCategory::Memory
            }

            Self::ModelCallStarted { .. }
            | Self::ModelCallCompleted { .. }
            | Self::ModelCallFailed { .. }
            | Self::ModelRouteSelected { .. } => EventCategory::Model,

            Self::ToolInvoked { .. } | Self::ToolCompleted { .. } | Self::ToolTimedOut { .. } => EventCategory::Tool,

            Self::MirrorAnalysisStarted { .. }
            | Self::MirrorChangeProposed { .. }
            | Self::MirrorChangeApplied { .. }
            | Self::MirrorValidationFailed { .. } => EventCategory::Mirror,

            Self::IdentityObserved { .. } | Self::IdentityPromoted { .. } => EventCategory::Identity,

            Self::ErrorOccurred { .. } => EventCategory::Error,
        }
    }

    pub const fn default_severity(&self) -> EventSeverity {
        match self {
            Self::GoalFailed { .. }
            | Self::ArtifactFailed { .. }
            | Self::ToolTimedOut { .. }
            | Self::MirrorValidationFailed { .. }
            | Self::GateFail { .. }
            | Self::ModelCallFailed { .. }
            | Self::ErrorOccurred { .. } => EventSeverity::Error,
            Self::EpisodicShortCircuit { .. } | Self::MirrorChangeProposed { .. } => EventSeverity::Warn,
            _ => EventSeverity::Info,
        }
    }
}

/// The envelope every subscriber receives off the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedEvent {
    pub id: EventId,
    pub sequence: SequenceNumber,
    pub category: EventCategory,
    pub severity: EventSeverity,
    pub payload: EventPayload,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl UnifiedEvent {
    pub fn new(sequence: SequenceNumber, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            sequence,
            category: payload.category(),
            severity: payload.default_severity(),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_counter_is_monotonic() {
        let counter = SequenceCounter::default();
        let a = counter.next();
        let b = counter.next();
        assert!(b.0 > a.0);
    }

    #[test]
    fn payload_category_matches_family() {
        let payload = EventPayload::GoalClaimed {
            goal_id: "g-1".into(),
            claimed_by: -1,
        };
        assert_eq!(payload.category(), EventCategory::Goal);
    }

    #[test]
    fn goal_completed_carries_partial_flag() {
        let payload = EventPayload::GoalCompleted {
            goal_id: "g-1".into(),
            success: true,
            partial: true,
        };
        assert_eq!(payload.category(), EventCategory::Goal);
        assert_eq!(payload.default_severity(), EventSeverity::Info);
    }

    #[test]
    fn failure_payloads_default_to_error_severity() {
        let payload = EventPayload::ArtifactFailed {
            artifact_id: Uuid::new_v4(),
            reason: "timeout".into(),
        };
        assert_eq!(payload.default_severity(), EventSeverity::Error);
    }

    #[test]
    fn unified_event_derives_category_and_severity_from_payload() {
        let counter = SequenceCounter::default();
        let event = UnifiedEvent::new(
            counter.next(),
            EventPayload::EpisodicShortCircuit {
                goal_id: "g-1".into(),
                similarity: 0.94,
            },
        );
        assert_eq!(event.category, EventCategory::Memory);
        assert_eq!(event.severity, EventSeverity::Warn);
    }
}
