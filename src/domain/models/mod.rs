//! Pure domain types: no I/O, no async, no knowledge of sqlx/figment/
//! tracing. Everything here is constructed, validated, and tested in
//! isolation; the `services` layer is what gives these types behavior
//! against the outside world.

pub mod artifact;
pub mod config;
pub mod event;
pub mod goal;
pub mod identity;
pub mod lens;
pub mod memory;
pub mod pattern;
pub mod structured_error;
pub mod tool;

pub use artifact::{Artifact, ArtifactDag, DomainType};
pub use config::Config;
pub use event::{EventCategory, EventId, EventPayload, EventSeverity, SequenceCounter, SequenceNumber, UnifiedEvent};
pub use goal::{CompletionEntry, Goal, GoalMetadata, GoalPriority, GoalResult, GoalScope, SINGLE_INSTANCE_WORKER};
pub use identity::{
    GlobalIdentity, Observation, ObservationKind, SessionIdentity, DIGEST_REBUILD_INTERVAL, PROMOTION_THRESHOLD,
    RETAINED_OBSERVATIONS,
};
pub use lens::Lens;
pub use memory::{CooccurrenceEdge, Entity, EpisodicAttempt, Learning, MemoryContext, ModelObservation, RagPassage};
pub use pattern::{ConfidenceSignal, PatternKind, PatternResult};
pub use structured_error::{ErrorCategory, SunwellError};
pub use tool::{ToolResult, TrustLevel};
