//! Domain errors for the Sunwell execution kernel.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur while operating on goals, artifacts,
/// and the backlog ledger.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("goal not found: {0}")]
    GoalNotFound(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(Uuid),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("artifact dependency cycle detected involving: {0:?}")]
    DependencyCycle(Vec<Uuid>),

    #[error("goal {0} is already claimed")]
    AlreadyClaimed(String),

    #[error("lens validation failed: {0}")]
    ValidationFailed(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("sandbox violation: {0}")]
    SandboxViolation(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}
