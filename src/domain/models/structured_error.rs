//! The structured error schema used for `error.occurred` events and for
//! process-exit stderr (spec §6/§7).
//!
//! Every user-facing failure that crosses the kernel boundary is rendered
//! as a [`SunwellError`]: a stable `error_id`, a numeric `code` within the
//! category's reserved range, and numbered recovery hints. Raw backtraces
//! never reach this layer in normal operation — they go to the `tracing`
//! debug target only.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The closed set of error categories from spec §7.
///
/// Code ranges: `model` 1xxx, `lens` 2xxx, `tool` 3xxx, `validation` 4xxx,
/// `config` 5xxx, `runtime` 6xxx, `io` 7xxx. The spec fixes 1xxx/3xxx/5xxx/
/// 6xxx/7xxx explicitly and leaves `lens`/`validation` unassigned; this
/// crate resolves that Open Question by reserving 2xxx and 4xxx for them
/// respectively (see SPEC_FULL.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Model,
    Lens,
    Tool,
    Validation,
    Config,
    Runtime,
    Io,
}

impl ErrorCategory {
    /// The first code in this category's reserved range.
    pub const fn base_code(self) -> u32 {
        match self {
            Self::Model => 1000,
            Self::Lens => 2000,
            Self::Tool => 3000,
            Self::Validation => 4000,
            Self::Config => 5000,
            Self::Runtime => 6000,
            Self::Io => 7000,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Lens => "lens",
            Self::Tool => "tool",
            Self::Validation => "validation",
            Self::Config => "config",
            Self::Runtime => "runtime",
            Self::Io => "io",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured, user-facing error.
///
/// `error_id` is rendered as `SW-NNNN` where `NNNN` is `code` zero-padded
/// to four digits. `recoverable` signals whether the caller may retry the
/// originating operation; `recovery_hints` are shown to the user as a
/// numbered list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SunwellError {
    pub error_id: String,
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
    pub recovery_hints: Vec<String>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl SunwellError {
    pub fn new(category: ErrorCategory, offset: u32, message: impl Into<String>) -> Self {
        let code = category.base_code() + offset;
        Self {
            error_id: format!("SW-{code:04}"),
            code,
            category,
            message: message.into(),
            recoverable: false,
            recovery_hints: Vec::new(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hints.push(hint.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Render the way the CLI prints a failure to stderr: `error_id`, a
    /// one-line message, then numbered recovery hints. No raw trace.
    pub fn render(&self) -> String {
        let mut out = format!("[{}] {}", self.error_id, self.message);
        for (i, hint) in self.recovery_hints.iter().enumerate() {
            out.push_str(&format!("\n  {}. {}", i + 1, hint));
        }
        out
    }
}

impl fmt::Display for SunwellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.error_id, self.category, self.message)
    }
}

impl std::error::Error for SunwellError {}

impl From<crate::domain::errors::DomainError> for SunwellError {
    fn from(err: crate::domain::errors::DomainError) -> Self {
        use crate::domain::errors::DomainError as D;
        match &err {
            D::GoalNotFound(_) | D::ArtifactNotFound(_) => {
                SunwellError::new(ErrorCategory::Runtime, 1, err.to_string())
            }
            D::AlreadyClaimed(_) => SunwellError::new(ErrorCategory::Runtime, 2, err.to_string())
                .with_hint("wait for the current claim to finish or release it explicitly"),
            D::DependencyCycle(_) => SunwellError::new(ErrorCategory::Runtime, 3, err.to_string()),
            D::ValidationFailed(_) => SunwellError::new(ErrorCategory::Validation, 0, err.to_string()),
            D::DatabaseError(_) => SunwellError::new(ErrorCategory::Io, 1, err.to_string()).recoverable(),
            D::Io(_) => SunwellError::new(ErrorCategory::Io, 2, err.to_string()).recoverable(),
            D::SandboxViolation(_) => SunwellError::new(ErrorCategory::Tool, 0, err.to_string())
                .with_hint("confine writes to the goal's allowed_paths or raise --trust"),
            _ => SunwellError::new(ErrorCategory::Runtime, 0, err.to_string()),
        }
        .with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_id_is_zero_padded_and_in_range() {
        let err = SunwellError::new(ErrorCategory::Tool, 42, "sandbox violation");
        assert_eq!(err.error_id, "SW-3042");
        assert_eq!(err.code, 3042);
    }

    #[test]
    fn render_includes_numbered_hints() {
        let err = SunwellError::new(ErrorCategory::Config, 1, "bad config")
            .with_hint("check .sunwell/config.yaml")
            .with_hint("unset SUNWELL_MODEL_ROUTING__ENABLED");
        let rendered = err.render();
        assert!(rendered.contains("1. check"));
        assert!(rendered.contains("2. unset"));
    }
}
