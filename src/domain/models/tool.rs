//! ToolExecutor domain models (spec §3, §4.7).
//!
//! Trust levels bound what a tool invocation is permitted to do;
//! `ToolResult` is the uniform envelope every invocation returns
//! regardless of trust level or outcome.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Escalating sandbox trust levels (spec §4.7). Ordered so a
/// `TrustLevel` can be compared against a configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// May read files and run read-only commands (`cat`, `grep`, `ls`).
    ReadOnly,
    /// May additionally write within the goal's workspace directory.
    Workspace,
    /// May run arbitrary shell commands. Requires explicit opt-in
    /// (`--trust shell`, spec §6).
    Shell,
}

impl TrustLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::Workspace => "workspace",
            Self::Shell => "shell",
        }
    }

    /// Whether a tool invocation requiring `required` is permitted under
    /// this ceiling.
    pub const fn permits(self, required: Self) -> bool {
        (self as u8) >= (required as u8)
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default wall-clock budget for a single tool invocation (spec §5).
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// The uniform envelope a tool invocation returns (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ToolResult {
    pub fn success(tool: impl Into<String>, stdout: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tool: tool.into(),
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms,
            timed_out: false,
        }
    }

    pub fn timed_out(tool: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tool: tool.into(),
            exit_code: None,
            stdout: String::new(),
            stderr: "tool invocation exceeded its timeout".to_string(),
            duration_ms,
            timed_out: true,
        }
    }

    pub fn ok(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_level_ordering_permits_higher_or_equal() {
        assert!(TrustLevel::Shell.permits(TrustLevel::ReadOnly));
        assert!(TrustLevel::Workspace.permits(TrustLevel::Workspace));
        assert!(!TrustLevel::ReadOnly.permits(TrustLevel::Shell));
    }

    #[test]
    fn tool_result_ok_requires_zero_exit_and_no_timeout() {
        let ok = ToolResult::success("cat", "hello", 5);
        assert!(ok.ok());

        let timed_out = ToolResult::timed_out("grep", 120_000);
        assert!(!timed_out.ok());
    }
}
