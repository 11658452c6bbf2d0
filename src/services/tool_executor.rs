//! ToolExecutor (spec §4.7): runs a single task's tool requests under a
//! trust policy. Grounded on the teacher's `application::agent_executor`
//! — timeout-wrapped execution with a uniform result envelope — adapted
//! from Claude-API/MCP calls to shell commands and filesystem writes,
//! and extended with the path-sandboxing and output-truncation rules
//! spec §4.7 requires that agent_executor didn't need.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ToolResult, TrustLevel, DEFAULT_TOOL_TIMEOUT};

/// Output is truncated past this many bytes per stream (spec §4.7 "total
/// output truncation at a configured byte budget").
const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

pub struct ToolExecutorConfig {
    pub trust_level: TrustLevel,
    pub allowed_paths: Vec<PathBuf>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ToolExecutorConfig {
    fn default() -> Self {
        Self {
            trust_level: TrustLevel::ReadOnly,
            allowed_paths: Vec::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Executes tool requests (shell commands, file reads/writes) under a
/// [`TrustLevel`] ceiling, enforcing path restrictions, per-invocation
/// timeouts, and output truncation (spec §4.7).
pub struct ToolExecutor {
    config: ToolExecutorConfig,
}

impl ToolExecutor {
    pub fn new(config: ToolExecutorConfig) -> Self {
        Self { config }
    }

    pub fn trust_level(&self) -> TrustLevel {
        self.config.trust_level
    }

    /// Reject a path outside `allowed_paths` with a sandbox-style error
    /// (spec §4.7 "writes outside are rejected with a SANDBOX-style
    /// error"). Empty `allowed_paths` means no sandbox is configured and
    /// every path is permitted — the ceiling is `trust_level` alone.
    fn check_allowed(&self, path: &Path) -> DomainResult<()> {
        if self.config.allowed_paths.is_empty() {
            return Ok(());
        }
        let within = self.config.allowed_paths.iter().any(|root| path.starts_with(root));
        if within {
            Ok(())
        } else {
            Err(DomainError::SandboxViolation(format!(
                "{} is outside the allowed workspace paths",
                path.display()
            )))
        }
    }

    fn require_trust(&self, required: TrustLevel, tool: &str) -> DomainResult<()> {
        if self.config.trust_level.permits(required) {
            Ok(())
        } else {
            Err(DomainError::SandboxViolation(format!(
                "{tool} requires {required} trust but executor is capped at {}",
                self.config.trust_level
            )))
        }
    }

    /// Read a file. Requires `ReadOnly` trust (the floor every level
    /// grants) and that the path falls under `allowed_paths` when one is
    /// configured.
    #[tracing::instrument(skip(self), fields(tool = "read_file"), err)]
    pub async fn read_file(&self, path: &Path) -> DomainResult<ToolResult> {
        self.require_trust(TrustLevel::ReadOnly, "read_file")?;
        self.check_allowed(path)?;
        let start = Instant::now();
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(ToolResult::success("read_file", truncate(&contents, self.config.max_output_bytes), elapsed_ms(start))),
            Err(e) => Ok(ToolResult {
                tool: "read_file".to_string(),
                exit_code: Some(1),
                stdout: String::new(),
                stderr: e.to_string(),
                duration_ms: elapsed_ms(start),
                timed_out: false,
            }),
        }
    }

    /// Write a file. Requires `Workspace` trust and an allowed path
    /// (spec §4.7).
    #[tracing::instrument(skip(self, contents), fields(tool = "write_file"), err)]
    pub async fn write_file(&self, path: &Path, contents: &str) -> DomainResult<ToolResult> {
        self.require_trust(TrustLevel::Workspace, "write_file")?;
        self.check_allowed(path)?;
        let start = Instant::now();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(DomainError::from)?;
            }
        }
        match tokio::fs::write(path, contents).await {
            Ok(()) => Ok(ToolResult::success("write_file", format!("wrote {} bytes", contents.len()), elapsed_ms(start))),
            Err(e) => Ok(ToolResult {
                tool: "write_file".to_string(),
                exit_code: Some(1),
                stdout: String::new(),
                stderr: e.to_string(),
                duration_ms: elapsed_ms(start),
                timed_out: false,
            }),
        }
    }

    /// Run a shell command. Requires `Shell` trust (spec §6 "`--trust
    /// shell`"). Enforces the configured per-invocation timeout and
    /// truncates combined stdout/stderr at `max_output_bytes`.
    #[tracing::instrument(skip(self, args), fields(tool = %program), err)]
    pub async fn run_command(&self, program: &str, args: &[String], cwd: Option<&Path>) -> DomainResult<ToolResult> {
        self.require_trust(TrustLevel::Shell, program)?;
        if let Some(dir) = cwd {
            self.check_allowed(dir)?;
        }

        let start = Instant::now();
        let mut command = Command::new(program);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;
        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();

        // Read stdout/stderr on their own tasks so `child` itself stays
        // owned here, reachable for a kill if the wait below times out.
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut h) = stdout_handle {
                let _ = h.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut h) = stderr_handle {
                let _ = h.read_to_end(&mut buf).await;
            }
            buf
        });

        match tokio::time::timeout(self.config.timeout, child.wait()).await {
            Ok(status) => {
                let status = status.map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;
                let stdout_buf = stdout_task.await.unwrap_or_default();
                let stderr_buf = stderr_task.await.unwrap_or_default();
                let stdout = truncate(&String::from_utf8_lossy(&stdout_buf), self.config.max_output_bytes);
                let stderr = truncate(&String::from_utf8_lossy(&stderr_buf), self.config.max_output_bytes);
                Ok(ToolResult {
                    tool: program.to_string(),
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    duration_ms: elapsed_ms(start),
                    timed_out: false,
                })
            }
            Err(_) => {
                // Timeout elapsed with the process still running: kill it
                // so it doesn't linger as an orphan (spec §4.7 "timeouts
                // on every external process" bounds the process itself,
                // not just the wait). `kill_on_drop` above is a backstop
                // for the same case if this future itself were dropped.
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                Ok(ToolResult::timed_out(program, elapsed_ms(start)))
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        s.to_string()
    } else {
        let mut cut = max_bytes;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}\n...[truncated, {} bytes total]", &s[..cut], s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn executor(trust: TrustLevel, allowed: Vec<PathBuf>) -> ToolExecutor {
        ToolExecutor::new(ToolExecutorConfig {
            trust_level: trust,
            allowed_paths: allowed,
            timeout: Duration::from_secs(5),
            max_output_bytes: 1024,
        })
    }

    #[tokio::test]
    async fn read_only_executor_rejects_write() {
        let dir = tempdir().unwrap();
        let exec = executor(TrustLevel::ReadOnly, vec![dir.path().to_path_buf()]);
        let result = exec.write_file(&dir.path().join("x.txt"), "hi").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn workspace_executor_writes_and_reads_back() {
        let dir = tempdir().unwrap();
        let exec = executor(TrustLevel::Workspace, vec![dir.path().to_path_buf()]);
        let path = dir.path().join("hello.txt");
        let write = exec.write_file(&path, "hello world").await.unwrap();
        assert!(write.ok());

        let read = exec.read_file(&path).await.unwrap();
        assert!(read.stdout.contains("hello world"));
    }

    #[tokio::test]
    async fn write_outside_allowed_paths_is_sandbox_violation() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let exec = executor(TrustLevel::Workspace, vec![dir.path().to_path_buf()]);
        let result = exec.write_file(&outside.path().join("escape.txt"), "nope").await;
        assert!(matches!(result, Err(DomainError::SandboxViolation(_))));
    }

    #[tokio::test]
    async fn shell_executor_runs_command() {
        let exec = executor(TrustLevel::Shell, Vec::new());
        let result = exec.run_command("echo", &["hi".to_string()], None).await.unwrap();
        assert!(result.ok());
        assert!(result.stdout.contains("hi"));
    }

    #[tokio::test]
    async fn non_shell_executor_rejects_command() {
        let exec = executor(TrustLevel::Workspace, Vec::new());
        let result = exec.run_command("echo", &["hi".to_string()], None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn command_exceeding_timeout_is_marked_timed_out() {
        let mut config = ToolExecutorConfig {
            trust_level: TrustLevel::Shell,
            allowed_paths: Vec::new(),
            timeout: Duration::from_millis(50),
            max_output_bytes: 1024,
        };
        config.timeout = Duration::from_millis(50);
        let exec = ToolExecutor::new(config);
        let result = exec.run_command("sleep", &["5".to_string()], None).await.unwrap();
        assert!(result.timed_out);
    }

    #[test]
    fn truncate_cuts_long_output_and_notes_total_size() {
        let long = "a".repeat(2000);
        let out = truncate(&long, 100);
        assert!(out.len() < 2000);
        assert!(out.contains("truncated"));
    }
}
