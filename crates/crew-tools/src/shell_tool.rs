//! Shell execution tool.
//!
//! Runs commands with the worktree as the working directory, a
//! configurable timeout, and per-invocation risk classification:
//! destructive commands are refused before any process is spawned.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crew_core::tools::registry::{RiskTier, Tool, ToolError};

use crate::risk::{classify_command, destructive_pattern};

/// Default timeout in seconds when none is specified.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Maximum allowed timeout in seconds.
const MAX_TIMEOUT_SECS: u64 = 600;

/// Execute shell commands with safety guardrails.
pub struct ShellTool {
    workdir: PathBuf,
    default_timeout: u64,
}

impl ShellTool {
    /// Create a shell tool running in `workdir` (the sandbox root).
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            default_timeout: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Override the default timeout (tests).
    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout = secs;
        self
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "exec_shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the worktree and return its output. Destructive commands are refused."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (default 120, max 600)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: command".into()))?;

        let timeout_secs = args
            .get("timeout")
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
            .unwrap_or(self.default_timeout)
            .min(MAX_TIMEOUT_SECS);

        // Reclassify per invocation; refuse before spawning.
        if classify_command(command) == RiskTier::Destructive {
            let pattern = destructive_pattern(command).unwrap_or("destructive pattern");
            warn!(command, pattern, "destructive command refused");
            return Err(ToolError::Refused(format!("matched '{pattern}'")));
        }

        debug!(command, timeout_secs, "executing shell command");
        let start = Instant::now();

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to spawn: {e}")))?;

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();

        let wait_result = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            child.wait(),
        )
        .await;

        let status = match wait_result {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed(format!("process error: {e}")));
            }
            Err(_) => {
                let _ = child.kill().await;
                // Deadline exceeded is reported distinctly from a
                // non-zero exit.
                return Err(ToolError::Timeout(timeout_secs));
            }
        };

        use tokio::io::AsyncReadExt;
        let mut stdout = String::new();
        if let Some(mut handle) = stdout_handle {
            let mut buf = Vec::new();
            let _ = handle.read_to_end(&mut buf).await;
            stdout = String::from_utf8_lossy(&buf).into_owned();
        }
        let mut stderr = String::new();
        if let Some(mut handle) = stderr_handle {
            let mut buf = Vec::new();
            let _ = handle.read_to_end(&mut buf).await;
            stderr = String::from_utf8_lossy(&buf).into_owned();
        }

        Ok(json!({
            "exit_code": status.code().unwrap_or(-1),
            "stdout": stdout,
            "stderr": stderr,
            "duration_ms": start.elapsed().as_millis() as u64,
        }))
    }
}
