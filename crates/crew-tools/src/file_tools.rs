//! File tools: read, write, edit.
//!
//! All paths go through the [`Sandbox`] first. Writes go to a temp file
//! in the destination directory and are renamed into place, so readers
//! never observe a half-written file.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crew_core::tools::registry::{RiskTier, Tool, ToolError};

use crate::sandbox::Sandbox;

/// Extract a required string field from a JSON arguments object.
pub(crate) fn required_str(args: &serde_json::Value, field: &str) -> Result<String, ToolError> {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing required field: {field}")))
}

/// Write `content` atomically: temp file in the same directory, then
/// rename over the destination.
async fn atomic_write(path: &std::path::Path, content: &str) -> Result<(), ToolError> {
    let dir = path
        .parent()
        .ok_or_else(|| ToolError::InvalidPath(path.display().to_string()))?;
    let dir = dir.to_path_buf();
    let path = path.to_path_buf();
    let content = content.to_string();

    // tempfile's persist is a rename, which requires same-filesystem --
    // hence the temp file lives next to the destination.
    tokio::task::spawn_blocking(move || {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| ToolError::ExecutionFailed(format!("temp file: {e}")))?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())
            .map_err(|e| ToolError::ExecutionFailed(format!("write: {e}")))?;
        tmp.persist(&path)
            .map_err(|e| ToolError::ExecutionFailed(format!("rename: {e}")))?;
        Ok(())
    })
    .await
    .map_err(|e| ToolError::ExecutionFailed(format!("write task: {e}")))?
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

/// Read the contents of a file within the sandbox.
pub struct ReadFileTool {
    sandbox: Sandbox,
}

impl ReadFileTool {
    /// Create a read tool over the given sandbox.
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read (relative to the worktree)"
                }
            },
            "required": ["path"]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Read
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let path_str = required_str(&args, "path")?;
        let canonical = self.sandbox.validate(&path_str)?;

        debug!(path = %canonical.display(), "reading file");

        let content = tokio::fs::read_to_string(&canonical)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("read failed: {e}")))?;
        Ok(serde_json::Value::String(content))
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

/// Write content to a file within the sandbox, creating parent
/// directories as needed. Returns the byte count written.
pub struct WriteFileTool {
    sandbox: Sandbox,
}

impl WriteFileTool {
    /// Create a write tool over the given sandbox.
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates parent directories if needed; overwrites atomically."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write (relative to the worktree)"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let path_str = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let target = self.sandbox.validate_for_write(&path_str)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("mkdir: {e}")))?;
        }

        debug!(path = %target.display(), bytes = content.len(), "writing file");
        atomic_write(&target, &content).await?;

        Ok(json!({
            "message": format!("wrote {} bytes to {}", content.len(), path_str),
            "bytes": content.len(),
        }))
    }
}

// ---------------------------------------------------------------------------
// edit_file
// ---------------------------------------------------------------------------

/// Replace a unique `old_string` with `new_string` in a file.
///
/// `old_string` must occur exactly once (byte-wise over the whole file).
/// If it is absent but `new_string` is present, the edit was already
/// applied and the tool reports success with an idempotency marker.
pub struct EditFileTool {
    sandbox: Sandbox,
}

impl EditFileTool {
    /// Create an edit tool over the given sandbox.
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing old_string with new_string. The old_string must occur exactly once."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to edit (relative to the worktree)"
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact text to find and replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "The text to replace it with"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let path_str = required_str(&args, "path")?;
        let old_string = required_str(&args, "old_string")?;
        let new_string = required_str(&args, "new_string")?;
        let canonical = self.sandbox.validate(&path_str)?;

        debug!(path = %canonical.display(), "editing file");

        let content = tokio::fs::read_to_string(&canonical)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("read failed: {e}")))?;

        let count = content.matches(&old_string).count();
        if count == 0 {
            if !new_string.is_empty() && content.contains(&new_string) {
                return Ok(json!({
                    "message": format!("edit already applied (idempotent) to {path_str}"),
                }));
            }
            return Err(ToolError::InvalidArgs(
                "old_string not found in file".to_string(),
            ));
        }
        if count > 1 {
            return Err(ToolError::InvalidArgs(format!(
                "old_string must be unique, found {count} occurrences"
            )));
        }

        let new_content = content.replacen(&old_string, &new_string, 1);
        atomic_write(&canonical, &new_content).await?;

        Ok(json!({
            "message": format!("edited {path_str}"),
        }))
    }
}
