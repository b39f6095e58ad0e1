//! Append-only conversation logs.
//!
//! One log per (branch, role) at
//! `branches/<branch>/conversations/<role>.log`, JSON-lines, one
//! [`ChatMessage`] per line. The log is the sole source of truth for
//! resuming an LLM session: on restart a worker re-reads its file and
//! continues. Truncated or corrupt trailing lines are skipped on read.
//! Logs are never merged across branches.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crew_llm::types::ChatMessage;
use crew_types::{CrewError, Result, Role};

/// Append-only JSONL store for one conversation log.
pub struct ConversationStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    durable: bool,
}

impl ConversationStore {
    /// Open (or create the directories for) the log of `role` on `branch`
    /// under the workspace root.
    ///
    /// Branch names may contain `/` (nested directories are created);
    /// they may not contain `..` or start with `/`.
    pub async fn open(root: &Path, branch: &str, role: Role) -> Result<Self> {
        validate_branch(branch)?;
        let dir = root.join("branches").join(branch).join("conversations");
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{role}.log"));
        debug!(path = %path.display(), "opened conversation log");
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            durable: true,
        })
    }

    /// Disable fsync-per-append (test speedup).
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// The on-disk path of this log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a JSON line.
    ///
    /// Serialization happens outside the lock; the write and (when
    /// durable) the fsync happen under it, so concurrent appenders never
    /// interleave partial lines.
    pub async fn append(&self, entry: &ChatMessage) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        if self.durable {
            file.sync_all().await?;
        }
        Ok(())
    }

    /// Replay the log into memory.
    ///
    /// Malformed lines (e.g. a torn final line after a crash) are
    /// skipped with a warning, never fatal. A missing file is an empty
    /// log.
    pub async fn load(&self) -> Result<Vec<ChatMessage>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatMessage>(trimmed) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping malformed conversation line"
                    );
                }
            }
        }
        Ok(entries)
    }
}

/// Reject branch names that could escape the `branches/` tree.
fn validate_branch(branch: &str) -> Result<()> {
    if branch.is_empty() {
        return Err(CrewError::ConfigInvalid {
            reason: "branch name is empty".into(),
        });
    }
    if branch.starts_with('/') || branch.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return Err(CrewError::ConfigInvalid {
            reason: format!("invalid branch name: {branch}"),
        });
    }
    Ok(())
}
