//! Git tools: commit and push.
//!
//! Both are idempotent: committing with nothing staged is a clean no-op,
//! and pushing an up-to-date branch is a success.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crew_core::tools::registry::{RiskTier, Tool, ToolError};

use crate::file_tools::required_str;

/// Run a git subcommand in `workdir`, capturing output.
pub(crate) async fn run_git(
    workdir: &Path,
    args: &[&str],
) -> Result<(i32, String, String), ToolError> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("failed to run git: {e}")))?;
    Ok((
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

// ---------------------------------------------------------------------------
// git_commit
// ---------------------------------------------------------------------------

/// Commit staged changes with a message.
pub struct GitCommitTool {
    workdir: PathBuf,
}

impl GitCommitTool {
    /// Create a commit tool for the worktree at `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for GitCommitTool {
    fn name(&self) -> &str {
        "git_commit"
    }

    fn description(&self) -> &str {
        "Commit staged changes. A clean no-op when nothing is staged."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The commit message"
                },
                "all": {
                    "type": "boolean",
                    "description": "Stage all tracked modifications first (git add -A)"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let message = required_str(&args, "message")?;
        if message.trim().is_empty() {
            return Err(ToolError::InvalidArgs("empty commit message".into()));
        }

        if args.get("all").and_then(|v| v.as_bool()).unwrap_or(false) {
            let (code, _, stderr) = run_git(&self.workdir, &["add", "-A"]).await?;
            if code != 0 {
                return Err(ToolError::ExecutionFailed(format!("git add: {stderr}")));
            }
        }

        // Nothing staged: exit 0 from `diff --cached --quiet`.
        let (code, _, _) = run_git(&self.workdir, &["diff", "--cached", "--quiet"]).await?;
        if code == 0 {
            debug!("nothing staged, commit is a no-op");
            return Ok(json!({
                "message": "nothing to commit (working tree clean)",
                "committed": false,
            }));
        }

        let (code, stdout, stderr) =
            run_git(&self.workdir, &["commit", "-m", &message]).await?;
        if code != 0 {
            return Err(ToolError::ExecutionFailed(format!("git commit: {stderr}")));
        }

        Ok(json!({
            "message": stdout.trim(),
            "committed": true,
        }))
    }
}

// ---------------------------------------------------------------------------
// git_push
// ---------------------------------------------------------------------------

/// Push the current branch to its upstream.
pub struct GitPushTool {
    workdir: PathBuf,
}

impl GitPushTool {
    /// Create a push tool for the worktree at `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for GitPushTool {
    fn name(&self) -> &str {
        "git_push"
    }

    fn description(&self) -> &str {
        "Push the current branch. An up-to-date remote is a success."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "set_upstream": {
                    "type": "boolean",
                    "description": "Pass -u origin <current-branch> for the first push"
                }
            }
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::WriteVisible
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let set_upstream = args
            .get("set_upstream")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let (code, stdout, stderr) = if set_upstream {
            let (_, branch, _) =
                run_git(&self.workdir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
            let branch = branch.trim().to_string();
            run_git(&self.workdir, &["push", "-u", "origin", &branch]).await?
        } else {
            run_git(&self.workdir, &["push"]).await?
        };

        // git reports "Everything up-to-date" on stderr.
        if code == 0 || stderr.contains("Everything up-to-date") {
            let summary = if stderr.contains("Everything up-to-date") {
                "Everything up-to-date".to_string()
            } else {
                format!("{}{}", stdout.trim(), stderr.trim())
            };
            return Ok(json!({ "message": summary, "pushed": true }));
        }

        Err(ToolError::ExecutionFailed(format!("git push: {stderr}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Initialize a git repo with identity configured for commits.
    async fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "crew@test.invalid"],
            vec!["config", "user.name", "crew test"],
        ] {
            let (code, _, stderr) = run_git(dir.path(), &args).await.unwrap();
            assert_eq!(code, 0, "git {args:?}: {stderr}");
        }
        dir
    }

    #[tokio::test]
    async fn commit_with_nothing_staged_is_noop() {
        let repo = init_repo().await;
        let tool = GitCommitTool::new(repo.path().to_path_buf());

        let result = tool
            .execute(json!({"message": "empty commit attempt"}))
            .await
            .unwrap();
        assert_eq!(result["committed"], false);
        assert!(result["message"].as_str().unwrap().contains("nothing to commit"));
    }

    #[tokio::test]
    async fn commit_with_staged_changes() {
        let repo = init_repo().await;
        tokio::fs::write(repo.path().join("file.txt"), "content")
            .await
            .unwrap();
        run_git(repo.path(), &["add", "file.txt"]).await.unwrap();

        let tool = GitCommitTool::new(repo.path().to_path_buf());
        let result = tool
            .execute(json!({"message": "add file"}))
            .await
            .unwrap();
        assert_eq!(result["committed"], true);

        // Second call with nothing new staged no-ops.
        let again = tool
            .execute(json!({"message": "add file"}))
            .await
            .unwrap();
        assert_eq!(again["committed"], false);
    }

    #[tokio::test]
    async fn commit_all_stages_modifications() {
        let repo = init_repo().await;
        tokio::fs::write(repo.path().join("a.txt"), "v1").await.unwrap();

        let tool = GitCommitTool::new(repo.path().to_path_buf());
        let result = tool
            .execute(json!({"message": "first", "all": true}))
            .await
            .unwrap();
        assert_eq!(result["committed"], true);
    }

    #[tokio::test]
    async fn empty_message_rejected() {
        let repo = init_repo().await;
        let tool = GitCommitTool::new(repo.path().to_path_buf());
        let err = tool.execute(json!({"message": "  "})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn push_without_remote_is_an_error() {
        let repo = init_repo().await;
        let tool = GitPushTool::new(repo.path().to_path_buf());
        let err = tool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn push_up_to_date_local_remote() {
        // A file:// remote makes push exercisable without a network.
        let remote = tempfile::tempdir().unwrap();
        run_git(remote.path(), &["init", "-q", "--bare"]).await.unwrap();

        let repo = init_repo().await;
        tokio::fs::write(repo.path().join("f.txt"), "x").await.unwrap();
        run_git(repo.path(), &["add", "-A"]).await.unwrap();
        run_git(repo.path(), &["commit", "-q", "-m", "init"]).await.unwrap();
        run_git(
            repo.path(),
            &["remote", "add", "origin", remote.path().to_str().unwrap()],
        )
        .await
        .unwrap();

        let tool = GitPushTool::new(repo.path().to_path_buf());
        let first = tool.execute(json!({"set_upstream": true})).await.unwrap();
        assert_eq!(first["pushed"], true);

        // Pushing again with no new commits is "Everything up-to-date".
        let second = tool.execute(json!({})).await.unwrap();
        assert_eq!(second["pushed"], true);
        assert!(second["message"].as_str().unwrap().contains("up-to-date"));
    }
}
