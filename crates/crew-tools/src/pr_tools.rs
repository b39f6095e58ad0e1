//! Pull request tools, backed by the `gh` CLI.
//!
//! All four are idempotent where the underlying operation can already
//! have happened: `pr_create` returns the existing PR for the current
//! head branch, and `pr_merge` treats an already-merged PR as success.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crew_core::tools::registry::{RiskTier, Tool, ToolError};

use crate::file_tools::required_str;

/// Run a `gh` subcommand in `workdir`, capturing output.
async fn run_gh(workdir: &Path, args: &[&str]) -> Result<(i32, String, String), ToolError> {
    let output = tokio::process::Command::new("gh")
        .args(args)
        .current_dir(workdir)
        .output()
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("failed to run gh: {e}")))?;
    Ok((
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Whether a `gh pr merge` failure actually means "nothing left to do".
pub(crate) fn is_already_merged(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("already merged") || lower.contains("not mergeable: pull request is merged")
}

// ---------------------------------------------------------------------------
// pr_create
// ---------------------------------------------------------------------------

/// Open a pull request for the current branch.
pub struct PrCreateTool {
    workdir: PathBuf,
}

impl PrCreateTool {
    /// Create a PR-create tool for the worktree at `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for PrCreateTool {
    fn name(&self) -> &str {
        "pr_create"
    }

    fn description(&self) -> &str {
        "Open a pull request for the current branch. Returns the existing PR if one is already open."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "PR title" },
                "body": { "type": "string", "description": "PR description" },
                "base": { "type": "string", "description": "Base branch (default: repository default)" }
            },
            "required": ["title", "body"]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::WriteVisible
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let title = required_str(&args, "title")?;
        let body = required_str(&args, "body")?;

        // Idempotency: an open PR for this head branch is returned as-is.
        let (code, stdout, _) = run_gh(
            &self.workdir,
            &["pr", "view", "--json", "number,url,state"],
        )
        .await?;
        if code == 0 {
            if let Ok(existing) = serde_json::from_str::<serde_json::Value>(&stdout) {
                if existing["state"] == "OPEN" {
                    debug!(url = %existing["url"], "PR already exists for this branch");
                    return Ok(json!({
                        "message": "pull request already exists",
                        "number": existing["number"],
                        "url": existing["url"],
                        "created": false,
                    }));
                }
            }
        }

        let mut gh_args = vec!["pr", "create", "--title", title.as_str(), "--body", body.as_str()];
        let base = args.get("base").and_then(|v| v.as_str()).map(String::from);
        if let Some(ref base) = base {
            gh_args.push("--base");
            gh_args.push(base);
        }

        let (code, stdout, stderr) = run_gh(&self.workdir, &gh_args).await?;
        if code != 0 {
            return Err(ToolError::ExecutionFailed(format!("gh pr create: {stderr}")));
        }

        Ok(json!({
            "message": "pull request created",
            "url": stdout.trim(),
            "created": true,
        }))
    }
}

// ---------------------------------------------------------------------------
// pr_merge
// ---------------------------------------------------------------------------

/// Merge a pull request.
pub struct PrMergeTool {
    workdir: PathBuf,
}

impl PrMergeTool {
    /// Create a PR-merge tool for the worktree at `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for PrMergeTool {
    fn name(&self) -> &str {
        "pr_merge"
    }

    fn description(&self) -> &str {
        "Merge a pull request. An already-merged PR is a success."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "number": {
                    "type": "integer",
                    "description": "PR number (default: the current branch's PR)"
                }
            }
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::WriteVisible
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let number = args
            .get("number")
            .and_then(|v| v.as_u64())
            .map(|n| n.to_string());

        let mut gh_args = vec!["pr", "merge", "--merge"];
        if let Some(ref number) = number {
            gh_args.insert(2, number);
        }

        let (code, stdout, stderr) = run_gh(&self.workdir, &gh_args).await?;
        if code == 0 {
            return Ok(json!({ "message": stdout.trim(), "merged": true }));
        }
        if is_already_merged(&stderr) {
            return Ok(json!({ "message": "already merged", "merged": true }));
        }
        Err(ToolError::ExecutionFailed(format!("gh pr merge: {stderr}")))
    }
}

// ---------------------------------------------------------------------------
// pr_edit
// ---------------------------------------------------------------------------

/// Edit a pull request's title and/or body.
pub struct PrEditTool {
    workdir: PathBuf,
}

impl PrEditTool {
    /// Create a PR-edit tool for the worktree at `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for PrEditTool {
    fn name(&self) -> &str {
        "pr_edit"
    }

    fn description(&self) -> &str {
        "Edit the title or body of a pull request."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "number": { "type": "integer", "description": "PR number (default: current branch)" },
                "title": { "type": "string", "description": "New title" },
                "body": { "type": "string", "description": "New body" }
            }
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::WriteVisible
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let title = args.get("title").and_then(|v| v.as_str());
        let body = args.get("body").and_then(|v| v.as_str());
        if title.is_none() && body.is_none() {
            return Err(ToolError::InvalidArgs(
                "at least one of title or body is required".into(),
            ));
        }
        let number = args
            .get("number")
            .and_then(|v| v.as_u64())
            .map(|n| n.to_string());

        let mut gh_args: Vec<&str> = vec!["pr", "edit"];
        if let Some(ref number) = number {
            gh_args.push(number);
        }
        if let Some(title) = title {
            gh_args.push("--title");
            gh_args.push(title);
        }
        if let Some(body) = body {
            gh_args.push("--body");
            gh_args.push(body);
        }

        let (code, stdout, stderr) = run_gh(&self.workdir, &gh_args).await?;
        if code != 0 {
            return Err(ToolError::ExecutionFailed(format!("gh pr edit: {stderr}")));
        }
        Ok(json!({ "message": "pull request updated", "url": stdout.trim() }))
    }
}

// ---------------------------------------------------------------------------
// pr_status
// ---------------------------------------------------------------------------

/// Report the current branch's pull request state.
pub struct PrStatusTool {
    workdir: PathBuf,
}

impl PrStatusTool {
    /// Create a PR-status tool for the worktree at `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for PrStatusTool {
    fn name(&self) -> &str {
        "pr_status"
    }

    fn description(&self) -> &str {
        "Show the state of the current branch's pull request."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "number": { "type": "integer", "description": "PR number (default: current branch)" }
            }
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Read
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let number = args
            .get("number")
            .and_then(|v| v.as_u64())
            .map(|n| n.to_string());

        let mut gh_args: Vec<&str> = vec![
            "pr",
            "view",
            "--json",
            "number,title,state,url,mergeable,reviewDecision",
        ];
        if let Some(ref number) = number {
            gh_args.insert(2, number);
        }

        let (code, stdout, stderr) = run_gh(&self.workdir, &gh_args).await?;
        if code != 0 {
            if stderr.to_lowercase().contains("no pull requests found") {
                return Ok(json!({ "message": "no pull request for this branch" }));
            }
            return Err(ToolError::ExecutionFailed(format!("gh pr view: {stderr}")));
        }

        serde_json::from_str(&stdout)
            .map_err(|e| ToolError::ExecutionFailed(format!("unexpected gh output: {e}")))
    }
}
