//! Search tools: glob and grep.
//!
//! `glob` matches paths against a pattern with `*`, `?`, and `**`
//! (zero-or-more directory segments), walking the tree only when `**`
//! requires it. `grep` shells out to the system grep with line numbers;
//! exit status 1 (no matches) is a normal result, not an error.

use std::path::Path;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use walkdir::WalkDir;

use crew_core::tools::registry::{RiskTier, Tool, ToolError};

use crate::file_tools::required_str;
use crate::sandbox::Sandbox;

/// Match a single path segment against a glob segment (`*`, `?`,
/// literals). No directory separators on either side.
fn segment_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (plen, tlen) = (pattern.len(), text.len());

    let mut pi = 0;
    let mut ti = 0;
    let mut star_pi = None;
    let mut star_ti = 0;

    while ti < tlen {
        if pi < plen && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < plen && pattern[pi] == '*' {
            star_pi = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(spi) = star_pi {
            pi = spi + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }
    while pi < plen && pattern[pi] == '*' {
        pi += 1;
    }
    pi == plen
}

/// Match a relative path against a glob pattern where `**` spans zero or
/// more directory segments.
fn path_matches(pattern: &str, path: &str) -> bool {
    let pat_segs: Vec<&str> = pattern.split('/').collect();
    let path_segs: Vec<&str> = path.split('/').collect();
    match_segments(&pat_segs, &path_segs)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(&"**") => {
            // `**` consumes zero or more leading path segments.
            (0..=path.len()).any(|skip| match_segments(&pattern[1..], &path[skip..]))
        }
        Some(seg) => match path.first() {
            Some(first) if segment_matches(seg, first) => {
                match_segments(&pattern[1..], &path[1..])
            }
            _ => false,
        },
    }
}

// ---------------------------------------------------------------------------
// glob
// ---------------------------------------------------------------------------

/// Find files matching a glob pattern within the sandbox.
///
/// Directories are excluded from the results. The walk never follows
/// symlinks out of the sandbox (matching is done on relative paths under
/// the validated root).
pub struct GlobTool {
    sandbox: Sandbox,
}

impl GlobTool {
    /// Create a glob tool over the given sandbox.
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern. Supports *, ?, and ** for spanning directories."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern relative to the worktree, e.g. src/**/*.rs"
                }
            },
            "required": ["pattern"]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Read
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let pattern = required_str(&args, "pattern")?;
        if pattern.contains("..") {
            return Err(ToolError::InvalidPath(format!(
                "pattern escapes sandbox: {pattern}"
            )));
        }

        let root = self.sandbox.root().to_path_buf();
        debug!(pattern = %pattern, "globbing");

        let matches = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            for entry in WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let rel = rel.to_string_lossy().replace('\\', "/");
                if path_matches(&pattern, &rel) {
                    matches.push(rel);
                }
            }
            matches.sort();
            matches
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("glob task: {e}")))?;

        let count = matches.len();
        Ok(json!({ "matches": matches, "count": count }))
    }
}

// ---------------------------------------------------------------------------
// grep
// ---------------------------------------------------------------------------

/// Search file contents via the system `grep`.
pub struct GrepTool {
    sandbox: Sandbox,
}

impl GrepTool {
    /// Create a grep tool over the given sandbox.
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents for a pattern. Returns matching lines with line numbers."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: the whole worktree)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Recurse into directories (default true)"
                },
                "include": {
                    "type": "string",
                    "description": "Only search files matching this glob, e.g. *.rs"
                }
            },
            "required": ["pattern"]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Read
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let pattern = required_str(&args, "pattern")?;
        let path_arg = args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();
        let recursive = args
            .get("recursive")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let search_path = self.sandbox.validate(&path_arg)?;

        let mut cmd = tokio::process::Command::new("grep");
        cmd.arg("-n");
        if recursive {
            cmd.arg("-r");
        }
        if let Some(include) = args.get("include").and_then(|v| v.as_str()) {
            cmd.arg(format!("--include={include}"));
        }
        cmd.arg("--").arg(&pattern).arg(&search_path);
        cmd.current_dir(self.sandbox.root());

        debug!(pattern = %pattern, path = %search_path.display(), "running grep");

        let output = cmd
            .output()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to run grep: {e}")))?;

        match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                // Report paths relative to the sandbox root.
                let root_prefix = format!("{}/", self.sandbox.root().display());
                Ok(serde_json::Value::String(
                    stdout.replace(&root_prefix, ""),
                ))
            }
            Some(1) => Ok(serde_json::Value::String("no matches found".into())),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                Err(ToolError::ExecutionFailed(format!("grep failed: {stderr}")))
            }
        }
    }
}

/// Convenience for tests and callers that match a pattern against one
/// path without a filesystem walk.
pub fn glob_matches_path(pattern: &str, path: &Path) -> bool {
    path_matches(pattern, &path.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- matcher ---------------------------------------------------------

    #[test]
    fn segment_star_and_question() {
        assert!(segment_matches("*.rs", "main.rs"));
        assert!(!segment_matches("*.rs", "main.go"));
        assert!(segment_matches("file_?", "file_a"));
        assert!(!segment_matches("file_?", "file_ab"));
        assert!(segment_matches("*", "anything"));
    }

    #[test]
    fn path_single_level() {
        assert!(path_matches("src/*.rs", "src/main.rs"));
        assert!(!path_matches("src/*.rs", "src/sub/main.rs"));
        assert!(!path_matches("src/*.rs", "lib/main.rs"));
    }

    #[test]
    fn doublestar_spans_zero_segments() {
        assert!(path_matches("src/**/*.rs", "src/main.rs"));
        assert!(path_matches("**/main.rs", "main.rs"));
    }

    #[test]
    fn doublestar_spans_many_segments() {
        assert!(path_matches("src/**/*.rs", "src/a/b/c/mod.rs"));
        assert!(path_matches("**/tests/**", "a/b/tests/c/d.rs"));
        assert!(!path_matches("src/**/*.rs", "docs/a/b.rs"));
    }

    #[test]
    fn trailing_doublestar() {
        assert!(path_matches("vendor/**", "vendor/a/b/c.txt"));
        assert!(!path_matches("vendor/**/*", "src/a.txt"));
    }

    // -- glob tool -------------------------------------------------------

    async fn setup_tree() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        for path in [
            "src/main.rs",
            "src/lib.rs",
            "src/api/users.rs",
            "src/api/deep/inner.rs",
            "docs/readme.md",
        ] {
            let full = dir.path().join(path);
            tokio::fs::create_dir_all(full.parent().unwrap())
                .await
                .unwrap();
            tokio::fs::write(&full, format!("// {path}\nfn marker() {{}}\n"))
                .await
                .unwrap();
        }
        let sandbox = Sandbox::new(dir.path()).unwrap();
        (dir, sandbox)
    }

    #[tokio::test]
    async fn glob_flat_pattern() {
        let (_dir, sandbox) = setup_tree().await;
        let tool = GlobTool::new(sandbox);
        let result = tool.execute(json!({"pattern": "src/*.rs"})).await.unwrap();
        let matches: Vec<&str> = result["matches"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(matches, vec!["src/lib.rs", "src/main.rs"]);
    }

    #[tokio::test]
    async fn glob_doublestar_recurses() {
        let (_dir, sandbox) = setup_tree().await;
        let tool = GlobTool::new(sandbox);
        let result = tool
            .execute(json!({"pattern": "src/**/*.rs"}))
            .await
            .unwrap();
        assert_eq!(result["count"], 4);
    }

    #[tokio::test]
    async fn glob_excludes_directories() {
        let (_dir, sandbox) = setup_tree().await;
        let tool = GlobTool::new(sandbox);
        let result = tool.execute(json!({"pattern": "**"})).await.unwrap();
        let matches = result["matches"].as_array().unwrap();
        for m in matches {
            assert!(m.as_str().unwrap().contains('.'), "unexpected dir: {m}");
        }
    }

    #[tokio::test]
    async fn glob_rejects_dotdot_pattern() {
        let (_dir, sandbox) = setup_tree().await;
        let tool = GlobTool::new(sandbox);
        let err = tool
            .execute(json!({"pattern": "../**/*.rs"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidPath(_)));
    }

    // -- grep tool -------------------------------------------------------

    #[tokio::test]
    async fn grep_finds_matches_with_line_numbers() {
        let (_dir, sandbox) = setup_tree().await;
        let tool = GrepTool::new(sandbox);
        let result = tool
            .execute(json!({"pattern": "marker", "path": "src"}))
            .await
            .unwrap();
        let text = result.as_str().unwrap();
        assert!(text.contains("main.rs:2:"), "got: {text}");
    }

    #[tokio::test]
    async fn grep_no_matches_is_not_an_error() {
        let (_dir, sandbox) = setup_tree().await;
        let tool = GrepTool::new(sandbox);
        let result = tool
            .execute(json!({"pattern": "zz_absent_zz"}))
            .await
            .unwrap();
        assert_eq!(result, json!("no matches found"));
    }

    #[tokio::test]
    async fn grep_include_filter() {
        let (_dir, sandbox) = setup_tree().await;
        let tool = GrepTool::new(sandbox);
        let result = tool
            .execute(json!({"pattern": "marker", "include": "*.md"}))
            .await
            .unwrap();
        // Only docs/readme.md matches *.md and it has no marker line.
        assert_eq!(result, json!("no matches found"));
    }

    #[tokio::test]
    async fn grep_outside_sandbox_rejected() {
        let (_dir, sandbox) = setup_tree().await;
        let tool = GrepTool::new(sandbox);
        let err = tool
            .execute(json!({"pattern": "root", "path": "/etc"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidPath(_)));
    }
}
