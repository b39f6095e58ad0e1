//! Worktree sandbox enforcement.
//!
//! Every filesystem-touching tool runs its path arguments through a
//! [`Sandbox`] first. Validation resolves symlinks, so a link inside
//! the root pointing outside it is rejected, and handles paths that do
//! not exist yet by resolving their deepest existing ancestor.

use std::path::{Path, PathBuf};

use crew_core::tools::registry::ToolError;

/// Path validator rooted at a branch worktree.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox over `root`. The directory must exist; the root
    /// itself is canonicalized once so later prefix checks are exact.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ToolError> {
        let root: PathBuf = root.into();
        let root = root
            .canonicalize()
            .map_err(|e| ToolError::ExecutionFailed(format!("sandbox root: {e}")))?;
        Ok(Self { root })
    }

    /// The canonical sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate a path that must already exist.
    ///
    /// Relative paths are joined with the root; the result is resolved
    /// (following symlinks) and must stay at or under the root.
    pub fn validate(&self, path: &str) -> Result<PathBuf, ToolError> {
        if path.is_empty() {
            return Err(ToolError::InvalidArgs("empty path".into()));
        }
        let joined = self.join(path);
        let canonical = joined
            .canonicalize()
            .map_err(|_| ToolError::FileNotFound(path.to_string()))?;
        self.check_contained(&canonical, path)?;
        Ok(canonical)
    }

    /// Validate a path that may not exist yet (write targets).
    ///
    /// The deepest existing ancestor is resolved and checked; the
    /// not-yet-existing remainder is re-appended to the resolved
    /// ancestor. A `..` that escapes past the root is rejected even
    /// when nothing on that path exists.
    pub fn validate_for_write(&self, path: &str) -> Result<PathBuf, ToolError> {
        if path.is_empty() {
            return Err(ToolError::InvalidArgs("empty path".into()));
        }
        let joined = self.join(path);

        // Walk up to the deepest ancestor that exists.
        let mut ancestor = joined.as_path();
        let mut remainder = Vec::new();
        while !ancestor.exists() {
            let Some(name) = ancestor.file_name() else {
                return Err(ToolError::InvalidPath(format!(
                    "path escapes sandbox: {path}"
                )));
            };
            remainder.push(name.to_os_string());
            ancestor = ancestor
                .parent()
                .ok_or_else(|| ToolError::InvalidPath(format!("path escapes sandbox: {path}")))?;
        }

        let canonical_ancestor = ancestor
            .canonicalize()
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        self.check_contained(&canonical_ancestor, path)?;

        let mut result = canonical_ancestor;
        for part in remainder.iter().rev() {
            if part == ".." || part == "." {
                return Err(ToolError::InvalidPath(format!(
                    "path escapes sandbox: {path}"
                )));
            }
            result.push(part);
        }
        Ok(result)
    }

    fn join(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    fn check_contained(&self, resolved: &Path, original: &str) -> Result<(), ToolError> {
        if resolved == self.root || resolved.starts_with(&self.root) {
            Ok(())
        } else {
            Err(ToolError::InvalidPath(format!(
                "path escapes sandbox: {original}"
            )))
        }
    }
}
