//! The closed set of agent roles and their tool restrictions.
//!
//! Every crew process runs as exactly one [`Role`]. The role determines
//! which tools the LLM may invoke and which system prompt the process
//! loads; there is no class hierarchy behind this, only the capability
//! table below.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An agent role. One process per role; all processes share one binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Product management: plans work, never touches files or git.
    Pm,
    /// Writes code; the only role with no restricted tools.
    Coder,
    /// Reviews diffs; read-only on the worktree.
    Reviewer,
    /// Gathers information; read-only everywhere.
    Researcher,
    /// Produces visual assets; no shell or git.
    Artist,
    /// Coordinates the other roles; no shell.
    Lead,
}

impl Role {
    /// All roles, in display order.
    pub const ALL: [Role; 6] = [
        Role::Pm,
        Role::Coder,
        Role::Reviewer,
        Role::Researcher,
        Role::Artist,
        Role::Lead,
    ];

    /// The lowercase name used on the command line, in file paths, and in
    /// subprocess server configs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Pm => "pm",
            Role::Coder => "coder",
            Role::Reviewer => "reviewer",
            Role::Researcher => "researcher",
            Role::Artist => "artist",
            Role::Lead => "lead",
        }
    }

    /// Tool names this role may not invoke.
    ///
    /// The registry turns an attempt to execute one of these into an
    /// error tool result without running the tool.
    pub fn restricted_tools(&self) -> &'static [&'static str] {
        match self {
            Role::Pm => &[
                "write_file",
                "edit_file",
                "git_commit",
                "git_push",
                "pr_create",
            ],
            Role::Researcher => &[
                "write_file",
                "edit_file",
                "exec_shell",
                "git_commit",
                "git_push",
            ],
            Role::Artist => &["exec_shell", "git_commit", "git_push"],
            Role::Reviewer => &["write_file", "edit_file", "exec_shell"],
            Role::Lead => &["exec_shell"],
            Role::Coder => &[],
        }
    }

    /// Whether `tool` is restricted for this role.
    pub fn is_restricted(&self, tool: &str) -> bool {
        self.restricted_tools().contains(&tool)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}' (expected one of: pm, coder, reviewer, researcher, artist, lead)")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pm" => Ok(Role::Pm),
            "coder" => Ok(Role::Coder),
            "reviewer" => Ok(Role::Reviewer),
            "researcher" => Ok(Role::Researcher),
            "artist" => Ok(Role::Artist),
            "lead" => Ok(Role::Lead),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}
