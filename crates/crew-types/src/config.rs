//! Process configuration.
//!
//! Loaded from a TOML file (`crew.toml`). Every field has a default so a
//! missing file still yields a runnable config; an explicitly given path
//! that cannot be read or parsed is a fatal startup error.
//!
//! The provider section never stores an API key, only the name of the
//! environment variable that holds it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CrewError, Result};

/// Connection settings for the OpenAI-compatible LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Human-readable provider name (e.g. "openai").
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable that holds the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier sent in chat completion requests.
    #[serde(default = "default_model")]
    pub model: String,

    /// Extra HTTP headers to include in every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_provider_name() -> String {
    "openai".into()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

fn default_model() -> String {
    "gpt-4o".into()
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            headers: HashMap::new(),
        }
    }
}

/// Tunable runtime defaults. All timeouts are overridable here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Root directory for the sandbox and the `branches/` tree.
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Maximum model→tool→model round trips per message.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// HTTP request timeout for provider calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Default shell tool timeout, in seconds.
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,

    /// Subprocess initialize / list / call timeout, in seconds.
    #[serde(default = "default_subprocess_timeout")]
    pub subprocess_timeout_secs: u64,

    /// Worker inactivity timeout, in seconds.
    #[serde(default = "default_worker_idle")]
    pub worker_idle_secs: u64,

    /// Bounded worker inbox capacity.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// Grace period for draining workers on shutdown, in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_workspace() -> String {
    "~/.crew/workspace".into()
}

fn default_max_tool_iterations() -> u32 {
    15
}

fn default_request_timeout() -> u64 {
    120
}

fn default_shell_timeout() -> u64 {
    120
}

fn default_subprocess_timeout() -> u64 {
    30
}

fn default_worker_idle() -> u64 {
    60
}

fn default_inbox_capacity() -> usize {
    10
}

fn default_shutdown_grace() -> u64 {
    5
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            max_tool_iterations: default_max_tool_iterations(),
            request_timeout_secs: default_request_timeout(),
            shell_timeout_secs: default_shell_timeout(),
            subprocess_timeout_secs: default_subprocess_timeout(),
            worker_idle_secs: default_worker_idle(),
            inbox_capacity: default_inbox_capacity(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Top-level process configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// LLM provider connection settings.
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Runtime defaults.
    #[serde(default)]
    pub defaults: Defaults,
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// A missing file is an error here; use [`Config::discover`] for the
    /// tolerant lookup chain.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CrewError::ConfigInvalid {
            reason: format!("{}: {e}", path.display()),
        })
    }

    /// Resolve configuration from the standard lookup chain:
    /// explicit path (must exist) → `./crew.toml` → `~/.crew/crew.toml` →
    /// built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let local = PathBuf::from("crew.toml");
        if local.is_file() {
            return Self::load(&local);
        }
        if let Some(home) = dirs::home_dir() {
            let user = home.join(".crew").join("crew.toml");
            if user.is_file() {
                return Self::load(&user);
            }
        }
        Ok(Self::default())
    }

    /// The sandbox / branches root with `~` expanded.
    pub fn workspace_dir(&self) -> PathBuf {
        expand_tilde(&self.defaults.workspace)
    }
}

/// Expand a leading `~` or `~/` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
