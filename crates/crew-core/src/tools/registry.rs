//! Tool registry and [`Tool`] trait definition.
//!
//! The registry is the single dispatch point for everything the LLM may
//! invoke: native tools and subprocess-backed wrappers both register
//! here. Native tools register first, so a subprocess tool that collides
//! on name is rejected by [`ToolRegistry::register`] -- native wins.
//!
//! Execution always produces a [`ToolResult`] (errors included), keyed by
//! the model-assigned call id. Successful results are cached by that id,
//! which makes re-execution after a crash safe: replaying a tool call
//! returns the recorded result instead of running the tool again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crew_types::Role;

/// Declarative severity of a tool's side effects, ordered.
///
/// `Bash` and similar command-passthrough tools are reclassified per
/// invocation by the risk classifier; everything else uses its declared
/// tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// No side effects outside reading state.
    Read,
    /// Mutates only the branch worktree.
    WriteLocal,
    /// Visible outside the worktree (chat posts, pushes, PRs).
    WriteVisible,
    /// Refused outright.
    Destructive,
}

/// Error type for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The requested tool was not found in the registry.
    #[error("unknown tool {0}")]
    NotFound(String),

    /// A tool with this name is already registered.
    #[error("tool already registered: {0}")]
    Duplicate(String),

    /// The arguments provided to the tool are invalid.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The tool execution failed at runtime.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The command was classified destructive and refused.
    #[error("DESTRUCTIVE command refused: {0}")]
    Refused(String),

    /// A file or resource the tool needs was not found.
    #[error("not found: {0}")]
    FileNotFound(String),

    /// A filesystem path is invalid or escapes the sandbox.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The tool execution exceeded its time limit.
    #[error("timeout after {0}s")]
    Timeout(u64),
}

/// The outcome of one tool call. Exactly one per [`ToolCall`], even on
/// failure; the LLM sees error results as content with `is_error` set.
///
/// [`ToolCall`]: crew_llm::types::ToolCall
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    /// Echoes the model-assigned call id.
    pub tool_call_id: String,
    /// Tool output, or the error message when `is_error`.
    pub content: String,
    /// Whether this result reports a failure.
    pub is_error: bool,
}

impl ToolResult {
    fn ok(tool_call_id: &str, content: String) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            content,
            is_error: false,
        }
    }

    fn error(tool_call_id: &str, content: String) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            content,
            is_error: true,
        }
    }
}

/// A named, parameter-typed, side-effecting operation the LLM may request.
///
/// # Implementing a tool
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use crew_core::tools::registry::{RiskTier, Tool, ToolError};
///
/// struct EchoTool;
///
/// #[async_trait]
/// impl Tool for EchoTool {
///     fn name(&self) -> &str { "echo" }
///     fn description(&self) -> &str { "Echo back the input" }
///     fn parameters(&self) -> serde_json::Value {
///         serde_json::json!({
///             "type": "object",
///             "properties": { "text": { "type": "string" } },
///             "required": ["text"]
///         })
///     }
///     fn risk_tier(&self) -> RiskTier { RiskTier::Read }
///     async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
///         Ok(args)
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (used in LLM function calling).
    fn name(&self) -> &str;

    /// A human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters(&self) -> serde_json::Value;

    /// Default risk tier for this tool.
    fn risk_tier(&self) -> RiskTier {
        RiskTier::WriteLocal
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Registry of available tools for one process, bound to its role.
///
/// Shared among the process's workers; the result cache is process-wide
/// and mutex-protected.
pub struct ToolRegistry {
    role: Role,
    tools: HashMap<String, Arc<dyn Tool>>,
    cache: Mutex<HashMap<String, ToolResult>>,
}

impl ToolRegistry {
    /// Create an empty registry for `role`.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            tools: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The role this registry enforces.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Register a tool. Names are globally unique within one registry;
    /// a duplicate is rejected so that earlier (native) registrations win.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        debug!(tool = %name, "registering tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names visible to this process's role, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .keys()
            .filter(|name| !self.role.is_restricted(name))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// LLM-facing tool definitions in OpenAI function calling format,
    /// restricted tools excluded, sorted by name for deterministic output.
    pub fn schemas(&self) -> Vec<serde_json::Value> {
        let mut schemas: Vec<(String, serde_json::Value)> = self
            .tools
            .iter()
            .filter(|(name, _)| !self.role.is_restricted(name))
            .map(|(name, tool)| {
                let schema = serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": tool.description(),
                        "parameters": tool.parameters(),
                    }
                });
                (name.clone(), schema)
            })
            .collect();
        schemas.sort_by(|a, b| a.0.cmp(&b.0));
        schemas.into_iter().map(|(_, v)| v).collect()
    }

    /// Execute a tool call, producing exactly one [`ToolResult`].
    ///
    /// Order of checks: result cache (idempotency) → role restriction →
    /// unknown tool → argument parsing → execution. Only non-error
    /// results are cached, keyed by the (non-empty) call id.
    pub async fn execute_call(&self, call_id: &str, name: &str, args_json: &str) -> ToolResult {
        if !call_id.is_empty() {
            let cache = self.cache.lock().unwrap();
            if let Some(cached) = cache.get(call_id) {
                debug!(call_id, tool = %name, "returning cached tool result");
                return cached.clone();
            }
        }

        if self.role.is_restricted(name) {
            warn!(tool = %name, role = %self.role, "restricted tool invocation rejected");
            return ToolResult::error(
                call_id,
                format!("tool {} is not available for role {}", name, self.role),
            );
        }

        let Some(tool) = self.tools.get(name) else {
            return ToolResult::error(call_id, format!("unknown tool {name}"));
        };

        let args: serde_json::Value = if args_json.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str(args_json) {
                Ok(value) => value,
                Err(e) => {
                    return ToolResult::error(call_id, format!("invalid arguments: {e}"));
                }
            }
        };

        debug!(tool = %name, call_id, "executing tool");
        match tool.execute(args).await {
            Ok(value) => {
                let content = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                let result = ToolResult::ok(call_id, content);
                if !call_id.is_empty() {
                    let mut cache = self.cache.lock().unwrap();
                    cache.insert(call_id.to_string(), result.clone());
                }
                result
            }
            Err(e) => ToolResult::error(call_id, e.to_string()),
        }
    }

    /// Number of registered tools (including restricted ones).
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Echoes its input and counts invocations.
    struct EchoTool {
        invocations: AtomicU32,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                invocations: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo back the input text"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        fn risk_tier(&self) -> RiskTier {
            RiskTier::Read
        }
        async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidArgs("missing 'text'".into()))?;
            Ok(serde_json::json!({ "output": text }))
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!("ran"))
        }
    }

    #[test]
    fn risk_tiers_are_ordered() {
        assert!(RiskTier::Read < RiskTier::WriteLocal);
        assert!(RiskTier::WriteLocal < RiskTier::WriteVisible);
        assert!(RiskTier::WriteVisible < RiskTier::Destructive);
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut registry = ToolRegistry::new(Role::Coder);
        registry.register(Arc::new(EchoTool::new())).unwrap();
        let err = registry.register(Arc::new(EchoTool::new())).unwrap_err();
        assert!(matches!(err, ToolError::Duplicate(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn list_excludes_restricted_tools() {
        let mut registry = ToolRegistry::new(Role::Reviewer);
        registry.register(Arc::new(NamedTool("exec_shell"))).unwrap();
        registry.register(Arc::new(NamedTool("read_file"))).unwrap();
        assert_eq!(registry.list(), vec!["read_file"]);
    }

    #[test]
    fn schemas_exclude_restricted_and_sort() {
        let mut registry = ToolRegistry::new(Role::Lead);
        registry.register(Arc::new(NamedTool("exec_shell"))).unwrap();
        registry.register(Arc::new(NamedTool("write_file"))).unwrap();
        registry.register(Arc::new(NamedTool("glob"))).unwrap();
        let schemas = registry.schemas();
        let names: Vec<&str> = schemas
            .iter()
            .map(|s| s["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["glob", "write_file"]);
    }

    #[tokio::test]
    async fn execute_returns_output() {
        let mut registry = ToolRegistry::new(Role::Coder);
        registry.register(Arc::new(EchoTool::new())).unwrap();

        let result = registry
            .execute_call("call-1", "echo", r#"{"text":"hello"}"#)
            .await;
        assert!(!result.is_error);
        assert_eq!(result.tool_call_id, "call-1");
        assert!(result.content.contains("hello"));
    }

    #[tokio::test]
    async fn execute_caches_by_call_id() {
        let echo = Arc::new(EchoTool::new());
        let mut registry = ToolRegistry::new(Role::Coder);
        registry.register(echo.clone()).unwrap();

        let first = registry
            .execute_call("call-7", "echo", r#"{"text":"once"}"#)
            .await;
        let second = registry
            .execute_call("call-7", "echo", r#"{"text":"once"}"#)
            .await;

        assert_eq!(first, second);
        assert_eq!(echo.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_call_id_is_not_cached() {
        let echo = Arc::new(EchoTool::new());
        let mut registry = ToolRegistry::new(Role::Coder);
        registry.register(echo.clone()).unwrap();

        registry.execute_call("", "echo", r#"{"text":"a"}"#).await;
        registry.execute_call("", "echo", r#"{"text":"a"}"#).await;
        assert_eq!(echo.invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let echo = Arc::new(EchoTool::new());
        let mut registry = ToolRegistry::new(Role::Coder);
        registry.register(echo.clone()).unwrap();

        // Missing 'text' makes the tool fail.
        let first = registry.execute_call("call-9", "echo", "{}").await;
        assert!(first.is_error);

        // A corrected retry with the same id actually runs.
        let second = registry
            .execute_call("call-9", "echo", r#"{"text":"fixed"}"#)
            .await;
        assert!(!second.is_error);
        assert_eq!(echo.invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restricted_tool_is_not_invoked() {
        let echo = Arc::new(EchoTool::new());
        let mut registry = ToolRegistry::new(Role::Pm);
        // Register under a name pm is restricted from.
        struct Renamed(Arc<EchoTool>);
        #[async_trait]
        impl Tool for Renamed {
            fn name(&self) -> &str {
                "write_file"
            }
            fn description(&self) -> &str {
                "write"
            }
            fn parameters(&self) -> serde_json::Value {
                serde_json::json!({"type":"object","properties":{}})
            }
            async fn execute(
                &self,
                args: serde_json::Value,
            ) -> Result<serde_json::Value, ToolError> {
                self.0.execute(args).await
            }
        }
        registry.register(Arc::new(Renamed(echo.clone()))).unwrap();

        let result = registry
            .execute_call("c1", "write_file", r#"{"text":"x"}"#)
            .await;
        assert!(result.is_error);
        assert_eq!(
            result.content,
            "tool write_file is not available for role pm"
        );
        assert_eq!(echo.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn every_restricted_pair_is_rejected() {
        for role in Role::ALL {
            let registry = ToolRegistry::new(role);
            for tool in role.restricted_tools() {
                let result = registry.execute_call("id", tool, "{}").await;
                assert!(result.is_error, "role {role} tool {tool}");
                assert!(result.content.contains("not available"));
            }
        }
    }

    #[tokio::test]
    async fn unknown_tool_error() {
        let registry = ToolRegistry::new(Role::Coder);
        let result = registry.execute_call("c1", "missing", "{}").await;
        assert!(result.is_error);
        assert_eq!(result.content, "unknown tool missing");
    }

    #[tokio::test]
    async fn malformed_arguments_error() {
        let mut registry = ToolRegistry::new(Role::Coder);
        registry.register(Arc::new(EchoTool::new())).unwrap();
        let result = registry.execute_call("c1", "echo", "{not json").await;
        assert!(result.is_error);
        assert!(result.content.contains("invalid arguments"));
    }

    #[tokio::test]
    async fn empty_arguments_become_empty_object() {
        let mut registry = ToolRegistry::new(Role::Coder);
        registry.register(Arc::new(NamedTool("noop"))).unwrap();
        let result = registry.execute_call("c1", "noop", "").await;
        assert!(!result.is_error);
        assert_eq!(result.content, "ran");
    }

    #[tokio::test]
    async fn string_results_are_unwrapped() {
        let mut registry = ToolRegistry::new(Role::Coder);
        registry.register(Arc::new(NamedTool("noop"))).unwrap();
        let result = registry.execute_call("c1", "noop", "{}").await;
        // A JSON string result is returned raw, not quoted.
        assert_eq!(result.content, "ran");
    }
}
