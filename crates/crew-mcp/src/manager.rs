//! Subprocess tool server lifecycle.
//!
//! Starts every configured server whose roles include the process role,
//! one at a time, each inside its own failure domain: a server that
//! fails to spawn, initialize, or list its tools is killed and skipped
//! with a warning, never aborting the rest. At shutdown all children
//! are stopped concurrently -- stdin closed first, force-killed after a
//! grace period.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crew_types::Role;

use crate::client::{McpClient, McpError, ToolDefinition};

/// How long a stopping child gets between stdin EOF and SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// One server entry from the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Executable to launch. `${VAR}` is expanded from the environment.
    pub command: String,
    /// Arguments, also `${VAR}`-expanded.
    #[serde(default)]
    pub args: Vec<String>,
    /// Roles this server is available to. Empty or absent: all roles.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl ServerConfig {
    /// Whether this server is available to `role`.
    pub fn allows(&self, role: Role) -> bool {
        self.roles.is_empty() || self.roles.iter().any(|r| r == role.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: HashMap<String, ServerConfig>,
}

/// Load server configs from the JSON file at `path`.
///
/// A missing file is an empty set, not an error; an unparseable file is
/// an error (the operator wrote it, so silence would hide a typo).
pub fn load_server_configs(path: &Path) -> Result<HashMap<String, ServerConfig>, McpError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no server config file");
            return Ok(HashMap::new());
        }
        Err(e) => return Err(McpError::Spawn(e)),
    };
    let parsed: ServersFile = serde_json::from_str(&content)
        .map_err(|e| McpError::InvalidResponse(format!("{}: {e}", path.display())))?;
    Ok(parsed.servers)
}

/// Expand `${NAME}` references against the process environment.
/// Unset variables expand to the empty string.
pub fn expand_env(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                result.push_str(&std::env::var(name).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

struct ManagedServer {
    child: Child,
    client: std::sync::Arc<McpClient>,
    tools: Vec<ToolDefinition>,
}

/// Process-wide manager of subprocess tool servers.
pub struct McpManager {
    servers: Mutex<HashMap<String, ManagedServer>>,
    startup_timeout: Duration,
}

impl McpManager {
    /// Create a manager with the given initialize/list/call timeout.
    pub fn new(startup_timeout: Duration) -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            startup_timeout,
        }
    }

    /// Start every configured server available to `role`.
    ///
    /// Returns the number of servers that came up. One failed server
    /// never aborts the rest.
    pub async fn start_all(
        &self,
        configs: &HashMap<String, ServerConfig>,
        role: Role,
    ) -> usize {
        let mut started = 0;
        for (name, config) in configs {
            if !config.allows(role) {
                debug!(server = %name, role = %role, "server not available to this role");
                continue;
            }
            match self.start_server(name, config).await {
                Ok(tool_count) => {
                    info!(server = %name, tools = tool_count, "tool server started");
                    started += 1;
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "tool server failed to start, skipping");
                }
            }
        }
        started
    }

    /// Launch one server and run the discovery sequence.
    async fn start_server(&self, name: &str, config: &ServerConfig) -> Result<usize, McpError> {
        let command = expand_env(&config.command);
        let args: Vec<String> = config.args.iter().map(|a| expand_env(a)).collect();

        debug!(server = %name, command = %command, "spawning tool server");
        let mut child = Command::new(&command)
            .args(&args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            McpError::Transport("failed to capture child stdin".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            McpError::Transport("failed to capture child stdout".into())
        })?;

        let client = McpClient::new(stdin, stdout, self.startup_timeout);
        let cancel = CancellationToken::new();

        // initialize then tools/list; any failure kills the child.
        let setup = async {
            client.initialize(&cancel).await?;
            client.list_tools(&cancel).await
        };
        let tools = match setup.await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = child.start_kill();
                return Err(e);
            }
        };

        let tool_count = tools.len();
        let mut servers = self.servers.lock().await;
        servers.insert(
            name.to_string(),
            ManagedServer {
                child,
                client,
                tools,
            },
        );
        Ok(tool_count)
    }

    /// Names of the currently alive servers.
    pub async fn server_names(&self) -> Vec<String> {
        let servers = self.servers.lock().await;
        let mut names: Vec<String> = servers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` is currently alive.
    pub async fn is_alive(&self, name: &str) -> bool {
        self.servers.lock().await.contains_key(name)
    }

    /// All discovered tools, as (server, definition) pairs.
    pub async fn tools(&self) -> Vec<(String, ToolDefinition)> {
        let servers = self.servers.lock().await;
        let mut all = Vec::new();
        for (name, server) in servers.iter() {
            for tool in &server.tools {
                all.push((name.clone(), tool.clone()));
            }
        }
        all.sort_by(|a, b| (&a.0, &a.1.name).cmp(&(&b.0, &b.1.name)));
        all
    }

    /// Call a tool on a server.
    ///
    /// On failure the child is checked: if it has exited, the server is
    /// marked dead and removed, so its tools disappear from routing.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, McpError> {
        let client = {
            let servers = self.servers.lock().await;
            let Some(server) = servers.get(server_name) else {
                return Err(McpError::Transport(format!(
                    "server '{server_name}' is not running"
                )));
            };
            std::sync::Arc::clone(&server.client)
        };

        match client.call_tool(tool_name, arguments, cancel).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.reap_if_dead(server_name).await;
                Err(e)
            }
        }
    }

    /// Remove the server when its child has terminated.
    async fn reap_if_dead(&self, server_name: &str) {
        let mut servers = self.servers.lock().await;
        let Some(server) = servers.get_mut(server_name) else {
            return;
        };
        match server.child.try_wait() {
            Ok(Some(status)) => {
                warn!(
                    server = %server_name,
                    status = %status,
                    "tool server died, removing"
                );
                servers.remove(server_name);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(server = %server_name, error = %e, "could not check child status");
            }
        }
    }

    /// Stop every server: close the client (stdin EOF), wait up to the
    /// grace period, then force-kill. All shutdowns run concurrently;
    /// returns when every child has stopped.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, ManagedServer)> = {
            let mut servers = self.servers.lock().await;
            servers.drain().collect()
        };

        let mut joins = tokio::task::JoinSet::new();
        for (name, mut server) in drained {
            joins.spawn(async move {
                server.client.close().await;
                match tokio::time::timeout(STOP_GRACE, server.child.wait()).await {
                    Ok(Ok(status)) => {
                        debug!(server = %name, status = %status, "tool server exited");
                    }
                    Ok(Err(e)) => {
                        warn!(server = %name, error = %e, "wait failed, killing");
                        let _ = server.child.start_kill();
                    }
                    Err(_) => {
                        warn!(server = %name, "tool server ignored shutdown, killing");
                        let _ = server.child.start_kill();
                        let _ = server.child.wait().await;
                    }
                }
            });
        }
        while joins.join_next().await.is_some() {}
        info!("all tool servers stopped");
    }
}
