//! Line-framed JSON-RPC client for subprocess tool servers.
//!
//! Requests are serialized one-per-line and written under a single
//! writer lock; a background reader task parses stdout lines and
//! delivers each response to the pending caller registered under its
//! `id`. When the reader exits (EOF, closed pipe), every pending entry
//! is resolved with a transport error.
//!
//! The client is stream-generic: production wires it to a child
//! process's stdin/stdout, tests to an in-memory duplex pipe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::PROTOCOL_VERSION;

/// Errors from subprocess tool communication.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Spawning or wiring the child process failed.
    #[error("spawn failed: {0}")]
    Spawn(#[from] std::io::Error),

    /// The stdio pipe broke or closed before a response arrived.
    #[error("transport: {0}")]
    Transport(String),

    /// The server answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code.
        code: i32,
        /// Server-supplied message.
        message: String,
    },

    /// No response within the deadline.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// The call was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// The server's response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A tool advertised by a server's `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (unqualified; the bridge namespaces it).
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's input.
    #[serde(rename = "inputSchema", alias = "input_schema", default)]
    pub input_schema: serde_json::Value,
}

/// Server identity returned by the initialize handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    #[serde(default)]
    pub name: String,
    /// Server version.
    #[serde(default)]
    pub version: String,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// JSON-RPC client over a line-framed byte stream pair.
pub struct McpClient {
    writer: Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl McpClient {
    /// Create a client over a writer/reader pair and start the
    /// background response reader.
    pub fn new(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        reader: impl AsyncRead + Send + Unpin + 'static,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(response) => {
                                let mut map = reader_pending.lock().await;
                                if let Some(tx) = map.remove(&response.id) {
                                    let _ = tx.send(response);
                                } else {
                                    warn!(id = response.id, "response with no pending request");
                                }
                            }
                            Err(e) => {
                                // Server notification or malformed line.
                                debug!(error = %e, "ignoring non-response line");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("server closed stdout");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "read error, reader exiting");
                        break;
                    }
                }
            }
            // Resolve everything still in flight with a read error: the
            // oneshot senders are dropped, which the callers observe.
            let mut map = reader_pending.lock().await;
            map.clear();
        });

        Arc::new(Self {
            writer: Mutex::new(Some(Box::new(writer))),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
        })
    }

    /// Send a request and await its correlated response.
    ///
    /// Races the response against cancellation and the request timeout;
    /// either path removes the pending entry.
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let mut line = serde_json::to_string(&request)
            .map_err(|e| McpError::InvalidResponse(e.to_string()))?;
        line.push('\n');

        let (tx, rx) = oneshot::channel::<JsonRpcResponse>();
        {
            let mut map = self.pending.lock().await;
            map.insert(id, tx);
        }

        debug!(method, id, "sending request");
        if let Err(e) = self.write_line(&line).await {
            let mut map = self.pending.lock().await;
            map.remove(&id);
            return Err(e);
        }

        let response = tokio::select! {
            received = rx => match received {
                Ok(response) => response,
                Err(_) => {
                    return Err(McpError::Transport(
                        "server closed before responding".into(),
                    ));
                }
            },
            _ = cancel.cancelled() => {
                let mut map = self.pending.lock().await;
                map.remove(&id);
                return Err(McpError::Cancelled);
            }
            _ = tokio::time::sleep(self.request_timeout) => {
                let mut map = self.pending.lock().await;
                map.remove(&id);
                return Err(McpError::Timeout(self.request_timeout.as_secs()));
            }
        };

        if let Some(err) = response.error {
            return Err(McpError::Protocol {
                code: err.code,
                message: err.message,
            });
        }
        response
            .result
            .ok_or_else(|| McpError::InvalidResponse("empty result".into()))
    }

    /// Send a notification (no response awaited).
    pub async fn notify(&self, method: &str, params: serde_json::Value) -> Result<(), McpError> {
        let notif = JsonRpcNotification::new(method, params);
        let mut line = serde_json::to_string(&notif)
            .map_err(|e| McpError::InvalidResponse(e.to_string()))?;
        line.push('\n');
        debug!(method, "sending notification");
        self.write_line(&line).await
    }

    /// Run the initialize handshake, then announce readiness.
    pub async fn initialize(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ServerInfo, McpError> {
        let result = self
            .call(
                "initialize",
                serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "clientInfo": {
                        "name": "crew",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {},
                }),
                cancel,
            )
            .await?;

        let info: ServerInfo =
            serde_json::from_value(result.get("serverInfo").cloned().unwrap_or_default())
                .unwrap_or_default();

        self.notify("notifications/initialized", serde_json::json!({}))
            .await?;
        Ok(info)
    }

    /// Discover the server's tools.
    pub async fn list_tools(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolDefinition>, McpError> {
        let result = self.call("tools/list", serde_json::json!({}), cancel).await?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Array(vec![]));
        serde_json::from_value(tools).map_err(|e| McpError::InvalidResponse(e.to_string()))
    }

    /// Invoke a tool on the server, returning the raw result object.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, McpError> {
        self.call(
            "tools/call",
            serde_json::json!({ "name": name, "arguments": arguments }),
            cancel,
        )
        .await
    }

    /// Close the write side. For a child process this is stdin EOF, the
    /// conventional shutdown signal for stdio servers.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Some(mut w) = writer.take() {
            let _ = w.shutdown().await;
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), McpError> {
        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(McpError::Transport("client closed".into()));
        };
        w.write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(format!("write failed: {e}")))?;
        w.flush()
            .await
            .map_err(|e| McpError::Transport(format!("flush failed: {e}")))
    }
}
