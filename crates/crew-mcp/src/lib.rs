//! Subprocess tool servers over stdio JSON-RPC.
//!
//! A tool server is a child process speaking JSON-RPC 2.0, one message
//! per line, on stdin/stdout. This crate provides:
//!
//! - [`types`] -- the JSON-RPC wire structs
//! - [`client`] -- framing, request/response correlation, the initialize
//!   handshake, `tools/list` and `tools/call`
//! - [`manager`] -- lifecycle: role-filtered startup, crash detection,
//!   graceful-then-forced shutdown
//! - [`bridge`] -- wrapping discovered subprocess tools as registry
//!   [`Tool`](crew_core::tools::registry::Tool)s (native names win)

pub mod bridge;
pub mod client;
pub mod manager;
pub mod types;

pub use client::{McpClient, McpError, ToolDefinition};
pub use manager::{load_server_configs, McpManager, ServerConfig};

/// The protocol revision sent in the initialize handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
