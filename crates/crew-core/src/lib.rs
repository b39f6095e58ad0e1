//! Core engine for the crew agent runtime.
//!
//! One process per agent role. The pieces here are wired together by the
//! CLI crate:
//!
//! - [`tools`] -- the `Tool` contract and the registry with per-role
//!   access control and an idempotent result cache
//! - [`workers`] -- per-thread worker tasks with bounded inboxes
//! - [`agent`] -- the LLM tool-calling loop over the conversation log
//! - [`conversation`] -- append-only per-(branch, role) message log
//! - [`decision`] -- append-only JSONL audit of choice points
//! - [`conflicts`] -- cross-branch file overlap detection
//! - [`transport`] -- the chat transport boundary trait
//! - [`logbuf`] -- bounded in-memory log ring with live subscribers

pub mod agent;
pub mod conflicts;
pub mod conversation;
pub mod decision;
pub mod logbuf;
pub mod tools;
pub mod transport;
pub mod workers;

pub use agent::{LogSink, LoopError, NullSink, ToolLoop, ToolLoopConfig};
pub use conflicts::{ConflictDetector, Overlap, OverlapKind, Severity};
pub use conversation::ConversationStore;
pub use decision::{DecisionEntry, DecisionLog, DecisionType};
pub use tools::registry::{RiskTier, Tool, ToolError, ToolRegistry, ToolResult};
pub use transport::{ChatTransport, ConnectionState};
pub use workers::{MessageHandler, WorkerRegistry};
