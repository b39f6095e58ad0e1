//! The chat transport boundary.
//!
//! The core never implements a chat backend; it consumes this trait.
//! Inbound messages arrive by the integration calling
//! [`WorkerRegistry::dispatch`](crate::workers::WorkerRegistry::dispatch);
//! outbound traffic and connection state go through [`ChatTransport`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crew_types::Result;

/// Connection state of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    LoggedOut,
}

/// Outbound side of a chat integration.
///
/// Sends are the only place the core blocks on the transport, and they
/// are plain futures: dropping one (e.g. under a cancelled parent task)
/// abandons the send.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post text to a thread; returns the new message's id.
    async fn post_text(&self, channel: &str, thread_id: &str, text: &str) -> Result<String>;

    /// Upload binary content with a caption; returns the new message's id.
    async fn upload(
        &self,
        channel: &str,
        thread_id: &str,
        data: &[u8],
        caption: &str,
    ) -> Result<String>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Subscribe to connection state changes.
    fn state_changes(&self) -> watch::Receiver<ConnectionState>;
}
