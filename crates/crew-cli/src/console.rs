//! Console transport: stdin in, stdout out.
//!
//! The in-repo chat transport. Each stdin line becomes a
//! [`ThreadMessage`] on the `console` channel; outbound posts print to
//! stdout. Real chat integrations implement the same
//! [`ChatTransport`] trait out of tree.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crew_core::transport::{ChatTransport, ConnectionState};
use crew_types::{Result, ThreadMessage};

/// Channel name used for console messages.
pub const CONSOLE_CHANNEL: &str = "console";

/// Thread id used for console messages.
pub const CONSOLE_THREAD: &str = "console";

/// Transport over the process's own stdin/stdout.
pub struct ConsoleTransport {
    state_tx: watch::Sender<ConnectionState>,
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleTransport {
    /// Create a connected console transport.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        Self { state_tx }
    }

    /// Build a [`ThreadMessage`] from one console input line.
    pub fn message_from_line(line: &str) -> ThreadMessage {
        let id = Uuid::new_v4().to_string();
        ThreadMessage {
            event_id: id.clone(),
            channel: CONSOLE_CHANNEL.to_string(),
            thread_id: CONSOLE_THREAD.to_string(),
            message_id: id,
            sender_id: "operator".to_string(),
            text: line.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn post_text(&self, _channel: &str, thread_id: &str, text: &str) -> Result<String> {
        println!("[{thread_id}] {text}");
        Ok(Uuid::new_v4().to_string())
    }

    async fn upload(
        &self,
        _channel: &str,
        thread_id: &str,
        data: &[u8],
        caption: &str,
    ) -> Result<String> {
        println!("[{thread_id}] ({} bytes) {caption}", data.len());
        Ok(Uuid::new_v4().to_string())
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}
