//! Thread message events delivered by the chat transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message received on a chat thread.
///
/// Immutable once constructed. The `event_id` deduplicates retransmits
/// from the transport: two deliveries with the same `event_id` are the
/// same message and must be handled at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    /// Transport-level event identifier (dedup key).
    pub event_id: String,

    /// Channel the message arrived on.
    pub channel: String,

    /// Thread identifier within the channel.
    pub thread_id: String,

    /// Message identifier within the thread.
    pub message_id: String,

    /// Sender identifier within the channel.
    pub sender_id: String,

    /// Message text content.
    pub text: String,

    /// When the message was sent.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ThreadMessage {
    /// Stable key for worker dispatch: all messages sharing a thread are
    /// processed sequentially by exactly one worker.
    pub fn thread_key(&self) -> &str {
        &self.thread_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ThreadMessage {
        ThreadMessage {
            event_id: "evt-1".into(),
            channel: "C123".into(),
            thread_id: "1700000000.000100".into(),
            message_id: "1700000000.000200".into(),
            sender_id: "U42".into(),
            text: "fix the flaky test".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn thread_key_is_thread_id() {
        let msg = sample();
        assert_eq!(msg.thread_key(), "1700000000.000100");
    }

    #[test]
    fn serde_roundtrip() {
        let msg = sample();
        let json = serde_json::to_string(&msg).unwrap();
        let restored: ThreadMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.event_id, msg.event_id);
        assert_eq!(restored.text, msg.text);
    }

    #[test]
    fn timestamp_defaults_when_missing() {
        let json = r#"{
            "event_id": "e1",
            "channel": "C1",
            "thread_id": "t1",
            "message_id": "m1",
            "sender_id": "u1",
            "text": "hi"
        }"#;
        let msg: ThreadMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.text, "hi");
    }
}
