//! Message tool: post text to the chat transport.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crew_core::tools::registry::{RiskTier, Tool, ToolError};
use crew_core::transport::ChatTransport;

/// Post a message to a chat thread.
///
/// Lets the agent speak mid-task (progress updates, questions) without
/// waiting for the final response. Chat posts are visible outside the
/// worktree, hence the tier.
pub struct SendMessageTool {
    transport: Arc<dyn ChatTransport>,
}

impl SendMessageTool {
    /// Create a send tool over the given transport.
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Post a message to a chat thread."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "channel": {
                    "type": "string",
                    "description": "Target channel"
                },
                "thread_id": {
                    "type": "string",
                    "description": "Target thread within the channel"
                },
                "text": {
                    "type": "string",
                    "description": "Message text"
                }
            },
            "required": ["channel", "thread_id", "text"]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::WriteVisible
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let channel = args
            .get("channel")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: channel".into()))?;
        let thread_id = args
            .get("thread_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: thread_id".into()))?;
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: text".into()))?;

        debug!(channel, thread_id, chars = text.len(), "posting message");

        let message_id = self
            .transport
            .post_text(channel, thread_id, text)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("post failed: {e}")))?;

        Ok(json!({
            "message_id": message_id,
            "channel": channel,
            "thread_id": thread_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_core::transport::ConnectionState;
    use std::sync::Mutex;
    use tokio::sync::watch;

    struct FakeTransport {
        posts: Mutex<Vec<(String, String, String)>>,
        state_tx: watch::Sender<ConnectionState>,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            let (state_tx, _) = watch::channel(ConnectionState::Connected);
            Arc::new(Self {
                posts: Mutex::new(Vec::new()),
                state_tx,
            })
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn post_text(
            &self,
            channel: &str,
            thread_id: &str,
            text: &str,
        ) -> crew_types::Result<String> {
            let mut posts = self.posts.lock().unwrap();
            posts.push((channel.into(), thread_id.into(), text.into()));
            Ok(format!("m{}", posts.len()))
        }

        async fn upload(
            &self,
            _channel: &str,
            _thread_id: &str,
            _data: &[u8],
            _caption: &str,
        ) -> crew_types::Result<String> {
            Ok("m0".into())
        }

        fn state(&self) -> ConnectionState {
            *self.state_tx.borrow()
        }

        fn state_changes(&self) -> watch::Receiver<ConnectionState> {
            self.state_tx.subscribe()
        }
    }

    #[tokio::test]
    async fn posts_and_returns_message_id() {
        let transport = FakeTransport::new();
        let tool = SendMessageTool::new(transport.clone());

        let result = tool
            .execute(json!({"channel": "C1", "thread_id": "t1", "text": "on it"}))
            .await
            .unwrap();
        assert_eq!(result["message_id"], "m1");
        assert_eq!(
            transport.posts.lock().unwrap()[0],
            ("C1".into(), "t1".into(), "on it".into())
        );
    }

    #[tokio::test]
    async fn missing_fields_rejected() {
        let tool = SendMessageTool::new(FakeTransport::new());
        for args in [
            json!({}),
            json!({"channel": "C1"}),
            json!({"channel": "C1", "thread_id": "t1"}),
        ] {
            let err = tool.execute(args).await.unwrap_err();
            assert!(matches!(err, ToolError::InvalidArgs(_)));
        }
    }

    #[test]
    fn tier_is_write_visible() {
        let tool = SendMessageTool::new(FakeTransport::new());
        assert_eq!(tool.risk_tier(), RiskTier::WriteVisible);
    }
}
