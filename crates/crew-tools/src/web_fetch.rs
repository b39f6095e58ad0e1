//! Web fetch tool.
//!
//! Retrieves a URL and returns the body as text, truncated at 50,000
//! characters with a notice.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crew_core::tools::registry::{RiskTier, Tool, ToolError};

/// Character cap on returned page content.
const MAX_CONTENT_CHARS: usize = 50_000;

/// Fetch content from a URL.
pub struct WebFetchTool {
    http: reqwest::Client,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebFetchTool {
    /// Create a fetch tool with a 30 second request timeout.
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch content from a URL. Returns the response body as text, truncated for very large pages."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (http or https)"
                }
            },
            "required": ["url"]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Read
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: url".into()))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArgs(
                "url must start with http:// or https://".into(),
            ));
        }

        debug!(url, "fetching");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("fetch failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("read body failed: {e}")))?;

        let (content, truncated) = if body.chars().count() > MAX_CONTENT_CHARS {
            let clipped: String = body.chars().take(MAX_CONTENT_CHARS).collect();
            (
                format!("{clipped}\n\n[content truncated at {MAX_CONTENT_CHARS} characters]"),
                true,
            )
        } else {
            (body, false)
        };

        Ok(json!({
            "status": status,
            "url": url,
            "content": content,
            "truncated": truncated,
        }))
    }
}
