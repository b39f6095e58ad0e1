//! Web search tool.
//!
//! Queries a configurable search API endpoint and normalizes the
//! results into `{title, url, snippet}` triples. Degrades gracefully
//! when no endpoint is configured.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crew_core::tools::registry::{RiskTier, Tool, ToolError};

/// Search the web via a configured API endpoint.
///
/// The endpoint receives `GET {endpoint}?q={query}&limit={n}` and must
/// return a JSON array of objects carrying `title`, `url`, and
/// `snippet` (or `description`) fields, either at the top level or
/// under a `results` key.
pub struct WebSearchTool {
    http: reqwest::Client,
    endpoint: Option<String>,
}

impl WebSearchTool {
    /// Create a search tool. With `endpoint: None` the tool reports
    /// itself unconfigured instead of erroring.
    pub fn new(endpoint: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { http, endpoint }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns a list of results with title, url, and snippet."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    fn risk_tier(&self) -> RiskTier {
        RiskTier::Read
    }

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required field: query".into()))?;
        let num_results = args
            .get("num_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(5) as usize;

        let Some(endpoint) = self.endpoint.as_deref().filter(|e| !e.is_empty()) else {
            return Ok(json!({
                "error": "web search not configured",
                "message": "no search API endpoint is configured",
                "query": query,
            }));
        };

        debug!(query, num_results, "searching");
        let response = self
            .http
            .get(endpoint)
            .query(&[("q", query), ("limit", &num_results.to_string())])
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::ExecutionFailed(format!(
                "search API returned status {status}"
            )));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("bad search response: {e}")))?;

        let raw_results = parsed
            .get("results")
            .and_then(|v| v.as_array())
            .cloned()
            .or_else(|| parsed.as_array().cloned())
            .unwrap_or_default();

        let results: Vec<serde_json::Value> = raw_results
            .iter()
            .take(num_results)
            .map(|item| {
                json!({
                    "title": item.get("title").and_then(|v| v.as_str()).unwrap_or(""),
                    "url": item.get("url").and_then(|v| v.as_str()).unwrap_or(""),
                    "snippet": item
                        .get("snippet")
                        .or_else(|| item.get("description"))
                        .and_then(|v| v.as_str())
                        .unwrap_or(""),
                })
            })
            .collect();

        Ok(json!({ "query": query, "results": results }))
    }
}
