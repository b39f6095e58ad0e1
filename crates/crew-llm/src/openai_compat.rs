//! HTTP provider for OpenAI-compatible chat completion endpoints.
//!
//! Issues a `POST {base_url}/chat/completions` with bearer auth and maps
//! every failure through the classification table in [`crate::error`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crew_types::ProviderSettings;

use crate::error::{classify_http, classify_transport, ClassifiedError, ErrorKind, Result};
use crate::provider::Provider;
use crate::types::{ChatRequest, ChatResponse};

/// Provider that speaks the OpenAI chat completion protocol.
///
/// Works against any endpoint accepting the OpenAI request shape; point
/// `base_url` at OpenAI, a router, or a local server. The API key is
/// resolved from the environment variable named in the settings, or set
/// explicitly with [`with_api_key`](OpenAiCompatProvider::with_api_key).
pub struct OpenAiCompatProvider {
    settings: ProviderSettings,
    http: reqwest::Client,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    /// Create a provider from settings, with the given request timeout.
    pub fn new(settings: ProviderSettings, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            settings,
            http,
            api_key: None,
        }
    }

    /// Create a provider with an explicit API key (bypasses env lookup).
    pub fn with_api_key(settings: ProviderSettings, api_key: String) -> Self {
        let mut provider = Self::new(settings, Duration::from_secs(120));
        provider.api_key = Some(api_key);
        provider
    }

    /// The chat completions endpoint URL.
    fn completions_url(&self) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// Resolve the API key: explicit key > environment variable.
    fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.settings.api_key_env).map_err(|_| {
            ClassifiedError::new(
                ErrorKind::Auth,
                format!("set {} env var", self.settings.api_key_env),
            )
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let api_key = self.resolve_api_key()?;
        let url = self.completions_url();

        debug!(
            provider = %self.settings.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat completion request"
        );

        let mut req = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json");
        for (k, v) in &self.settings.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .json(request)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = parse_retry_after(&response);
            let body = response.text().await.unwrap_or_default();
            let classified = classify_http(status, &body, retry_after);
            warn!(
                provider = %self.settings.name,
                status,
                kind = classified.kind.as_str(),
                "chat completion request failed"
            );
            return Err(classified);
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(&e))?;

        let chat_response: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            ClassifiedError::new(
                ErrorKind::MalformedResponse,
                format!("failed to parse response: {e}"),
            )
            .with_status(status)
        })?;

        if chat_response.choices.is_empty() {
            return Err(ClassifiedError::new(
                ErrorKind::MalformedResponse,
                "response contained no choices",
            )
            .with_status(status));
        }

        debug!(
            provider = %self.settings.name,
            model = %chat_response.model,
            "chat completion response received"
        );

        Ok(chat_response)
    }
}

/// Parse the `Retry-After` header as whole seconds.
///
/// Only the numeric form is handled; the HTTP-date form is rare for API
/// providers.
fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|secs| secs.max(0.0).ceil() as u64)
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("name", &self.settings.name)
            .field("base_url", &self.settings.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> ProviderSettings {
        ProviderSettings {
            name: "test-provider".into(),
            base_url: "https://api.example.com/v1".into(),
            api_key_env: "CREW_TEST_NONEXISTENT_KEY".into(),
            model: "test-model".into(),
            headers: Default::default(),
        }
    }

    #[test]
    fn completions_url_construction() {
        let provider = OpenAiCompatProvider::new(test_settings(), Duration::from_secs(5));
        assert_eq!(
            provider.completions_url(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn completions_url_strips_trailing_slash() {
        let mut settings = test_settings();
        settings.base_url = "https://api.example.com/v1/".into();
        let provider = OpenAiCompatProvider::new(settings, Duration::from_secs(5));
        assert_eq!(
            provider.completions_url(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn resolve_api_key_explicit() {
        let provider = OpenAiCompatProvider::with_api_key(test_settings(), "sk-explicit".into());
        assert_eq!(provider.resolve_api_key().unwrap(), "sk-explicit");
    }

    #[test]
    fn resolve_api_key_missing_is_auth_error() {
        let provider = OpenAiCompatProvider::new(test_settings(), Duration::from_secs(5));
        let err = provider.resolve_api_key().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(err.message.contains("CREW_TEST_NONEXISTENT_KEY"));
    }

    #[test]
    fn debug_masks_api_key() {
        let provider =
            OpenAiCompatProvider::with_api_key(test_settings(), "sk-super-secret".into());
        let shown = format!("{provider:?}");
        assert!(!shown.contains("sk-super-secret"));
        assert!(shown.contains("***"));
    }
}
