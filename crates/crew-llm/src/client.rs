//! The [`LlmClient`]: provider call + classification + retry + breaker.
//!
//! Layering, outermost first: breaker admission (checked once per call,
//! per model) → retry loop with per-kind budgets → one provider request
//! per attempt. Every attempt's outcome feeds the breaker so repeated
//! provider faults open it for subsequent calls.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::breaker::CircuitBreakers;
use crate::error::{ClassifiedError, Result};
use crate::provider::Provider;
use crate::retry::{base_delay, jitter, sleep_cancellable, RetryBudget};
use crate::types::{ChatRequest, ChatResponse};

/// Chat completion client with retry and circuit breaking.
///
/// Process-wide: workers share one instance. The breaker table is sharded
/// by model, so one misbehaving model does not block the others.
pub struct LlmClient {
    provider: Arc<dyn Provider>,
    breakers: CircuitBreakers,
}

impl LlmClient {
    /// Create a client over the given provider.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            breakers: CircuitBreakers::default(),
        }
    }

    /// Create a client with a custom breaker table (shorter cooldowns in
    /// tests).
    pub fn with_breakers(provider: Arc<dyn Provider>, breakers: CircuitBreakers) -> Self {
        Self { provider, breakers }
    }

    /// The breaker table, for callers that want to inspect model health
    /// before choosing a fallback model.
    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    /// Execute a chat completion with retries.
    ///
    /// Returns the response, or the last classified error once the
    /// failing kind's retry budget is exhausted. Cancellation interrupts
    /// the backoff sleep and surfaces the last error.
    pub async fn chat(
        &self,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        self.breakers.check(&request.model)?;

        let mut budget = RetryBudget::new();
        let mut attempt: u32 = 0;

        loop {
            match self.provider.complete(request).await {
                Ok(response) => {
                    self.breakers.record_success(&request.model);
                    if attempt > 0 {
                        debug!(
                            provider = %self.provider.name(),
                            model = %request.model,
                            attempt,
                            "request succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(err) => {
                    self.breakers.record_failure(&request.model, err.kind);

                    if !budget.try_consume(err.kind) {
                        return Err(err);
                    }

                    let delay = jitter(base_delay(&err, attempt));
                    warn!(
                        provider = %self.provider.name(),
                        model = %request.model,
                        kind = err.kind.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after classified error"
                    );

                    if sleep_cancellable(delay, cancel).await.is_err() {
                        return Err(err);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakers;
    use crate::error::ErrorKind;
    use crate::types::ChatMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Provider that fails `failures` times with `kind`, then succeeds.
    struct FlakyProvider {
        calls: AtomicU32,
        failures: u32,
        kind: ErrorKind,
        retry_after: Option<u64>,
    }

    impl FlakyProvider {
        fn new(failures: u32, kind: ErrorKind) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                kind,
                retry_after: None,
            }
        }

        fn success() -> ChatResponse {
            ChatResponse {
                id: "resp-1".into(),
                choices: vec![crate::types::Choice {
                    index: 0,
                    message: ChatMessage::assistant("ok"),
                    finish_reason: Some("stop".into()),
                }],
                usage: None,
                model: "test-model".into(),
            }
        }
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                let mut err = ClassifiedError::new(self.kind, "induced failure");
                err.retry_after_secs = self.retry_after;
                Err(err)
            } else {
                Ok(Self::success())
            }
        }
    }

    fn request_for(model: &str) -> ChatRequest {
        ChatRequest::new(model, vec![ChatMessage::user("hi")])
    }

    fn client(provider: FlakyProvider) -> (LlmClient, Arc<FlakyProvider>) {
        let provider = Arc::new(provider);
        // Long cooldown: these tests assert open-state behavior and must
        // not race the half-open transition.
        let client = LlmClient::with_breakers(
            provider.clone(),
            CircuitBreakers::new(Duration::from_secs(600)),
        );
        (client, provider)
    }

    #[tokio::test]
    async fn success_passes_through() {
        let (client, provider) = client(FlakyProvider::new(0, ErrorKind::Timeout));
        let cancel = CancellationToken::new();
        let resp = client.chat(&cancel, &request_for("m")).await.unwrap();
        assert_eq!(resp.message().unwrap().content, "ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_makes_exactly_six_requests() {
        // A provider that only ever rate-limits: 1 initial + 5 retries.
        let (client, provider) = client(FlakyProvider::new(u32::MAX, ErrorKind::RateLimit));
        let cancel = CancellationToken::new();
        let err = client.chat(&cancel, &request_for("m")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_then_success() {
        let (client, provider) = client(FlakyProvider::new(2, ErrorKind::RateLimit));
        let cancel = CancellationToken::new();
        let resp = client.chat(&cancel, &request_for("m")).await.unwrap();
        assert_eq!(resp.message().unwrap().content, "ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn context_too_long_retries_once() {
        let (client, provider) = client(FlakyProvider::new(u32::MAX, ErrorKind::ContextTooLong));
        let cancel = CancellationToken::new();
        let err = client.chat(&cancel, &request_for("m")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContextTooLong);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn auth_is_not_retried() {
        let (client, provider) = client(FlakyProvider::new(u32::MAX, ErrorKind::Auth));
        let cancel = CancellationToken::new();
        let err = client.chat(&cancel, &request_for("m")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_per_model() {
        let (client, _provider) = client(FlakyProvider::new(u32::MAX, ErrorKind::ProviderOverloaded));
        let cancel = CancellationToken::new();

        // One call burns through 6 attempts of 503s; three faults already
        // opened the breaker for model-a.
        let _ = client.chat(&cancel, &request_for("model-a")).await;
        let err = client.chat(&cancel, &request_for("model-a")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);

        // Model B is unaffected by A's breaker (the shared provider still
        // fails, but the request is admitted and reaches it).
        let err_b = client.chat(&cancel, &request_for("model-b")).await.unwrap_err();
        assert_ne!(err_b.kind, ErrorKind::CircuitOpen);
    }

    #[tokio::test]
    async fn repeated_auth_failures_never_open_breaker() {
        let (client, provider) = client(FlakyProvider::new(u32::MAX, ErrorKind::Auth));
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            let err = client.chat(&cancel, &request_for("m")).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::Auth);
        }
        // The fourth call still reaches the provider.
        let _ = client.chat(&cancel, &request_for("m")).await.unwrap_err();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let (client, provider) = client(FlakyProvider::new(u32::MAX, ErrorKind::ProviderOverloaded));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.chat(&cancel, &request_for("m")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProviderOverloaded);
        // One attempt, then the cancelled sleep surfaced the error.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
