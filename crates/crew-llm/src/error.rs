//! Classified provider errors.
//!
//! Every failed provider call is reduced to a [`ClassifiedError`] whose
//! [`ErrorKind`] drives the retry budget and the circuit breaker. The
//! classification table (HTTP status + body markers) lives in
//! [`classify_http`].

use thiserror::Error;

/// The closed set of provider error classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// HTTP 429. Carries `Retry-After` when the provider sends one.
    RateLimit,
    /// HTTP 502/503: the provider is temporarily unable to serve.
    ProviderOverloaded,
    /// The request exceeded the model's context window.
    ContextTooLong,
    /// The provider's safety layer rejected the request.
    ContentFilter,
    /// HTTP 401/403: key invalid or unauthorized.
    Auth,
    /// A 200 response that could not be used (bad JSON, empty choices).
    MalformedResponse,
    /// The request or its context deadline timed out.
    Timeout,
    /// The per-model circuit breaker is open; no request was made.
    CircuitOpen,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// How many retries this classification earns.
    pub fn retry_budget(&self) -> u32 {
        match self {
            ErrorKind::RateLimit => 5,
            ErrorKind::ProviderOverloaded => 5,
            ErrorKind::MalformedResponse => 3,
            ErrorKind::ContextTooLong => 1,
            ErrorKind::Timeout => 1,
            ErrorKind::ContentFilter
            | ErrorKind::Auth
            | ErrorKind::CircuitOpen
            | ErrorKind::Unknown => 0,
        }
    }

    /// Whether this classification counts as a provider fault for the
    /// circuit breaker. Client-side errors (auth, content filter,
    /// context length) are breaker-neutral, as is a breaker-open
    /// short-circuit itself.
    pub fn is_provider_fault(&self) -> bool {
        !matches!(
            self,
            ErrorKind::Auth
                | ErrorKind::ContentFilter
                | ErrorKind::ContextTooLong
                | ErrorKind::CircuitOpen
        )
    }

    /// Wire name of this classification.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ProviderOverloaded => "provider_overloaded",
            ErrorKind::ContextTooLong => "context_too_long",
            ErrorKind::ContentFilter => "content_filter",
            ErrorKind::Auth => "auth",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// A provider failure reduced to its classification.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", .kind.as_str())]
pub struct ClassifiedError {
    /// The classification driving retry and breaker behavior.
    pub kind: ErrorKind,
    /// HTTP status of the failed response, when one was received.
    pub http_status: Option<u16>,
    /// Provider-supplied or synthesized message.
    pub message: String,
    /// `Retry-After` in seconds, for rate-limit responses that carry it.
    pub retry_after_secs: Option<u64>,
}

impl ClassifiedError {
    /// Create an error with just a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            http_status: None,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Attach the HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

/// Convenience alias for provider operations.
pub type Result<T> = std::result::Result<T, ClassifiedError>;

/// Body markers that indicate a context-window overflow on HTTP 400.
const CONTEXT_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "too many tokens",
];

/// Body markers that indicate a content-policy rejection on HTTP 400.
const CONTENT_FILTER_MARKERS: &[&str] = &["content_filter", "content_policy", "flagged"];

/// Classify a non-success HTTP response.
///
/// `retry_after_secs` is the parsed `Retry-After` header, if present.
pub fn classify_http(status: u16, body: &str, retry_after_secs: Option<u64>) -> ClassifiedError {
    let message = extract_error_message(body).unwrap_or_else(|| body.to_string());
    match status {
        429 => ClassifiedError {
            kind: ErrorKind::RateLimit,
            http_status: Some(status),
            message,
            retry_after_secs,
        },
        502 | 503 => {
            ClassifiedError::new(ErrorKind::ProviderOverloaded, message).with_status(status)
        }
        401 | 403 => ClassifiedError::new(ErrorKind::Auth, message).with_status(status),
        400 => {
            let lower = body.to_lowercase();
            if CONTEXT_MARKERS.iter().any(|m| lower.contains(m)) {
                ClassifiedError::new(ErrorKind::ContextTooLong, message).with_status(status)
            } else if CONTENT_FILTER_MARKERS.iter().any(|m| lower.contains(m)) {
                ClassifiedError::new(ErrorKind::ContentFilter, message).with_status(status)
            } else {
                ClassifiedError::new(ErrorKind::Unknown, message).with_status(status)
            }
        }
        _ => ClassifiedError::new(ErrorKind::Unknown, message).with_status(status),
    }
}

/// Classify a transport-level reqwest failure.
pub fn classify_transport(err: &reqwest::Error) -> ClassifiedError {
    if err.is_timeout() {
        ClassifiedError::new(ErrorKind::Timeout, err.to_string())
    } else {
        ClassifiedError::new(ErrorKind::Unknown, err.to_string())
    }
}

/// Pull the human-readable message out of an `{"error": {...}}` body.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .map(String::from)
        .or_else(|| error.as_str().map(String::from))
}
