//! Retry budgets and jittered exponential backoff.
//!
//! Each [`ErrorKind`] carries its own retry budget (see
//! [`ErrorKind::retry_budget`]); the delay between attempts is
//! `min(2^attempt, 16)` seconds scaled by a random factor in `[0.5, 1.5)`.
//! Rate-limit errors that carry `Retry-After` use that instead of the
//! exponential base. The backoff sleep is cancellation-aware.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{ClassifiedError, ErrorKind};

/// Cap for the exponential backoff base, in seconds.
const MAX_BACKOFF_SECS: u64 = 16;

/// Compute the pre-jitter delay for retry attempt `attempt` (0-indexed).
pub fn base_delay(err: &ClassifiedError, attempt: u32) -> Duration {
    if err.kind == ErrorKind::RateLimit {
        if let Some(secs) = err.retry_after_secs {
            return Duration::from_secs(secs);
        }
    }
    let secs = 2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

/// Scale a delay by a pseudo-random factor in `[0.5, 1.5)`.
///
/// The factor is derived from the system clock's sub-second nanos, which
/// is plenty for decorrelating concurrent retry loops without pulling in
/// an RNG dependency.
pub fn jitter(delay: Duration) -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let factor = 0.5 + (nanos % 1000) as f64 / 1000.0;
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

/// Sleep for `delay`, returning early (Err) if `cancel` fires first.
pub async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> Result<(), ()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Tracks retries used per error kind within one logical call.
///
/// The budget is per-kind: a call that alternates between rate limits and
/// malformed responses may retry up to each kind's budget.
#[derive(Debug, Default)]
pub struct RetryBudget {
    used: HashMap<ErrorKind, u32>,
}

impl RetryBudget {
    /// Create an empty budget tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether another retry is allowed for an error of this kind.
    /// Consumes one unit of the kind's budget when allowed.
    pub fn try_consume(&mut self, kind: ErrorKind) -> bool {
        let used = self.used.entry(kind).or_insert(0);
        if *used < kind.retry_budget() {
            *used += 1;
            true
        } else {
            false
        }
    }

    /// Retries used so far for `kind`.
    pub fn used(&self, kind: ErrorKind) -> u32 {
        self.used.get(&kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: ErrorKind) -> ClassifiedError {
        ClassifiedError::new(kind, "test")
    }

    #[test]
    fn base_delay_is_exponential() {
        let e = err(ErrorKind::ProviderOverloaded);
        assert_eq!(base_delay(&e, 0), Duration::from_secs(1));
        assert_eq!(base_delay(&e, 1), Duration::from_secs(2));
        assert_eq!(base_delay(&e, 2), Duration::from_secs(4));
        assert_eq!(base_delay(&e, 3), Duration::from_secs(8));
    }

    #[test]
    fn base_delay_caps_at_16s() {
        let e = err(ErrorKind::ProviderOverloaded);
        assert_eq!(base_delay(&e, 4), Duration::from_secs(16));
        assert_eq!(base_delay(&e, 10), Duration::from_secs(16));
    }

    #[test]
    fn retry_after_overrides_exponential_for_rate_limit() {
        let mut e = err(ErrorKind::RateLimit);
        e.retry_after_secs = Some(3);
        assert_eq!(base_delay(&e, 4), Duration::from_secs(3));
    }

    #[test]
    fn retry_after_ignored_for_other_kinds() {
        let mut e = err(ErrorKind::Timeout);
        e.retry_after_secs = Some(3);
        assert_eq!(base_delay(&e, 0), Duration::from_secs(1));
    }

    #[test]
    fn rate_limit_without_header_uses_exponential() {
        let e = err(ErrorKind::RateLimit);
        assert_eq!(base_delay(&e, 2), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_in_half_open_range() {
        let base = Duration::from_millis(1000);
        for _ in 0..50 {
            let d = jitter(base).as_millis();
            assert!((500..1500).contains(&d), "jittered delay {d}ms out of range");
        }
    }

    #[test]
    fn budget_per_kind() {
        let mut budget = RetryBudget::new();
        for _ in 0..5 {
            assert!(budget.try_consume(ErrorKind::RateLimit));
        }
        assert!(!budget.try_consume(ErrorKind::RateLimit));
        // An independent kind still has headroom.
        assert!(budget.try_consume(ErrorKind::Timeout));
        assert!(!budget.try_consume(ErrorKind::Timeout));
    }

    #[test]
    fn non_retryable_kinds_have_no_budget() {
        let mut budget = RetryBudget::new();
        assert!(!budget.try_consume(ErrorKind::Auth));
        assert!(!budget.try_consume(ErrorKind::ContentFilter));
        assert!(!budget.try_consume(ErrorKind::Unknown));
    }

    #[test]
    fn context_too_long_retries_once() {
        let mut budget = RetryBudget::new();
        assert!(budget.try_consume(ErrorKind::ContextTooLong));
        assert!(!budget.try_consume(ErrorKind::ContextTooLong));
    }

    #[tokio::test]
    async fn sleep_completes_when_not_cancelled() {
        let cancel = CancellationToken::new();
        let result = sleep_cancellable(Duration::from_millis(1), &cancel).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn sleep_interrupted_by_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = sleep_cancellable(Duration::from_secs(30), &cancel).await;
        assert!(result.is_err());
    }
}
