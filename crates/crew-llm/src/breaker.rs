//! Per-model circuit breakers.
//!
//! Each model has an independent breaker. Three consecutive provider
//! faults open it; while open, calls for that model fail immediately
//! without touching the network. After a 30 second cooldown the breaker
//! admits exactly one probe: success closes it, failure reopens it.
//!
//! Client-side classifications (auth, content filter, context length)
//! are recorded as successes -- they say nothing about the provider's
//! health.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{ClassifiedError, ErrorKind};

/// Consecutive provider faults needed to open a breaker.
const FAILURE_THRESHOLD: u32 = 3;

/// How long an open breaker waits before admitting a probe.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Breaker state for one model.
#[derive(Debug)]
enum State {
    /// Normal operation; counts consecutive provider faults.
    Closed { consecutive_failures: u32 },
    /// Short-circuiting; `until` is when the cooldown elapses.
    Open { until: Instant },
    /// One probe in flight; other calls still short-circuit.
    HalfOpen,
}

/// Table of per-model circuit breakers.
///
/// Process-wide singleton, mutex-protected. Lock hold times are a few
/// map operations; no I/O happens under the lock.
#[derive(Debug)]
pub struct CircuitBreakers {
    states: Mutex<HashMap<String, State>>,
    cooldown: Duration,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl CircuitBreakers {
    /// Create a breaker table with the given open-state cooldown.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    /// Admission check for a call against `model`.
    ///
    /// Returns `Ok(())` when the call may proceed (closed, or admitted as
    /// the half-open probe) and a `CircuitOpen` error otherwise.
    pub fn check(&self, model: &str) -> Result<(), ClassifiedError> {
        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(model.to_string())
            .or_insert(State::Closed {
                consecutive_failures: 0,
            });

        match state {
            State::Closed { .. } => Ok(()),
            State::Open { until } => {
                if Instant::now() >= *until {
                    info!(model, "circuit breaker half-open, admitting probe");
                    *state = State::HalfOpen;
                    Ok(())
                } else {
                    Err(ClassifiedError::new(
                        ErrorKind::CircuitOpen,
                        format!("circuit breaker open for model '{model}'"),
                    ))
                }
            }
            State::HalfOpen => Err(ClassifiedError::new(
                ErrorKind::CircuitOpen,
                format!("circuit breaker probing model '{model}'"),
            )),
        }
    }

    /// Record a successful call for `model`.
    pub fn record_success(&self, model: &str) {
        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(model.to_string())
            .or_insert(State::Closed {
                consecutive_failures: 0,
            });
        if matches!(state, State::HalfOpen) {
            info!(model, "circuit breaker closed after successful probe");
        }
        *state = State::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a failed call for `model`.
    ///
    /// Breaker-neutral kinds reset the failure streak like a success:
    /// the provider answered, just not with what the client wanted.
    pub fn record_failure(&self, model: &str, kind: ErrorKind) {
        if !kind.is_provider_fault() {
            self.record_success(model);
            return;
        }

        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(model.to_string())
            .or_insert(State::Closed {
                consecutive_failures: 0,
            });

        match state {
            State::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= FAILURE_THRESHOLD {
                    warn!(
                        model,
                        failures = *consecutive_failures,
                        cooldown_secs = self.cooldown.as_secs(),
                        "circuit breaker opened"
                    );
                    *state = State::Open {
                        until: Instant::now() + self.cooldown,
                    };
                }
            }
            State::HalfOpen => {
                warn!(model, "probe failed, circuit breaker reopened");
                *state = State::Open {
                    until: Instant::now() + self.cooldown,
                };
            }
            State::Open { .. } => {
                // A call admitted before the breaker opened may report
                // late; the breaker is already open, nothing to do.
            }
        }
    }

    /// Whether the breaker for `model` is currently short-circuiting.
    pub fn is_open(&self, model: &str) -> bool {
        let states = self.states.lock().unwrap();
        matches!(
            states.get(model),
            Some(State::Open { .. }) | Some(State::HalfOpen)
        )
    }
}
