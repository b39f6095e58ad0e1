//! Error types for the crew runtime.
//!
//! [`CrewError`] is the top-level error for core operations. Component
//! crates keep their own error enums (tool, provider, subprocess) and
//! convert at the boundary.

use thiserror::Error;

/// Top-level error type for the crew runtime.
///
/// Variants split into recoverable (timeouts, transport hiccups) and
/// fatal (config, invocation, I/O) categories so callers can decide
/// whether a retry is worthwhile.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CrewError {
    /// An operation exceeded its deadline.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Human-readable name of the operation that timed out.
        operation: String,
    },

    /// The chat transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The process was invoked incorrectly (bad role, bad flags).
    #[error("invalid invocation: {0}")]
    Invocation(String),

    /// Configuration is missing or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CrewError>;
