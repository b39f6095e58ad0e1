//! Shared types for the crew agent runtime.
//!
//! This crate is the dependency root of the workspace: it holds the closed
//! [`Role`] set with its tool-restriction table, the [`ThreadMessage`]
//! event type delivered by chat transports, process configuration loading,
//! and the top-level [`CrewError`] type.

pub mod config;
pub mod error;
pub mod message;
pub mod role;

pub use config::{Config, Defaults, ProviderSettings};
pub use error::{CrewError, Result};
pub use message::ThreadMessage;
pub use role::Role;
