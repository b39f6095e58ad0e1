//! LLM provider client for crew.
//!
//! Talks to any OpenAI-compatible chat completion endpoint and layers the
//! reliability machinery the rest of the runtime depends on:
//!
//! - [`types`] -- request/response wire types in the OpenAI format
//! - [`error`] -- the classified error taxonomy
//! - [`provider`] -- the [`Provider`](provider::Provider) trait and the
//!   HTTP implementation in [`openai_compat`]
//! - [`retry`] -- per-error-kind retry budgets with jittered backoff
//! - [`breaker`] -- per-model circuit breakers
//! - [`client`] -- [`LlmClient`](client::LlmClient), which composes all of
//!   the above behind a single `chat` call

pub mod breaker;
pub mod client;
pub mod error;
pub mod openai_compat;
pub mod provider;
pub mod retry;
pub mod types;

pub use client::LlmClient;
pub use error::{ClassifiedError, ErrorKind};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::Provider;
pub use types::{ChatMessage, ChatRequest, ChatResponse, Choice, FunctionCall, ToolCall, Usage};
