//! The [`Provider`] trait for chat completion backends.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse};

/// A backend that can execute chat completion requests.
///
/// The production implementation is
/// [`OpenAiCompatProvider`](crate::openai_compat::OpenAiCompatProvider);
/// tests substitute counting mocks. Retry and circuit breaking live above
/// this trait in [`LlmClient`](crate::client::LlmClient), so an
/// implementation only has to do one request and classify its failure.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Execute a single chat completion request.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
