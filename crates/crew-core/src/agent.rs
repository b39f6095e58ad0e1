//! The LLM tool-calling loop.
//!
//! A [`ToolLoop`] repeatedly calls the provider with the conversation so
//! far and the visible tool definitions, executes any requested tool
//! calls through the registry, and appends the results -- until the model
//! stops calling tools or the iteration cap is hit, at which point one
//! final call with no tools forces a textual summary.
//!
//! The loop is a function of (log, tools, system prompt): it mutates an
//! in-memory message list and mirrors every appended entry to a
//! [`LogSink`], which is how persistence stays a decorator. Because the
//! registry caches results by call id, a log that ends mid-turn (crash
//! between tool executions) can be resumed by re-executing the missing
//! calls.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crew_llm::client::LlmClient;
use crew_llm::error::ClassifiedError;
use crew_llm::types::{ChatMessage, ChatRequest, ToolCall};

use crate::tools::registry::ToolRegistry;

/// Cap on a single tool result fed back to the model, in characters.
const MAX_TOOL_RESULT_CHARS: usize = 8_000;

/// Marker appended to truncated tool output.
const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Receives every entry the loop appends, in order.
///
/// `ConversationStore` implements this; tests use an in-memory sink.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persist one appended entry.
    async fn append(&self, entry: &ChatMessage) -> crew_types::Result<()>;
}

#[async_trait]
impl LogSink for crate::conversation::ConversationStore {
    async fn append(&self, entry: &ChatMessage) -> crew_types::Result<()> {
        crate::conversation::ConversationStore::append(self, entry).await
    }
}

/// A sink that drops entries (pure in-memory runs).
pub struct NullSink;

#[async_trait]
impl LogSink for NullSink {
    async fn append(&self, _entry: &ChatMessage) -> crew_types::Result<()> {
        Ok(())
    }
}

/// Loop failure: either the provider gave up or persistence failed.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// The provider call failed after retries.
    #[error("provider: {0}")]
    Provider(#[from] ClassifiedError),

    /// Appending to the log sink failed.
    #[error("log sink: {0}")]
    Sink(#[from] crew_types::CrewError),
}

/// Tunables for the tool-calling loop.
#[derive(Debug, Clone)]
pub struct ToolLoopConfig {
    /// The model to request.
    pub model: String,
    /// Maximum model→tool→model round trips before forcing a summary.
    pub max_iterations: u32,
}

impl ToolLoopConfig {
    /// Config with the default iteration cap.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_iterations: 15,
        }
    }
}

/// The iterative tool-calling loop over one conversation.
pub struct ToolLoop<'a> {
    client: &'a LlmClient,
    registry: &'a ToolRegistry,
    config: ToolLoopConfig,
}

impl<'a> ToolLoop<'a> {
    /// Create a loop over the given client and (merged) registry.
    pub fn new(client: &'a LlmClient, registry: &'a ToolRegistry, config: ToolLoopConfig) -> Self {
        Self {
            client,
            registry,
            config,
        }
    }

    /// Run the loop until the model produces a final text.
    ///
    /// `messages` is the conversation log replayed from disk plus the
    /// new user message; the loop appends to it (and to `sink`) and
    /// returns the final assistant text.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        system_prompt: &str,
        messages: &mut Vec<ChatMessage>,
        sink: &dyn LogSink,
    ) -> Result<String, LoopError> {
        // A log that ends with unanswered tool calls (crash mid-turn) is
        // completed first; the registry's call-id cache makes this safe.
        self.resume_pending_calls(messages, sink).await?;

        for iteration in 0..self.config.max_iterations {
            let request = self
                .build_request(system_prompt, messages)
                .with_tools(self.registry.schemas());
            let response = self.client.chat(cancel, &request).await?;

            let Some(reply) = response.message().cloned() else {
                // Empty choices are classified upstream; defensive here.
                return Ok(String::new());
            };

            if response.is_stop() {
                let text = reply.content.clone();
                let entry = ChatMessage::assistant(&text);
                sink.append(&entry).await?;
                messages.push(entry);
                debug!(iteration, "tool loop complete");
                return Ok(text);
            }

            let calls = reply.tool_calls.clone().unwrap_or_default();
            debug!(iteration, tool_count = calls.len(), "executing tool calls");

            let entry = ChatMessage::assistant_tool_calls(reply.content.clone(), calls.clone());
            sink.append(&entry).await?;
            messages.push(entry);

            // Tool calls from one assistant turn run sequentially, in the
            // order the model returned them.
            for call in &calls {
                let entry = self.execute_one(call).await;
                sink.append(&entry).await?;
                messages.push(entry);
            }
        }

        // Iterations exhausted: one final call with no tools forces text.
        warn!(
            max_iterations = self.config.max_iterations,
            "iteration cap reached, forcing textual summary"
        );
        let request = self.build_request(system_prompt, messages);
        let response = self.client.chat(cancel, &request).await?;
        let text = response
            .message()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let entry = ChatMessage::assistant(&text);
        sink.append(&entry).await?;
        messages.push(entry);
        Ok(text)
    }

    fn build_request(&self, system_prompt: &str, messages: &[ChatMessage]) -> ChatRequest {
        let mut all = Vec::with_capacity(messages.len() + 1);
        all.push(ChatMessage::system(system_prompt));
        all.extend_from_slice(messages);
        ChatRequest::new(&self.config.model, all)
    }

    /// Execute one tool call and shape its result as a `tool` entry.
    async fn execute_one(&self, call: &ToolCall) -> ChatMessage {
        let result = self
            .registry
            .execute_call(&call.id, &call.function.name, &call.function.arguments)
            .await;
        let content = truncate_output(&result.content, MAX_TOOL_RESULT_CHARS);
        let content = if result.is_error {
            format!("ERROR: {content}")
        } else {
            content
        };
        ChatMessage::tool(&call.id, content)
    }

    /// Complete an assistant turn whose tool results are missing from the
    /// log tail.
    async fn resume_pending_calls(
        &self,
        messages: &mut Vec<ChatMessage>,
        sink: &dyn LogSink,
    ) -> Result<(), LoopError> {
        let Some(pending) = pending_tool_calls(messages) else {
            return Ok(());
        };
        warn!(
            pending = pending.len(),
            "resuming conversation with unanswered tool calls"
        );
        for call in pending {
            let entry = self.execute_one(&call).await;
            sink.append(&entry).await?;
            messages.push(entry);
        }
        Ok(())
    }
}

/// Tool calls of the last assistant turn that have no `tool` response yet.
fn pending_tool_calls(messages: &[ChatMessage]) -> Option<Vec<ToolCall>> {
    // Walk back over trailing tool responses to the assistant turn.
    let mut answered = std::collections::HashSet::new();
    let mut idx = messages.len();
    while idx > 0 && messages[idx - 1].role == "tool" {
        if let Some(id) = &messages[idx - 1].tool_call_id {
            answered.insert(id.clone());
        }
        idx -= 1;
    }
    let last = messages.get(idx.checked_sub(1)?)?;
    if last.role != "assistant" {
        return None;
    }
    let calls = last.tool_calls.as_ref()?;
    let missing: Vec<ToolCall> = calls
        .iter()
        .filter(|c| !answered.contains(&c.id))
        .cloned()
        .collect();
    if missing.is_empty() { None } else { Some(missing) }
}

/// Clamp tool output to `max_chars`, appending a truncation marker.
pub fn truncate_output(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let truncated: String = content.chars().take(max_chars).collect();
    format!("{truncated}{TRUNCATION_MARKER}")
}
