//! Runtime wiring: one process, one role.
//!
//! Builds the shared pieces (sandbox, registry, LLM client, subprocess
//! manager, conflict detector) and the per-thread message handler that
//! replays the conversation log and runs the tool-calling loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crew_core::agent::{ToolLoop, ToolLoopConfig};
use crew_core::conflicts::ConflictDetector;
use crew_core::conversation::ConversationStore;
use crew_core::decision::{DecisionEntry, DecisionLog, DecisionType};
use crew_core::logbuf::{LogBuffer, LogRecord};
use crew_core::tools::registry::ToolRegistry;
use crew_core::transport::ChatTransport;
use crew_core::workers::MessageHandler;
use crew_llm::{LlmClient, OpenAiCompatProvider};
use crew_mcp::{load_server_configs, McpManager};
use crew_tools::sandbox::Sandbox;
use crew_types::{Config, Role, ThreadMessage};

/// Filename of the subprocess server config, relative to the workspace.
const MCP_SERVERS_FILE: &str = "mcp_servers.json";

/// Everything one agent process needs to serve messages.
pub struct App {
    pub role: Role,
    pub config: Config,
    pub registry: Arc<ToolRegistry>,
    pub client: Arc<LlmClient>,
    pub transport: Arc<dyn ChatTransport>,
    pub mcp: Arc<McpManager>,
    pub conflicts: Arc<ConflictDetector>,
    pub logs: Arc<LogBuffer>,
    pub workspace: PathBuf,
    pub cancel: CancellationToken,
}

impl App {
    /// Build the runtime: workspace dirs, native tools, subprocess
    /// discovery, LLM client.
    ///
    /// Fails only on genuinely fatal conditions (unwritable workspace,
    /// missing API key); individual tool server failures are logged and
    /// skipped.
    pub async fn build(
        role: Role,
        config: Config,
        transport: Arc<dyn ChatTransport>,
    ) -> anyhow::Result<Self> {
        let workspace = config.workspace_dir();
        tokio::fs::create_dir_all(&workspace).await?;

        // The provider key is required at startup, not at first use.
        if std::env::var(&config.provider.api_key_env).is_err() {
            anyhow::bail!(
                "required key missing: set {} in the environment",
                config.provider.api_key_env
            );
        }

        let sandbox = Sandbox::new(&workspace)
            .map_err(|e| anyhow::anyhow!("workspace sandbox: {e}"))?;

        let mut registry = ToolRegistry::new(role);
        crew_tools::register_all(&mut registry, &sandbox, Arc::clone(&transport), None)
            .map_err(|e| anyhow::anyhow!("tool registration: {e}"))?;

        // Subprocess servers: discovered once, merged behind the natives.
        let mcp = Arc::new(McpManager::new(Duration::from_secs(
            config.defaults.subprocess_timeout_secs,
        )));
        let server_configs = load_server_configs(&workspace.join(MCP_SERVERS_FILE))
            .map_err(|e| anyhow::anyhow!("server config: {e}"))?;
        if !server_configs.is_empty() {
            let started = mcp.start_all(&server_configs, role).await;
            info!(started, configured = server_configs.len(), "tool servers up");
            crew_mcp::bridge::register_discovered(&mcp, &mut registry).await;
        }

        let provider = OpenAiCompatProvider::new(
            config.provider.clone(),
            Duration::from_secs(config.defaults.request_timeout_secs),
        );
        let client = Arc::new(LlmClient::new(Arc::new(provider)));

        Ok(Self {
            role,
            config,
            registry: Arc::new(registry),
            client,
            transport,
            mcp,
            conflicts: Arc::new(ConflictDetector::new()),
            logs: Arc::new(LogBuffer::default()),
            workspace,
            cancel: CancellationToken::new(),
        })
    }
}

/// The per-message handler: replay log, run the loop, post the answer.
pub struct AgentHandler {
    pub app: Arc<App>,
    /// System prompt for this role.
    pub system_prompt: String,
}

impl AgentHandler {
    /// Branch name for a thread's worktree and logs.
    fn branch_for(thread_id: &str) -> String {
        let safe: String = thread_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        format!("thread-{safe}")
    }
}

#[async_trait]
impl MessageHandler for AgentHandler {
    async fn handle(&self, msg: ThreadMessage) {
        let app = &self.app;
        let branch = Self::branch_for(&msg.thread_id);

        app.conflicts.register_thread(&msg.thread_id, &branch);

        let store = match ConversationStore::open(&app.workspace, &branch, app.role).await {
            Ok(store) => store,
            Err(e) => {
                error!(thread_id = %msg.thread_id, error = %e, "cannot open conversation log");
                return;
            }
        };

        let mut messages = match store.load().await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(thread_id = %msg.thread_id, error = %e, "log replay failed, starting fresh");
                Vec::new()
            }
        };

        let user_entry = crew_llm::ChatMessage::user(&msg.text);
        if let Err(e) = store.append(&user_entry).await {
            error!(thread_id = %msg.thread_id, error = %e, "cannot append to conversation log");
            return;
        }
        messages.push(user_entry);

        // Audit the model choice for this task. With a single configured
        // provider the decision is trivial, but the trail is what later
        // review of an agent's behavior works from.
        let decisions = DecisionLog::open(&app.workspace, &branch, app.role).ok();
        if let Some(ref decisions) = decisions {
            let entry = DecisionEntry::new(
                app.role.as_str(),
                DecisionType::ModelSelected,
                msg.text.as_str(),
                app.config.provider.model.as_str(),
                "configured provider model",
            );
            if let Err(e) = decisions.append(&entry) {
                warn!(error = %e, "decision log append failed");
            }
        }

        let tool_loop = ToolLoop::new(
            &app.client,
            &app.registry,
            ToolLoopConfig {
                model: app.config.provider.model.clone(),
                max_iterations: app.config.defaults.max_tool_iterations,
            },
        );

        let reply = match tool_loop
            .run(&app.cancel, &self.system_prompt, &mut messages, &store)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                error!(thread_id = %msg.thread_id, error = %e, "tool loop failed");
                if let Some(ref decisions) = decisions {
                    let entry = DecisionEntry::new(
                        app.role.as_str(),
                        DecisionType::StuckDetected,
                        msg.text.as_str(),
                        "reported failure to the thread",
                        e.to_string(),
                    );
                    let _ = decisions.append(&entry);
                }
                format!("I hit an error and could not finish: {e}")
            }
        };

        record_touched_files(&app.conflicts, &msg.thread_id, &messages);
        app.logs.push(LogRecord::new(
            "info",
            "handler",
            format!("thread {} answered ({} chars)", msg.thread_id, reply.len()),
        ));

        if let Err(e) = app
            .transport
            .post_text(&msg.channel, &msg.thread_id, &reply)
            .await
        {
            error!(thread_id = %msg.thread_id, error = %e, "posting reply failed");
        }
    }
}

/// Feed file-mutating tool calls into the conflict detector.
///
/// The detector tracks which files each thread touches so overlapping
/// branches surface before merge time.
fn record_touched_files(conflicts: &ConflictDetector, thread_id: &str, messages: &[crew_llm::ChatMessage]) {
    for message in messages {
        let Some(calls) = &message.tool_calls else {
            continue;
        };
        for call in calls {
            if call.function.name != "write_file" && call.function.name != "edit_file" {
                continue;
            }
            if let Ok(args) = serde_json::from_str::<serde_json::Value>(&call.function.arguments) {
                if let Some(path) = args.get("path").and_then(|p| p.as_str()) {
                    conflicts.record_file(thread_id, path);
                }
            }
        }
    }
}

/// Default system prompt for a role.
pub fn system_prompt_for(role: Role) -> String {
    format!(
        "You are the {role} agent of a software team. \
         Work inside your branch worktree using the provided tools, \
         keep changes small, and report what you did."
    )
}
