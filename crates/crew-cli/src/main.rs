//! `crew` -- per-role agent process.
//!
//! One process per agent role, all sharing this binary:
//!
//! ```text
//! crew --role coder
//! ```
//!
//! The process attaches to its chat transport (the console, in-repo),
//! dispatches messages to per-thread workers, and answers through the
//! LLM tool-calling loop. Exit codes: 0 clean, 1 invalid invocation,
//! 2 fatal startup failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crew_core::workers::WorkerRegistry;
use crew_types::{Config, Role};

mod app;
mod console;

use app::{system_prompt_for, AgentHandler, App};
use console::ConsoleTransport;

/// Per-role agent process for multi-agent chat orchestration.
#[derive(Parser)]
#[command(
    name = "crew",
    version,
    about = "Per-role agent process",
    long_about = "Runs one agent role against the chat transport.\n\
                  Roles: pm, coder, reviewer, researcher, artist, lead."
)]
struct Cli {
    /// Agent role to run (pm, coder, reviewer, researcher, artist, lead).
    #[arg(long)]
    role: Option<String>,

    /// Config file path (default: ./crew.toml, then ~/.crew/crew.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Invalid invocation (no role, unknown role) is exit code 1.
    let Some(role_arg) = cli.role else {
        eprintln!("error: --role is required (pm, coder, reviewer, researcher, artist, lead)");
        return ExitCode::from(1);
    };
    let role: Role = match role_arg.parse() {
        Ok(role) => role,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: cannot start runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(role, cli.config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Anything fatal during startup or serving.
            error!(error = %e, "fatal");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(role: Role, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::discover(config_path.as_deref())?;

    let transport = Arc::new(ConsoleTransport::new());
    let app = Arc::new(App::build(role, config, transport.clone()).await?);

    let handler = Arc::new(AgentHandler {
        app: Arc::clone(&app),
        system_prompt: system_prompt_for(role),
    });
    let workers = Arc::new(WorkerRegistry::with_limits(
        handler,
        app.config.defaults.inbox_capacity,
        Duration::from_secs(app.config.defaults.worker_idle_secs),
    ));

    info!(role = %role, workspace = %app.workspace.display(), "crew agent ready");

    // First signal: graceful shutdown. Second: force exit.
    let cancel = app.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, draining");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("forced exit");
                std::process::exit(1);
            }
        }
    });

    // Console intake: each line is one thread message.
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = app.cancel.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) if !line.trim().is_empty() => {
                    workers.dispatch(ConsoleTransport::message_from_line(line.trim()));
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    // Drain workers, then tear down tool servers.
    let grace = Duration::from_secs(app.config.defaults.shutdown_grace_secs);
    workers.shutdown(grace).await;
    app.mcp.stop_all().await;
    info!("clean shutdown");
    Ok(())
}
