//! termsense-mcp: MCP stdio server for semantic terminal sessions.
//!
//! Launched by an MCP client (e.g. an AI agent runtime). Logs go to
//! stderr; stdout carries JSON-RPC.

use clap::Parser;
use std::time::Duration;

use termsense_core::{ManagerConfig, SessionManager};
use termsense_mcp::{ManagerHandler, McpServer};

#[derive(Parser, Debug)]
#[command(name = "termsense-mcp", version, about = "MCP server for semantic terminal sessions")]
struct Args {
    /// Maximum concurrent sessions
    #[arg(long, default_value_t = 10)]
    max_sessions: usize,

    /// Idle seconds after which a session is evicted
    #[arg(long, default_value_t = 30 * 60)]
    idle_timeout_secs: u64,

    /// Preset used when term_create does not name one
    #[arg(long, default_value = "shell")]
    default_preset: String,

    /// Directory for per-session log files (<log-dir>/<session_id>.log)
    #[arg(long)]
    log_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        max_sessions = args.max_sessions,
        idle_timeout_secs = args.idle_timeout_secs,
        default_preset = %args.default_preset,
        log_dir = ?args.log_dir,
        "termsense-mcp starting"
    );

    let manager = SessionManager::with_config(ManagerConfig {
        max_sessions: args.max_sessions,
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        ..ManagerConfig::default()
    });

    let handler =
        ManagerHandler::new(manager.clone(), args.default_preset).with_log_dir(args.log_dir);
    let mut server = McpServer::new(handler);
    server.run().await?;

    tracing::info!("shutting down, destroying sessions");
    manager.destroy_all().await;
    Ok(())
}
