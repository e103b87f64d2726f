//! # swarm
//!
//! The serving-node binary: wires the config hub, dynamic provider,
//! agent registry, session lanes, cluster server, and pool client, and
//! exposes the operator CLI.

#![deny(unsafe_code)]

mod commands;

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    LOCK.get_or_init(|| std::sync::Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Multi-agent LLM serving node.
#[derive(Parser, Debug)]
#[command(name = "swarm", about = "Multi-agent LLM serving node", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the workspace and a starter configuration.
    Onboard {
        /// Workspace directory (defaults to ~/.swarm/workspace).
        #[arg(long)]
        workspace: Option<std::path::PathBuf>,
    },
    /// Show configuration and local server status.
    Status,
    /// Talk to an agent directly: one-shot with a message, REPL without.
    Agent {
        /// The message to send; omit for an interactive session.
        message: Option<String>,
        /// Session key for history scoping.
        #[arg(long, default_value = "cli:direct")]
        session: String,
    },
    /// Run the message-bus gateway loop (stdin in, replies out).
    Gateway,
    /// Start the serving node (foreground), or manage the daemon.
    Server(commands::server::ServerArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Onboard { workspace } => commands::onboard::run(workspace),
        Command::Status => commands::status::run().await,
        Command::Agent { message, session } => commands::agent::run(message, &session).await,
        Command::Gateway => commands::gateway::run().await,
        Command::Server(args) => match args.action {
            Some(action) => commands::daemon::run(action, &args),
            None => commands::server::run(args).await,
        },
    }
}
