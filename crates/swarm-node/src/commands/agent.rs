//! The `agent` subcommand: talk to an agent without the server — one
//! shot with a message argument, a line-oriented REPL without.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use swarm_config::Settings;
use swarm_core::MessageBus;
use swarm_runtime::SubagentManager;
use tokio_util::sync::CancellationToken;

use super::wiring;

/// Run a one-shot message or an interactive REPL.
pub async fn run(message: Option<String>, session: &str) -> Result<()> {
    let settings = Settings::load(None)?;
    let workspace = wiring::resolve_workspace(&settings);
    std::fs::create_dir_all(&workspace).ok();

    let llm_cfg = wiring::local_llm_config(&settings);
    let provider = wiring::make_provider(&llm_cfg);
    let bus = Arc::new(MessageBus::new());
    let sessions = Arc::new(swarm_runtime::SessionManager::new(&workspace));
    let subagents =
        SubagentManager::new(provider.clone(), &workspace, bus.clone(), llm_cfg.model.clone());
    let shutdown = CancellationToken::new();

    let registry = wiring::build_registry(
        provider,
        sessions,
        &workspace,
        &llm_cfg.model,
        &workspace.join("agents.yaml"),
        wiring::make_tool_factory(&workspace, &bus, &subagents, &shutdown),
    )?;

    if let Some(message) = message {
        let reply = registry
            .process_direct(&message, session, "cli", "direct", "general")
            .await?;
        println!("{reply}");
        return Ok(());
    }

    // REPL: one line per turn, empty line or EOF exits.
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    println!("interactive agent session ({session}) — empty line to exit");
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        match registry
            .process_direct(line, session, "cli", "direct", "general")
            .await
        {
            Ok(reply) => println!("{reply}"),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    shutdown.cancel();
    Ok(())
}
