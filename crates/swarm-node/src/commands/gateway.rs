//! The `gateway` subcommand: run the message-bus loop without the HTTP
//! server. Stdin lines become inbound messages; replies print to stdout.
//! Useful for wiring external channel adapters during development.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Result;
use swarm_config::Settings;
use swarm_core::{InboundMessage, MessageBus};
use swarm_runtime::SubagentManager;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::wiring;

/// Run the bus-driven gateway loop until EOF or Ctrl-C.
pub async fn run() -> Result<()> {
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

    // Replies to the cli channel print to stdout.
    bus.subscribe("cli", Box::new(|msg| println!("{}", msg.content)));
    {
        let bus = bus.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            bus.dispatch_outbound(token).await;
        });
    }

    // Inbound consumer: every message (stdin or subagent announcement)
    // goes through the registry and back out on its channel.
    let Some(mut inbound) = bus.take_inbound() else {
        return Ok(());
    };
    {
        let bus = bus.clone();
        let registry = registry.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    () = token.cancelled() => return,
                    msg = inbound.recv() => match msg {
                        Some(m) => m,
                        None => return,
                    },
                };
                let key = msg.session_key();
                match registry
                    .process_direct(&msg.content, &key, &msg.channel, &msg.chat_id, "general")
                    .await
                {
                    Ok(reply) => {
                        bus.publish_outbound(swarm_core::OutboundMessage::new(
                            msg.channel,
                            msg.chat_id,
                            reply,
                        ))
                        .await;
                    }
                    Err(e) => warn!(error = %e, "gateway dispatch failed"),
                }
            }
        });
    }

    // Blocking stdin reader feeding the bus.
    let stdin_bus = bus.clone();
    let reader = tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let msg = InboundMessage::new("cli", "operator", "gateway", line);
            // Block the reader thread, not the runtime.
            let bus = stdin_bus.clone();
            let handle = tokio::runtime::Handle::current();
            handle.block_on(async move { bus.publish_inbound(msg).await });
        }
    });

    tokio::select! {
        _ = reader => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    shutdown.cancel();
    Ok(())
}
