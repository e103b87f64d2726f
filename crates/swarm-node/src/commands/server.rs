//! The `server` subcommand: full node wiring and the signal loop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use swarm_config::{ConfigHub, Settings};
use swarm_core::{ids, session_key, MessageBus, OutboundMessage};
use swarm_lane::{ChatRequest as LaneRequest, LaneManagerConfig};
use swarm_llm::{ChatProvider, DynamicProvider};
use swarm_runtime::{LlmRouter, Role, SubagentManager};
use swarm_server::{ClusterServer, PoolClient, PoolConfig, ServerConfig};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{daemon, wiring};

/// Arguments for `swarm server` (also carries the daemon group).
#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Daemon management action; omit to run in the foreground.
    #[command(subcommand)]
    pub action: Option<daemon::DaemonAction>,

    /// HTTP API port.
    #[arg(long, short)]
    pub port: Option<u16>,

    /// API key for auth (or NANOBOT_API_KEY env).
    #[arg(long)]
    pub api_key: Option<String>,

    /// Registry center URL (or SURVIVAL_API_URL env).
    #[arg(long)]
    pub registry: Option<String>,

    /// Path to agents.yaml (default: workspace/agents.yaml).
    #[arg(long)]
    pub agents: Option<PathBuf>,
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Run the serving node in the foreground until SIGINT/SIGTERM.
pub async fn run(args: ServerArgs) -> Result<()> {
    let settings = Settings::load(None).context("loading config")?;

    // Setting resolution: CLI flag → env var → config.json.
    let port = args
        .port
        .or_else(|| env_nonempty("NANOBOT_PORT").and_then(|p| p.parse().ok()))
        .or_else(|| (settings.gateway.port != 0).then_some(settings.gateway.port))
        .unwrap_or(18790);

    let workspace = wiring::resolve_workspace(&settings);
    std::fs::create_dir_all(&workspace).ok();

    let api_key = args
        .api_key
        .filter(|k| !k.is_empty())
        .or_else(|| {
            (!settings.survival.nanobot_api_key.is_empty())
                .then(|| settings.survival.nanobot_api_key.clone())
        })
        .or_else(|| env_nonempty("NANOBOT_API_KEY"))
        .unwrap_or_default();

    let registry_url = args
        .registry
        .filter(|u| !u.is_empty())
        .or_else(|| (!settings.survival.api_url.is_empty()).then(|| settings.survival.api_url.clone()))
        .or_else(|| env_nonempty("SURVIVAL_API_URL"))
        .unwrap_or_default();

    let registry_key = if !settings.survival.api_key.is_empty() {
        settings.survival.api_key.clone()
    } else {
        env_nonempty("SURVIVAL_API_KEY").unwrap_or_else(|| api_key.clone())
    };

    // Pool bootstrap: env id wins, then the backend, then a local id.
    let fingerprint = ids::generate_fingerprint();
    let pool = Arc::new(PoolClient::new(PoolConfig {
        backend_url: registry_url.clone(),
        api_key: api_key.clone(),
        port,
        model: settings.agent.model.clone(),
        tool_count: 0,
        fingerprint: fingerprint.clone(),
        self_url: None,
    }));
    let instance_id = if let Some(env_id) = env_nonempty("NANOBOT_INSTANCE_ID") {
        pool.set_instance_id(&env_id);
        env_id
    } else if !registry_url.is_empty() {
        info!("requesting instance id from backend");
        pool.bootstrap(port).await
    } else {
        let id = ids::synth_instance_id(port);
        pool.set_instance_id(&id);
        id
    };

    info!(instance = %instance_id, self_url = %pool.self_url(), %fingerprint, "starting node");
    if !workspace.as_os_str().is_empty() {
        info!(workspace = %workspace.display(), "workspace");
    }

    // Config hub: local fallback, then registry pull.
    let hub = Arc::new(
        ConfigHub::new(wiring::local_llm_config(&settings))
            .with_registry_url(&registry_url)
            .with_instance_id(&instance_id)
            .with_api_key(&registry_key),
    );
    if !registry_url.is_empty() {
        info!(registry = %registry_url, "fetching config from registry");
        if let Err(e) = hub.fetch().await {
            warn!(error = %e, "registry fetch failed, using local config");
        }
    } else {
        info!("using local config (no registry URL)");
    }

    // Provider with hot-swap on config change.
    let llm_cfg = hub.current();
    let dynamic = Arc::new(DynamicProvider::new(wiring::make_provider(&llm_cfg)));
    {
        let dynamic = dynamic.clone();
        hub.on_change(Box::new(move |new_cfg| {
            dynamic.swap(wiring::make_provider(new_cfg));
        }));
    }
    let provider: Arc<dyn ChatProvider> = dynamic.clone();

    let shutdown = CancellationToken::new();
    let bus = Arc::new(MessageBus::new());
    let sessions = Arc::new(swarm_runtime::SessionManager::new(&workspace));
    let subagents = SubagentManager::new(
        provider.clone(),
        &workspace,
        bus.clone(),
        llm_cfg.model.clone(),
    );

    // Agents.
    let agents_path = args
        .agents
        .unwrap_or_else(|| workspace.join("agents.yaml"));
    let tool_factory = wiring::make_tool_factory(&workspace, &bus, &subagents, &shutdown);
    let registry = wiring::build_registry(
        provider.clone(),
        sessions,
        &workspace,
        &llm_cfg.model,
        &agents_path,
        tool_factory,
    )?;

    // Hot agent updates pushed over the control channel land here too.
    {
        let registry = registry.clone();
        hub.on_change(Box::new(move |new_cfg| {
            for (agent_id, _) in &new_cfg.agent_overrides {
                let effective = new_cfg.resolve(agent_id);
                let patch = serde_json::json!({
                    "model": effective.model,
                    "temperature": effective.temperature,
                    "max_tokens": effective.max_tokens,
                });
                if let Err(e) = registry.register_or_update(agent_id, &patch) {
                    warn!(agent = %agent_id, error = %e, "agent override rejected");
                }
            }
        }));
    }

    // LLM router, when a dedicated router model is configured.
    let llm_router = if !settings.agent.router_model.is_empty() && registry.len() > 1 {
        let roles = registry
            .agent_ids()
            .into_iter()
            .filter_map(|id| {
                registry.get_spec(&id).map(|spec| Role {
                    id,
                    description: spec.description,
                })
            })
            .collect();
        Some(Arc::new(LlmRouter::new(
            roles,
            settings.agent.router_model.clone(),
            provider.clone(),
        )))
    } else {
        None
    };

    // Event rules (workspace/events/*.yaml), dispatched through the same
    // agent path as chat.
    let events = {
        let registry = registry.clone();
        Arc::new(swarm_runtime::events::EventEngine::new(Arc::new(
            move |content, session_key, channel, chat_id, role_id| {
                let registry = registry.clone();
                Box::pin(async move {
                    registry
                        .process_direct(&content, &session_key, &channel, &chat_id, &role_id)
                        .await
                })
            },
        )))
    };
    if let Err(e) = events.load_rules(&workspace.join("events")) {
        warn!(error = %e, "failed to load event rules");
    }

    // Cluster server.
    let mention_map = wiring::build_mention_map(&registry);
    let server = ClusterServer::new(ServerConfig {
        port,
        api_key,
        instance_id: instance_id.clone(),
        fingerprint,
        registry: registry.clone(),
        config_hub: hub.clone(),
        llm_router,
        mention_map,
        events: Some(events),
        lane: LaneManagerConfig::default(),
    });

    // Losing the last control connection re-registers with the pool.
    {
        let pool = pool.clone();
        let token = shutdown.clone();
        server.set_reregister(Box::new(move || {
            let pool = pool.clone();
            let token = token.clone();
            tokio::spawn(async move {
                pool.register_with_retry(&token).await;
            });
        }));
    }

    // Bus plumbing: outbound fan-out and the inbound drainer that routes
    // subagent announcements back through the lanes.
    {
        let bus_for_dispatch = bus.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            bus_for_dispatch.dispatch_outbound(token).await;
        });
    }
    if let Some(mut inbound) = bus.take_inbound() {
        let lanes = server.state().lanes.clone();
        let bus_out = bus.clone();
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
                // Subagent announcements address "<channel>:<chatId>".
                let (channel, chat_id) = msg
                    .chat_id
                    .split_once(':')
                    .map(|(c, i)| (c.to_string(), i.to_string()))
                    .unwrap_or_else(|| (msg.channel.clone(), msg.chat_id.clone()));
                let request = LaneRequest {
                    content: msg.content,
                    session_key: session_key(&channel, &chat_id),
                    channel: channel.clone(),
                    chat_id: chat_id.clone(),
                    ..LaneRequest::default()
                };
                match lanes.submit(request, None).await {
                    Ok(result) if result.error.is_none() => {
                        bus_out
                            .publish_outbound(OutboundMessage::new(
                                channel,
                                chat_id,
                                result.content,
                            ))
                            .await;
                    }
                    Ok(result) => {
                        warn!(error = ?result.error, "inbound dispatch failed");
                    }
                    Err(e) => warn!(error = %e, "inbound dispatch failed"),
                }
            }
        });
    }

    // Register with the pool, retrying in the background.
    {
        let pool = pool.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            pool.register_with_retry(&token).await;
        });
    }

    // The daemon supervisor owns the PID file when it spawned us; in a
    // plain foreground run, write our own.
    let owns_pid_file = !daemon::pid_file_path().exists();
    if owns_pid_file {
        daemon::write_pid(std::process::id())?;
    }

    let (_addr, serve_handle) = server.listen().await.context("starting listener")?;

    // Signal loop: SIGHUP re-pulls config; SIGINT/SIGTERM shut down.
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = sigint.recv() => break,
            _ = sigterm.recv() => break,
            _ = sighup.recv() => {
                info!("SIGHUP received, reloading config");
                if registry_url.is_empty() {
                    continue;
                }
                match hub.fetch().await {
                    Ok(()) => info!("config reloaded from registry"),
                    Err(e) => warn!(error = %e, "reload failed"),
                }
            }
        }
    }

    info!("shutting down");
    pool.unregister().await;
    server.stop();
    shutdown.cancel();
    let _ = serve_handle.await;
    if owns_pid_file {
        daemon::remove_pid();
    }
    Ok(())
}
