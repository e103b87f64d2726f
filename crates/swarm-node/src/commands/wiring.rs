//! Shared construction helpers: environment resolution, provider
//! creation, tool sets, and agent registration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use swarm_config::{LlmConfig, Settings};
use swarm_core::MessageBus;
use swarm_llm::{catalog, ChatProvider, OpenAiProvider};
use swarm_runtime::registry::{load_agent_specs, AgentSpec, RegistryConfig, ToolFactory};
use swarm_runtime::{AgentRegistry, SessionManager, SubagentManager};
use swarm_server::routing::extract_agent_name;
use swarm_tools::fs::{ListDirTool, ReadFileTool, WriteFileTool};
use swarm_tools::message::{MessageTool, SpawnTool};
use swarm_tools::shell::ExecTool;
use swarm_tools::web::{WebFetchTool, WebSearchTool};
use swarm_tools::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Resolve the workspace directory: settings, then `NANOBOT_WORKSPACE`,
/// then `~/.swarm/workspace`.
pub fn resolve_workspace(settings: &Settings) -> PathBuf {
    if !settings.agent.workspace.is_empty() {
        return PathBuf::from(&settings.agent.workspace);
    }
    if let Ok(ws) = std::env::var("NANOBOT_WORKSPACE") {
        if !ws.is_empty() {
            return PathBuf::from(ws);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".swarm").join("workspace")
}

/// Seed [`LlmConfig`] from local settings (layer 1 of the hub).
pub fn local_llm_config(settings: &Settings) -> LlmConfig {
    LlmConfig {
        model: settings.agent.model.clone(),
        temperature: settings.agent.temperature,
        max_tokens: settings.agent.max_tokens,
        ..LlmConfig::default()
    }
}

/// Build a concrete provider from the hub's current config. The API key
/// falls back to the provider catalog's env key, then to the common
/// gateway/provider env keys.
pub fn make_provider(cfg: &LlmConfig) -> Arc<dyn ChatProvider> {
    let mut api_key = cfg.api_key.clone();
    if api_key.is_empty() {
        if let Some(spec) = catalog::find_by_model(&cfg.model) {
            api_key = std::env::var(spec.env_key).unwrap_or_default();
        }
    }
    if api_key.is_empty() {
        for env_key in ["OPENROUTER_API_KEY", "OPENAI_API_KEY", "ANTHROPIC_API_KEY"] {
            if let Ok(value) = std::env::var(env_key) {
                if !value.is_empty() {
                    api_key = value;
                    break;
                }
            }
        }
    }
    Arc::new(OpenAiProvider::new(
        api_key,
        cfg.api_base.clone(),
        cfg.model.clone(),
        &cfg.provider,
    ))
}

/// Build the default tool factory: the full tool set, filtered by each
/// spec's whitelist when present.
pub fn make_tool_factory(
    workspace: &Path,
    bus: &Arc<MessageBus>,
    subagents: &Arc<SubagentManager>,
    shutdown: &CancellationToken,
) -> ToolFactory {
    let workspace = workspace.to_path_buf();
    let outbound = bus.outbound_sender();
    let subagents = subagents.clone();
    let shutdown = shutdown.clone();

    Arc::new(move |spec: &AgentSpec| {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ReadFileTool::default()));
        tools.register(Arc::new(WriteFileTool::default()));
        tools.register(Arc::new(ListDirTool::default()));
        tools.register(Arc::new(
            ExecTool::new().with_working_dir(workspace.clone()),
        ));
        tools.register(Arc::new(WebSearchTool::new(None)));
        tools.register(Arc::new(WebFetchTool::new()));
        tools.register(Arc::new(MessageTool::new(outbound.clone())));
        let manager = subagents.clone();
        let token = shutdown.clone();
        tools.register(Arc::new(SpawnTool::new(Arc::new(
            move |task, label, channel, chat_id| {
                manager.spawn(&token, task, label, channel, chat_id)
            },
        ))));

        if spec.tools.is_empty() {
            return tools;
        }
        // Whitelist: keep only the named tools.
        let mut filtered = ToolRegistry::new();
        for name in &spec.tools {
            match tools.get(name) {
                Some(tool) => filtered.register(tool),
                None => warn!(agent = %spec.id, tool = %name, "unknown tool in whitelist"),
            }
        }
        filtered
    })
}

/// Create the registry and populate it from `agents.yaml` (or a single
/// default agent when the file is absent).
pub fn build_registry(
    provider: Arc<dyn ChatProvider>,
    sessions: Arc<SessionManager>,
    workspace: &Path,
    default_model: &str,
    agents_path: &Path,
    tool_factory: ToolFactory,
) -> anyhow::Result<Arc<AgentRegistry>> {
    let registry = Arc::new(AgentRegistry::new(RegistryConfig {
        default_provider: provider,
        sessions,
        workspace: workspace.to_path_buf(),
        default_model: default_model.to_string(),
        tool_factory,
    }));

    let specs = load_agent_specs(agents_path)?;
    if specs.is_empty() {
        registry.register(AgentSpec {
            id: "general".into(),
            description: "Default agent".into(),
            is_default: true,
            ..AgentSpec::default()
        })?;
        tracing::info!("single-agent mode (no agents.yaml)");
    } else {
        for spec in specs {
            let id = spec.id.clone();
            if let Err(e) = registry.register(spec) {
                warn!(agent = %id, error = %e, "failed to register agent");
            }
        }
        tracing::info!(count = registry.len(), "agents registered");
    }
    Ok(registry)
}

/// Build the `@name` → role map: every agent id maps to itself, and the
/// short display name extracted from its description also maps to it.
pub fn build_mention_map(registry: &AgentRegistry) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for id in registry.agent_ids() {
        map.insert(id.clone(), id.clone());
        if let Some(spec) = registry.get_spec(&id) {
            let name = extract_agent_name(&id, &spec.description);
            if name != id {
                map.insert(name, id.clone());
            }
        }
    }
    map
}
