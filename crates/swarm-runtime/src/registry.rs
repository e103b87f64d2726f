//! Multi-agent registration and dispatch.
//!
//! Owns one [`AgentLoop`] per registered agent, each with its own model,
//! temperature, token cap, tools whitelist, and system prompt. Specs come
//! from `agents.yaml` at startup or from runtime pushes; role resolution
//! maps `role_id == agent_id` with fallback to the default agent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use swarm_llm::{ChatProvider, OpenAiProvider};
use swarm_tools::ToolRegistry;
use tracing::{info, warn};

use crate::agent::{AgentLoop, ContextBuilder, LoopParams};
use crate::errors::RuntimeError;
use crate::session::SessionManager;

/// Per-agent provider override.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderOverride {
    /// API key for the agent's own provider.
    pub api_key: String,
    /// API base for the agent's own provider.
    pub api_base: String,
    /// Provider name for gateway detection.
    pub provider_name: String,
}

/// A single agent's configuration, as written in `agents.yaml`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSpec {
    /// Agent id; equals the routing role id.
    pub id: String,
    /// Human-readable description (shown to the router LLM).
    pub description: String,
    /// Model override; empty inherits the registry default.
    pub model: String,
    /// Temperature; `0` inherits the default `0.7`.
    pub temperature: f64,
    /// Token cap; `0` inherits the default `4096`.
    pub max_tokens: u32,
    /// Iteration cap; absent inherits the default `25`. An explicit `0`
    /// is rejected at registration.
    pub max_iterations: Option<u32>,
    /// Path (relative to the workspace parent) of the system prompt file.
    pub system_prompt_file: String,
    /// Tool whitelist; empty means the full default tool set.
    pub tools: Vec<String>,
    /// Skills preloaded into this agent's context.
    pub skills: Vec<String>,
    /// Whether this agent answers unrouted requests.
    pub is_default: bool,
    /// Optional per-agent provider.
    pub provider: Option<ProviderOverride>,
}

/// Top-level structure of `agents.yaml`.
#[derive(Deserialize)]
struct AgentsFile {
    #[serde(default)]
    agents: Vec<AgentSpec>,
}

/// Read and parse an `agents.yaml`. A missing file yields an empty list
/// (single-agent mode).
pub fn load_agent_specs(path: &Path) -> Result<Vec<AgentSpec>, RuntimeError> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let file: AgentsFile = serde_yaml::from_str(&data)?;
    Ok(file.agents)
}

/// Builds the tool set for an agent, honoring its whitelist.
pub type ToolFactory = Arc<dyn Fn(&AgentSpec) -> ToolRegistry + Send + Sync>;

struct RegisteredAgent {
    spec: AgentSpec,
    agent_loop: Arc<AgentLoop>,
    prompt: String,
}

/// Shared settings for all agents.
pub struct RegistryConfig {
    /// Provider used by agents without an override (normally the
    /// dynamic provider indirection).
    pub default_provider: Arc<dyn ChatProvider>,
    /// Session store shared by all agents.
    pub sessions: Arc<SessionManager>,
    /// Workspace directory.
    pub workspace: PathBuf,
    /// Model used by specs that don't name one.
    pub default_model: String,
    /// Tool set builder.
    pub tool_factory: ToolFactory,
}

struct AgentTable {
    agents: HashMap<String, RegisteredAgent>,
    /// Registration order; the first entry is the fallback when no
    /// default is marked.
    order: Vec<String>,
    default_id: Option<String>,
}

/// Manages all [`AgentLoop`] instances and resolves roles to agents.
pub struct AgentRegistry {
    table: RwLock<AgentTable>,
    cfg: RegistryConfig,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new(cfg: RegistryConfig) -> Self {
        Self {
            table: RwLock::new(AgentTable {
                agents: HashMap::new(),
                order: Vec::new(),
                default_id: None,
            }),
            cfg,
        }
    }

    /// Create and register an agent from a spec. Registering an existing
    /// id replaces its configuration.
    pub fn register(&self, spec: AgentSpec) -> Result<(), RuntimeError> {
        if spec.id.is_empty() {
            return Err(RuntimeError::InvalidSpec {
                id: spec.id,
                reason: "empty id".into(),
            });
        }
        if spec.max_iterations == Some(0) {
            return Err(RuntimeError::InvalidSpec {
                id: spec.id,
                reason: "max_iterations must be at least 1".into(),
            });
        }

        let provider = self.resolve_provider(&spec);
        let params = LoopParams {
            model: if spec.model.is_empty() {
                self.cfg.default_model.clone()
            } else {
                spec.model.clone()
            },
            temperature: if spec.temperature == 0.0 {
                0.7
            } else {
                spec.temperature
            },
            max_tokens: if spec.max_tokens == 0 {
                4096
            } else {
                spec.max_tokens
            },
            max_iterations: spec.max_iterations.unwrap_or(25),
            memory_window: 50,
        };

        let tools = (self.cfg.tool_factory)(&spec);
        let agent_loop = Arc::new(AgentLoop::new(
            provider,
            tools,
            ContextBuilder::new(&self.cfg.workspace),
            self.cfg.sessions.clone(),
            params.clone(),
        ));

        let prompt = self.load_prompt(&spec);

        let mut table = self.table.write();
        if !table.agents.contains_key(&spec.id) {
            table.order.push(spec.id.clone());
        }
        if spec.is_default {
            table.default_id = Some(spec.id.clone());
        }
        info!(
            agent = %spec.id,
            model = %params.model,
            temperature = params.temperature,
            max_tokens = params.max_tokens,
            "agent registered"
        );
        table.agents.insert(
            spec.id.clone(),
            RegisteredAgent {
                spec,
                agent_loop,
                prompt,
            },
        );
        Ok(())
    }

    /// Register a new agent or hot-update an existing one from a pushed
    /// JSON config (`model`, `temperature`, `max_tokens`,
    /// `max_iterations`).
    pub fn register_or_update(&self, agent_id: &str, config: &Value) -> Result<(), RuntimeError> {
        let model = config.get("model").and_then(Value::as_str);
        let temperature = config.get("temperature").and_then(Value::as_f64);
        let max_tokens = config.get("max_tokens").and_then(Value::as_u64).map(|v| v as u32);
        let max_iterations = config
            .get("max_iterations")
            .and_then(Value::as_u64)
            .map(|v| v as u32);

        {
            let mut table = self.table.write();
            if let Some(registered) = table.agents.get_mut(agent_id) {
                if let Some(model) = model {
                    if !model.is_empty() {
                        registered.spec.model = model.to_string();
                    }
                }
                if let Some(t) = temperature {
                    if t > 0.0 {
                        registered.spec.temperature = t;
                    }
                }
                if let Some(mt) = max_tokens {
                    if mt > 0 {
                        registered.spec.max_tokens = mt;
                    }
                }
                if let Some(mi) = max_iterations {
                    if mi > 0 {
                        registered.spec.max_iterations = Some(mi);
                    }
                }
                registered
                    .agent_loop
                    .update_params(model, temperature, max_tokens, max_iterations);
                info!(
                    agent = agent_id,
                    model = %registered.spec.model,
                    "agent config updated"
                );
                return Ok(());
            }
        }

        self.register(AgentSpec {
            id: agent_id.to_string(),
            description: format!("Dynamic agent: {agent_id}"),
            model: model.unwrap_or_default().to_string(),
            temperature: temperature.unwrap_or_default(),
            max_tokens: max_tokens.unwrap_or_default(),
            max_iterations,
            ..AgentSpec::default()
        })
    }

    fn resolve_provider(&self, spec: &AgentSpec) -> Arc<dyn ChatProvider> {
        match &spec.provider {
            Some(ov) if !ov.api_key.is_empty() => Arc::new(OpenAiProvider::new(
                ov.api_key.clone(),
                ov.api_base.clone(),
                spec.model.clone(),
                &ov.provider_name,
            )),
            _ => self.cfg.default_provider.clone(),
        }
    }

    fn load_prompt(&self, spec: &AgentSpec) -> String {
        if spec.system_prompt_file.is_empty() {
            return String::new();
        }
        let path = self
            .cfg
            .workspace
            .join("..")
            .join(&spec.system_prompt_file);
        match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => {
                warn!(agent = %spec.id, path = %path.display(), "prompt file not found");
                String::new()
            }
        }
    }

    /// The loop for an exact agent id.
    pub fn get(&self, id: &str) -> Option<Arc<AgentLoop>> {
        self.table.read().agents.get(id).map(|a| a.agent_loop.clone())
    }

    /// The default agent: the marked default, else the first registered.
    pub fn get_default(&self) -> Option<Arc<AgentLoop>> {
        let table = self.table.read();
        let id = table.default_id.as_ref().or_else(|| table.order.first())?;
        table.agents.get(id).map(|a| a.agent_loop.clone())
    }

    /// Map a role id to an agent: exact match, else the default.
    pub fn resolve_for_role(&self, role_id: &str) -> Option<Arc<AgentLoop>> {
        if let Some(agent) = self.get(role_id) {
            return Some(agent);
        }
        self.get_default()
    }

    /// Route a message to the agent for `role_id` and process it.
    pub async fn process_direct(
        &self,
        content: &str,
        session_key: &str,
        channel: &str,
        chat_id: &str,
        role_id: &str,
    ) -> Result<String, RuntimeError> {
        let agent = self
            .resolve_for_role(role_id)
            .ok_or_else(|| RuntimeError::UnknownRole(role_id.to_string()))?;
        agent
            .process_direct(content, session_key, channel, chat_id)
            .await
    }

    /// Summary info for all registered agents.
    pub fn list_agents(&self) -> Vec<Value> {
        let table = self.table.read();
        table
            .order
            .iter()
            .filter_map(|id| table.agents.get(id))
            .map(|a| {
                json!({
                    "id": a.spec.id,
                    "description": a.spec.description,
                    "model": a.spec.model,
                    "is_default": a.spec.is_default,
                    "tools": a.spec.tools,
                })
            })
            .collect()
    }

    /// The spec for an agent id.
    pub fn get_spec(&self, id: &str) -> Option<AgentSpec> {
        self.table.read().agents.get(id).map(|a| a.spec.clone())
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.table.read().agents.len()
    }

    /// Whether no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.table.read().agents.is_empty()
    }

    /// All registered agent ids, in registration order.
    pub fn agent_ids(&self) -> Vec<String> {
        self.table.read().order.clone()
    }

    /// Whether an agent id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.table.read().agents.contains_key(id)
    }

    /// The loaded system prompt for an agent.
    pub fn get_prompt(&self, id: &str) -> String {
        self.table
            .read()
            .agents
            .get(id)
            .map(|a| a.prompt.clone())
            .unwrap_or_default()
    }
}
