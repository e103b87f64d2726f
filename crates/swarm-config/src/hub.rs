//! Dynamic LLM configuration hub.
//!
//! Three layers, newest wins:
//!
//! 1. Local fallback (constructor parameter).
//! 2. Registry pull: `GET {backend}/api/nanobot/config?instanceId=…` at
//!    startup. 404 and network errors keep the current value.
//! 3. Runtime push: WebSocket `config_update` payloads merged over the
//!    current snapshot.
//!
//! [`ConfigHub::apply`] installs a new config and fires change callbacks
//! synchronously, in registration order, with the lock released. The usual
//! callback rebuilds the inner provider and swaps it into the dynamic
//! provider indirection.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Errors from hub plumbing.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Registry fetch transport failure.
    #[error("registry fetch: {0}")]
    Fetch(#[from] reqwest::Error),
    /// Registry returned a non-OK status.
    #[error("registry returned HTTP {0}")]
    Status(u16),
    /// Malformed config payload.
    #[error("config payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// The dynamic LLM configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmConfig {
    /// Model identifier.
    pub model: String,
    /// Provider API key.
    pub api_key: String,
    /// Provider API base URL.
    pub api_base: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Provider name, e.g. `"deepseek"`, `"openrouter"`.
    pub provider: String,
    /// Per-agent overrides keyed by agent id.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub agent_overrides: HashMap<String, AgentLlmConfig>,
}

/// Per-agent LLM overrides. Zero-value fields inherit from the parent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentLlmConfig {
    /// Model override.
    pub model: String,
    /// API key override.
    pub api_key: String,
    /// API base override.
    pub api_base: String,
    /// Temperature override.
    pub temperature: f64,
    /// Token cap override.
    pub max_tokens: u32,
    /// Provider override.
    pub provider: String,
}

impl LlmConfig {
    /// Effective settings for an agent: each non-zero override field wins
    /// over the base.
    pub fn resolve(&self, agent_id: &str) -> AgentLlmConfig {
        let mut effective = AgentLlmConfig {
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            api_base: self.api_base.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            provider: self.provider.clone(),
        };
        let Some(ov) = self.agent_overrides.get(agent_id) else {
            return effective;
        };
        if !ov.model.is_empty() {
            effective.model = ov.model.clone();
        }
        if !ov.api_key.is_empty() {
            effective.api_key = ov.api_key.clone();
        }
        if !ov.api_base.is_empty() {
            effective.api_base = ov.api_base.clone();
        }
        if ov.temperature != 0.0 {
            effective.temperature = ov.temperature;
        }
        if ov.max_tokens != 0 {
            effective.max_tokens = ov.max_tokens;
        }
        if !ov.provider.is_empty() {
            effective.provider = ov.provider.clone();
        }
        effective
    }
}

/// Callback invoked after a config change, with the new config.
pub type ChangeCallback = Box<dyn Fn(&LlmConfig) + Send + Sync>;

/// Holds exactly one current [`LlmConfig`] and notifies subscribers on
/// change.
pub struct ConfigHub {
    current: RwLock<LlmConfig>,
    callbacks: Mutex<Vec<ChangeCallback>>,
    registry_url: String,
    instance_id: String,
    api_key: String,
    client: reqwest::Client,
}

impl ConfigHub {
    /// Create a hub seeded with the local fallback config.
    pub fn new(fallback: LlmConfig) -> Self {
        Self {
            current: RwLock::new(fallback),
            callbacks: Mutex::new(Vec::new()),
            registry_url: String::new(),
            instance_id: String::new(),
            api_key: String::new(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Set the registry center base URL (empty disables pulls).
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    /// Set the instance id used in pull requests.
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    /// Set the bearer token for registry calls.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    /// Snapshot of the currently active config.
    pub fn current(&self) -> LlmConfig {
        self.current.read().clone()
    }

    /// Register a change callback. Callbacks run synchronously in
    /// registration order; long work belongs in a spawned task.
    pub fn on_change(&self, callback: ChangeCallback) {
        self.callbacks.lock().push(callback);
    }

    /// Pull config from the registry center. A missing registry URL is a
    /// no-op; a 404 keeps the current value; transport errors are
    /// reported but never fatal.
    pub async fn fetch(&self) -> Result<(), HubError> {
        if self.registry_url.is_empty() {
            info!("no registry URL configured, using local config");
            return Ok(());
        }

        let url = format!(
            "{}/api/nanobot/config?instanceId={}",
            self.registry_url, self.instance_id
        );
        let mut request = self.client.get(&url);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "registry fetch failed, keeping local config");
                return Err(e.into());
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            info!("config endpoint not available on backend (404), using local config");
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %body, "registry returned error");
            return Err(HubError::Status(status.as_u16()));
        }

        let cfg: LlmConfig = response.json().await?;
        self.apply(cfg);
        Ok(())
    }

    /// Install a new config and fire change callbacks.
    pub fn apply(&self, cfg: LlmConfig) {
        let old_model;
        {
            let mut current = self.current.write();
            old_model = current.model.clone();
            *current = cfg.clone();
        }
        info!(model = %cfg.model, provider = %cfg.provider, "config updated");
        if old_model != cfg.model {
            info!(from = %old_model, to = %cfg.model, "model changed");
        }

        let callbacks = self.callbacks.lock();
        for cb in callbacks.iter() {
            cb(&cfg);
        }
    }

    /// Merge a `config_update` push over the current snapshot: fields
    /// present in the patch win, absent fields are preserved.
    pub fn handle_config_update(&self, patch: &Value) -> Result<(), HubError> {
        let mut merged = serde_json::to_value(self.current())?;
        if let (Some(base), Some(patch_obj)) = (merged.as_object_mut(), patch.as_object()) {
            for (key, value) in patch_obj {
                base.insert(key.clone(), value.clone());
            }
        }
        let cfg: LlmConfig = serde_json::from_value(merged)?;
        self.apply(cfg);
        Ok(())
    }
}
