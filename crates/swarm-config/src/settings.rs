//! Local settings file: `~/.swarm/config.json`.
//!
//! A missing file yields defaults; a present file is deserialized over the
//! defaults so omitted fields keep their default values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Errors from settings I/O.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed settings file.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Agent defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Default model identifier.
    pub model: String,
    /// Workspace directory (bootstrap files, memory, skills, sessions).
    pub workspace: String,
    /// Default sampling temperature.
    pub temperature: f64,
    /// Default completion token cap.
    pub max_tokens: u32,
    /// Default reason/act iteration cap.
    pub max_iterations: u32,
    /// Session history window passed to the loop.
    pub memory_window: usize,
    /// Dedicated model for semantic routing; empty disables the LLM
    /// router.
    pub router_model: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            workspace: String::new(),
            temperature: 0.7,
            max_tokens: 4096,
            max_iterations: 20,
            memory_window: 50,
            router_model: String::new(),
        }
    }
}

/// Serving settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// HTTP API port.
    pub port: u16,
    /// Daemon worker count (ports `port..port+workers`).
    pub workers: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            port: 18790,
            workers: 1,
        }
    }
}

/// Backend pool settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurvivalSettings {
    /// Backend/registry base URL (`SURVIVAL_API_URL`).
    pub api_url: String,
    /// Backend auth token (`SURVIVAL_API_KEY`).
    pub api_key: String,
    /// This node's HTTP API key (`NANOBOT_API_KEY`).
    pub nanobot_api_key: String,
}

/// Top-level settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Agent defaults.
    pub agent: AgentSettings,
    /// Serving settings.
    pub gateway: GatewaySettings,
    /// Backend pool settings.
    pub survival: SurvivalSettings,
}

/// Default settings path: `~/.swarm/config.json`.
pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".swarm").join("config.json")
}

impl Settings {
    /// Load settings from `path` (default path when `None`). A missing
    /// file returns defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    /// Persist settings as pretty-printed JSON, creating parent dirs.
    pub fn save(&self, path: Option<&Path>) -> Result<(), SettingsError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, data)?;
        Ok(())
    }
}
