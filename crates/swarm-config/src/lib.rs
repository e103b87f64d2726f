//! # swarm-config
//!
//! Local settings (`~/.swarm/config.json`) and the dynamic LLM config hub
//! with its three resolution layers: local fallback, registry pull, and
//! runtime push.

pub mod hub;
pub mod settings;

pub use hub::{AgentLlmConfig, ConfigHub, HubError, LlmConfig};
pub use settings::{config_path, Settings};
