//! Runtime error kinds.

use swarm_llm::ProviderError;

/// Errors surfaced by the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The provider layer failed before a response shape existed.
    #[error("LLM chat: {0}")]
    Provider(#[from] ProviderError),

    /// No agent is registered for the requested role and no default
    /// exists.
    #[error("no agent found for role {0:?}")]
    UnknownRole(String),

    /// An agent spec failed validation at registration time.
    #[error("invalid agent spec {id:?}: {reason}")]
    InvalidSpec {
        /// The offending spec id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Filesystem failure (sessions, prompts, rules).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed YAML (agents.yaml, event rules).
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Malformed JSON (sessions, router payloads).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
