//! The [`ChatProvider`] trait every LLM backend implements.

use async_trait::async_trait;

use crate::types::{ChatRequest, LlmResponse};

/// Errors from provider plumbing.
///
/// Transport failures and non-2xx statuses are *not* surfaced here: the
/// OpenAI-compatible provider folds them into an `LlmResponse` with
/// `finish_reason = "error"` so the loop can still produce a reply. This
/// enum covers what cannot be folded (request construction, serialization).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP client failure before a response shape existed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider-specific error.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

/// Unified chat interface over LLM backends.
///
/// Implementors must be `Send + Sync`; the loop, router, and subagents all
/// share one provider behind an `Arc`.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a chat completion request.
    async fn chat(&self, req: ChatRequest) -> Result<LlmResponse, ProviderError>;

    /// The model used when a request does not name one.
    fn default_model(&self) -> String;
}
