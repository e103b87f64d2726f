//! # swarm-llm
//!
//! LLM provider layer: the [`ChatProvider`] trait, an OpenAI-compatible
//! HTTP client, the static provider catalog, and the hot-swappable
//! [`DynamicProvider`] indirection.

pub mod catalog;
pub mod dynamic;
pub mod openai;
pub mod provider;
pub mod types;

pub use catalog::{find_by_model, find_by_name, find_gateway, ProviderSpec, PROVIDERS};
pub use dynamic::DynamicProvider;
pub use openai::OpenAiProvider;
pub use provider::{ChatProvider, ProviderError};
pub use types::{ChatMessage, ChatRequest, LlmResponse, ToolCallRequest};
