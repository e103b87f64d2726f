//! Hot-swappable provider indirection.
//!
//! Every call snapshots the inner `Arc` under a read lock and releases it
//! before awaiting, so a concurrent [`DynamicProvider::swap`] never blocks
//! on in-flight requests: they finish on the old provider, new calls use
//! the new one.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use crate::provider::{ChatProvider, ProviderError};
use crate::types::{ChatRequest, LlmResponse};

/// Indirection wrapping one inner provider at a time.
pub struct DynamicProvider {
    inner: RwLock<Arc<dyn ChatProvider>>,
}

impl DynamicProvider {
    /// Wrap an initial provider.
    pub fn new(initial: Arc<dyn ChatProvider>) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    /// Atomically replace the inner provider.
    pub fn swap(&self, new_provider: Arc<dyn ChatProvider>) {
        let model = new_provider.default_model();
        *self.inner.write() = new_provider;
        info!(%model, "provider swapped");
    }

    /// Snapshot the current inner provider.
    pub fn snapshot(&self) -> Arc<dyn ChatProvider> {
        self.inner.read().clone()
    }
}

#[async_trait]
impl ChatProvider for DynamicProvider {
    async fn chat(&self, req: ChatRequest) -> Result<LlmResponse, ProviderError> {
        let provider = self.snapshot();
        provider.chat(req).await
    }

    fn default_model(&self) -> String {
        self.snapshot().default_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        model: String,
        reply: String,
    }

    #[async_trait]
    impl ChatProvider for FixedProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<LlmResponse, ProviderError> {
            Ok(LlmResponse::text(self.reply.clone()))
        }

        fn default_model(&self) -> String {
            self.model.clone()
        }
    }

    fn fixed(model: &str, reply: &str) -> Arc<dyn ChatProvider> {
        Arc::new(FixedProvider {
            model: model.into(),
            reply: reply.into(),
        })
    }

    #[tokio::test]
    async fn swap_switches_model_and_replies() {
        let dynamic = DynamicProvider::new(fixed("model-a", "from A"));
        assert_eq!(dynamic.default_model(), "model-a");
        let resp = dynamic.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("from A"));

        dynamic.swap(fixed("model-b", "from B"));
        assert_eq!(dynamic.default_model(), "model-b");
        let resp = dynamic.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("from B"));
    }

    #[tokio::test]
    async fn snapshot_outlives_swap() {
        let dynamic = DynamicProvider::new(fixed("model-a", "from A"));
        let old = dynamic.snapshot();
        dynamic.swap(fixed("model-b", "from B"));
        // A call started before the swap keeps the old provider.
        let resp = old.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("from A"));
    }
}
