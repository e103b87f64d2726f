//! Background subagent execution.
//!
//! A subagent is a detached tool-calling loop with a restricted tool set
//! (file read/write/list and web fetch — no messaging, spawning, or
//! scheduling). On completion it announces its result back onto the bus
//! as an inbound `system` message addressed to the originating
//! conversation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use swarm_core::{InboundMessage, MessageBus};
use swarm_llm::{ChatMessage, ChatProvider, ChatRequest};
use swarm_tools::fs::{ListDirTool, ReadFileTool, WriteFileTool};
use swarm_tools::web::WebFetchTool;
use swarm_tools::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SUBAGENT_MAX_ITERATIONS: usize = 15;
const LABEL_MAX: usize = 30;

/// Manages detached background subagents.
pub struct SubagentManager {
    provider: Arc<dyn ChatProvider>,
    workspace: PathBuf,
    bus: Arc<MessageBus>,
    model: String,
    max_tokens: u32,
    temperature: f64,
    running: Mutex<HashMap<String, CancellationToken>>,
    spawned: AtomicU64,
}

impl SubagentManager {
    /// Create a manager sharing the node's provider and bus.
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        workspace: impl Into<PathBuf>,
        bus: Arc<MessageBus>,
        model: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            workspace: workspace.into(),
            bus,
            model: model.into(),
            max_tokens: 4096,
            temperature: 0.7,
            running: Mutex::new(HashMap::new()),
            spawned: AtomicU64::new(0),
        })
    }

    /// Start a subagent in the background. Returns a status line for the
    /// parent agent; the result arrives later via the bus.
    pub fn spawn(
        self: &Arc<Self>,
        parent: &CancellationToken,
        task: impl Into<String>,
        label: impl Into<String>,
        origin_channel: impl Into<String>,
        origin_chat_id: impl Into<String>,
    ) -> String {
        let task = task.into();
        let mut label = label.into();
        if label.is_empty() {
            label = if task.chars().count() > LABEL_MAX {
                let truncated: String = task.chars().take(LABEL_MAX).collect();
                format!("{truncated}...")
            } else {
                task.clone()
            };
        }

        let task_id = format!("sub-{}", self.spawned.fetch_add(1, Ordering::SeqCst) + 1);
        let cancel = parent.child_token();
        self.running.lock().insert(task_id.clone(), cancel.clone());

        let manager = self.clone();
        let id = task_id.clone();
        let origin_channel = origin_channel.into();
        let origin_chat_id = origin_chat_id.into();
        let status_label = label.clone();
        tokio::spawn(async move {
            manager
                .run_subagent(cancel, &id, &task, &label, &origin_channel, &origin_chat_id)
                .await;
            manager.running.lock().remove(&id);
        });

        format!("Subagent [{status_label}] started (id: {task_id}). I'll notify you when it completes.")
    }

    /// Number of running subagents.
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    async fn run_subagent(
        &self,
        cancel: CancellationToken,
        task_id: &str,
        task: &str,
        label: &str,
        origin_channel: &str,
        origin_chat_id: &str,
    ) {
        info!(id = task_id, label, "subagent started");
        let tools = self.restricted_tools();
        let mut messages = vec![
            ChatMessage::system(self.subagent_prompt()),
            ChatMessage::user(task),
        ];

        let mut final_result = String::new();
        for _ in 0..SUBAGENT_MAX_ITERATIONS {
            let response = tokio::select! {
                () = cancel.cancelled() => {
                    warn!(id = task_id, "subagent cancelled");
                    return;
                }
                resp = self.provider.chat(ChatRequest {
                    messages: messages.clone(),
                    tools: tools.schemas(),
                    model: self.model.clone(),
                    max_tokens: self.max_tokens,
                    temperature: self.temperature,
                }) => match resp {
                    Ok(r) => r,
                    Err(e) => {
                        final_result = format!("Error: {e}");
                        break;
                    }
                },
            };

            if !response.has_tool_calls() {
                final_result = response
                    .content
                    .unwrap_or_else(|| "Task completed.".to_string());
                break;
            }

            let embedded = response
                .tool_calls
                .iter()
                .map(|tc| tc.to_assistant_call())
                .collect();
            messages.push(ChatMessage::assistant_with_tools(
                response.content.clone().unwrap_or_default(),
                embedded,
                response.reasoning_content.clone(),
            ));
            for call in &response.tool_calls {
                let result = match tools.get(&call.name) {
                    Some(tool) => match tool.execute(call.arguments.clone()).await {
                        Ok(output) => output,
                        Err(e) => format!("Error: {e}"),
                    },
                    None => format!("Error: unknown tool {:?}", call.name),
                };
                messages.push(ChatMessage::tool_result(&call.id, &call.name, result));
            }
        }

        if final_result.is_empty() {
            final_result = "Task completed but no response was generated.".to_string();
        }

        info!(id = task_id, label, "subagent finished");
        self.bus
            .publish_inbound(InboundMessage::new(
                "system",
                "subagent",
                format!("{origin_channel}:{origin_chat_id}"),
                format!("[Subagent '{label}' completed]\n\nTask: {task}\n\nResult:\n{final_result}"),
            ))
            .await;
    }

    /// File read/write/list and web fetch only.
    fn restricted_tools(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ReadFileTool::default()));
        tools.register(Arc::new(WriteFileTool::default()));
        tools.register(Arc::new(ListDirTool::default()));
        tools.register(Arc::new(WebFetchTool::new()));
        tools
    }

    fn subagent_prompt(&self) -> String {
        format!(
            "# Subagent\n\n\
             You are a subagent spawned by the main agent to complete a specific task.\n\n\
             ## Rules\n\
             1. Stay focused - complete only the assigned task\n\
             2. Your final response will be reported back to the main agent\n\
             3. Be concise but informative\n\n\
             ## What You Can Do\n\
             - Read and write files in the workspace\n\
             - Fetch web pages\n\n\
             ## Workspace\n{}",
            self.workspace.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use swarm_llm::{LlmResponse, ProviderError};

    use super::*;

    struct OneShotProvider;

    #[async_trait]
    impl ChatProvider for OneShotProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<LlmResponse, ProviderError> {
            Ok(LlmResponse::text("research summary"))
        }

        fn default_model(&self) -> String {
            "sub-model".into()
        }
    }

    #[tokio::test]
    async fn completion_is_announced_on_the_bus() {
        let bus = Arc::new(MessageBus::new());
        let manager = SubagentManager::new(
            Arc::new(OneShotProvider),
            "/tmp/ws",
            bus.clone(),
            "sub-model",
        );

        let cancel = CancellationToken::new();
        let status = manager.spawn(&cancel, "look things up", "", "telegram", "42");
        assert!(status.contains("sub-1"));

        let mut rx = bus.take_inbound().unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.channel, "system");
        assert_eq!(msg.sender_id, "subagent");
        assert_eq!(msg.chat_id, "telegram:42");
        assert!(msg.content.contains("research summary"));
        assert!(msg.content.contains("look things up"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test]
    async fn long_task_gets_truncated_label() {
        let bus = Arc::new(MessageBus::new());
        let manager = SubagentManager::new(
            Arc::new(OneShotProvider),
            "/tmp/ws",
            bus.clone(),
            "sub-model",
        );
        let cancel = CancellationToken::new();
        let long_task = "a".repeat(80);
        let status = manager.spawn(&cancel, long_task, "", "cli", "direct");
        assert!(status.contains("..."));
    }

    #[tokio::test]
    async fn cancelled_parent_stops_subagent_silently() {
        struct SlowProvider;

        #[async_trait]
        impl ChatProvider for SlowProvider {
            async fn chat(&self, _req: ChatRequest) -> Result<LlmResponse, ProviderError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(LlmResponse::text("never"))
            }

            fn default_model(&self) -> String {
                "slow".into()
            }
        }

        let bus = Arc::new(MessageBus::new());
        let manager =
            SubagentManager::new(Arc::new(SlowProvider), "/tmp/ws", bus.clone(), "slow");
        let cancel = CancellationToken::new();
        manager.spawn(&cancel, "task", "t", "cli", "direct");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.running_count(), 1);

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.running_count(), 0);

        // No announcement is published for a cancelled run.
        let mut rx = bus.take_inbound().unwrap();
        assert!(rx.try_recv().is_err());
    }
}
