//! Messaging tools: `message` (send a reply onto the bus) and `spawn`
//! (hand a task to the subagent manager).
//!
//! Both tools carry a per-conversation default target, set by the loop
//! before each run so the model can omit channel/chat arguments.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use swarm_core::OutboundMessage;
use tokio::sync::mpsc;

use crate::{opt_str_arg, str_arg, Tool, ToolError};

/// Callback used by [`SpawnTool`]: `(task, label, origin_channel,
/// origin_chat_id) -> status string`.
pub type SpawnFn = Arc<dyn Fn(String, String, String, String) -> String + Send + Sync>;

#[derive(Clone, Default)]
struct Target {
    channel: String,
    chat_id: String,
}

/// Send a message to the user on a chat channel.
pub struct MessageTool {
    sender: mpsc::Sender<OutboundMessage>,
    target: RwLock<Target>,
}

impl MessageTool {
    /// Create a message tool publishing onto the given outbound queue.
    pub fn new(sender: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            sender,
            target: RwLock::new(Target::default()),
        }
    }

    /// Set the default channel/chat for the current conversation.
    pub fn set_context(&self, channel: impl Into<String>, chat_id: impl Into<String>) {
        *self.target.write() = Target {
            channel: channel.into(),
            chat_id: chat_id.into(),
        };
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "The message content to send"},
                "channel": {"type": "string", "description": "Optional: target channel"},
                "chat_id": {"type": "string", "description": "Optional: target chat/user ID"}
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let content = str_arg(&args, "content")?;
        let target = self.target.read().clone();
        let channel = opt_str_arg(&args, "channel")
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or(target.channel);
        let chat_id = opt_str_arg(&args, "chat_id")
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or(target.chat_id);
        if channel.is_empty() || chat_id.is_empty() {
            return Ok("Error: No target channel/chat specified".into());
        }

        let msg = OutboundMessage::new(channel.clone(), chat_id.clone(), content);
        match self.sender.send(msg).await {
            Ok(()) => Ok(format!("Message sent to {channel}:{chat_id}")),
            Err(e) => Ok(format!("Error sending message: {e}")),
        }
    }
}

/// Spawn a subagent to handle a task in the background.
pub struct SpawnTool {
    spawn: SpawnFn,
    origin: RwLock<Target>,
}

impl SpawnTool {
    /// Create a spawn tool delegating to the subagent manager.
    pub fn new(spawn: SpawnFn) -> Self {
        Self {
            spawn,
            origin: RwLock::new(Target::default()),
        }
    }

    /// Set the conversation the spawned subagent reports back to.
    pub fn set_context(&self, channel: impl Into<String>, chat_id: impl Into<String>) {
        *self.origin.write() = Target {
            channel: channel.into(),
            chat_id: chat_id.into(),
        };
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a subagent to handle a task in the background."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {"type": "string", "description": "The task for the subagent"},
                "label": {"type": "string", "description": "Optional short label"}
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let task = str_arg(&args, "task")?;
        let label = opt_str_arg(&args, "label").unwrap_or_default();
        let origin = self.origin.read().clone();
        Ok((self.spawn)(
            task.to_string(),
            label.to_string(),
            origin.channel,
            origin.chat_id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn message_uses_context_target() {
        let (tx, mut rx) = mpsc::channel(8);
        let tool = MessageTool::new(tx);
        tool.set_context("telegram", "42");

        let out = tool.execute(json!({"content": "hi"})).await.unwrap();
        assert_eq!(out, "Message sent to telegram:42");

        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.channel, "telegram");
        assert_eq!(sent.chat_id, "42");
        assert_eq!(sent.content, "hi");
    }

    #[tokio::test]
    async fn message_explicit_target_wins() {
        let (tx, mut rx) = mpsc::channel(8);
        let tool = MessageTool::new(tx);
        tool.set_context("telegram", "42");

        tool.execute(json!({"content": "x", "channel": "slack", "chat_id": "C1"}))
            .await
            .unwrap();
        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.channel, "slack");
        assert_eq!(sent.chat_id, "C1");
    }

    #[tokio::test]
    async fn message_without_target_is_user_error() {
        let (tx, _rx) = mpsc::channel(8);
        let tool = MessageTool::new(tx);
        let out = tool.execute(json!({"content": "hi"})).await.unwrap();
        assert_eq!(out, "Error: No target channel/chat specified");
    }

    #[tokio::test]
    async fn spawn_passes_origin() {
        let tool = SpawnTool::new(Arc::new(|task, label, channel, chat| {
            format!("{task}|{label}|{channel}|{chat}")
        }));
        tool.set_context("cli", "direct");
        let out = tool
            .execute(json!({"task": "research", "label": "r1"}))
            .await
            .unwrap();
        assert_eq!(out, "research|r1|cli|direct");
    }
}
