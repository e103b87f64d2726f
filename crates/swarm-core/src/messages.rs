//! Message envelopes exchanged between ingress adapters and the agent core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Build the session key for a conversation: `"<channel>:<chatId>"`.
///
/// Stable for the lifetime of a conversation; the unit of admission control
/// and history scoping.
pub fn session_key(channel: &str, chat_id: &str) -> String {
    format!("{channel}:{chat_id}")
}

/// A message received from an ingress adapter, consumed exactly once by a
/// worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Source channel name (e.g. `"system"`, `"cli"`).
    pub channel: String,
    /// Who sent the message.
    pub sender_id: String,
    /// Conversation identifier within the channel.
    pub chat_id: String,
    /// Message text.
    pub content: String,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
    /// Attached media references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    /// Channel-specific metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl InboundMessage {
    /// Create a message with the current timestamp and no media/metadata.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// The session key this message belongs to.
    pub fn session_key(&self) -> String {
        session_key(&self.channel, &self.chat_id)
    }
}

/// A reply published by the loop or a tool, delivered to zero or more
/// subscribers keyed by channel name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Destination channel name.
    pub channel: String,
    /// Destination conversation identifier.
    pub chat_id: String,
    /// Message text.
    pub content: String,
    /// Optional message id this is a reply to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Attached media references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    /// Channel-specific metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl OutboundMessage {
    /// Create a plain text reply.
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            ..Self::default()
        }
    }
}
