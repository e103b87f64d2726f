//! Wire types shared by every provider: chat messages, requests, and the
//! normalized response shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single chat message in OpenAI wire format. Tool-call and tool-result
/// fields are omitted from serialization when unset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, `"assistant"`, or `"tool"`.
    pub role: String,
    /// Message text (may be empty on assistant messages that only carry
    /// tool calls).
    #[serde(default)]
    pub content: String,
    /// Tool calls attached to an assistant message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<AssistantToolCall>>,
    /// The id of the call a `tool` message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// The tool name on a `tool` message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Model reasoning attached to an assistant message, when the provider
    /// surfaces it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    /// A plain assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    /// An assistant message carrying tool calls (and optional reasoning).
    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: Vec<AssistantToolCall>,
        reasoning: Option<String>,
    ) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
            reasoning_content: reasoning,
        }
    }

    /// A tool-result message answering `tool_call_id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            reasoning_content: None,
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            reasoning_content: None,
        }
    }
}

/// A tool call as embedded in an assistant message (arguments are the raw
/// JSON string the model produced).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssistantToolCall {
    /// Provider-assigned call id.
    pub id: String,
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub call_type: String,
    /// The function name + raw arguments.
    pub function: ToolCallFunction,
}

/// The `function` object inside an assistant tool call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Tool name.
    pub name: String,
    /// Arguments as a JSON-encoded string.
    pub arguments: String,
}

/// A tool call requested by the LLM, with arguments already parsed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, echoed back in the tool-result message.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Parsed arguments object.
    pub arguments: Value,
}

impl ToolCallRequest {
    /// Convert to the assistant-message embedding (arguments re-encoded).
    pub fn to_assistant_call(&self) -> AssistantToolCall {
        AssistantToolCall {
            id: self.id.clone(),
            call_type: "function".into(),
            function: ToolCallFunction {
                name: self.name.clone(),
                arguments: serde_json::to_string(&self.arguments).unwrap_or_default(),
            },
        }
    }
}

/// Parameters for one chat completion call.
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    /// Conversation so far, system prompt first.
    pub messages: Vec<ChatMessage>,
    /// Tool schemas in OpenAI function-call format.
    pub tools: Vec<Value>,
    /// Model override; empty uses the provider default.
    pub model: String,
    /// Completion token cap; `0` uses the provider default.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Normalized response from any provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Assistant text, absent when the model only called tools.
    pub content: Option<String>,
    /// Requested tool calls, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// `"stop"`, `"tool_calls"`, `"length"`, or `"error"`.
    pub finish_reason: String,
    /// Token usage counters as reported by the provider.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub usage: HashMap<String, u64>,
    /// Reasoning text, when the provider surfaces it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl LlmResponse {
    /// Whether the model asked for tool execution.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// A terminal text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: "stop".into(),
            ..Self::default()
        }
    }

    /// An error folded into a well-formed response so the loop can keep
    /// going.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: Some(message.into()),
            finish_reason: "error".into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_omits_tool_fields() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hi");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn tool_result_carries_call_id_and_name() {
        let msg = ChatMessage::tool_result("c1", "list_dir", "ok");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "c1");
        assert_eq!(json["name"], "list_dir");
    }

    #[test]
    fn assistant_call_roundtrip() {
        let call = ToolCallRequest {
            id: "c1".into(),
            name: "exec".into(),
            arguments: serde_json::json!({"command": "ls"}),
        };
        let embedded = call.to_assistant_call();
        assert_eq!(embedded.call_type, "function");
        let parsed: Value = serde_json::from_str(&embedded.function.arguments).unwrap();
        assert_eq!(parsed["command"], "ls");
    }

    #[test]
    fn response_helpers() {
        let ok = LlmResponse::text("done");
        assert_eq!(ok.finish_reason, "stop");
        assert!(!ok.has_tool_calls());

        let err = LlmResponse::error("Error calling LLM: boom");
        assert_eq!(err.finish_reason, "error");
        assert!(err.content.unwrap().starts_with("Error calling LLM"));
    }
}
