//! OpenAI-compatible HTTP provider.
//!
//! One client covers every backend in the catalog: direct OpenAI/DeepSeek/
//! Moonshot endpoints and gateways like OpenRouter. Transport errors and
//! non-2xx statuses never abort the agent loop — they come back as an
//! `LlmResponse` with `finish_reason = "error"` so the assistant can still
//! answer.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::catalog::{self, ProviderSpec};
use crate::provider::{ChatProvider, ProviderError};
use crate::types::{ChatRequest, LlmResponse, ToolCallRequest};

const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4-5";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible chat completion client.
pub struct OpenAiProvider {
    api_key: String,
    api_base: String,
    model: String,
    extra_headers: Vec<(String, String)>,
    client: reqwest::Client,
    gateway: Option<&'static ProviderSpec>,
}

impl OpenAiProvider {
    /// Create a provider. `provider_name` (possibly empty) seeds gateway
    /// detection alongside the API key prefix and base URL.
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        default_model: impl Into<String>,
        provider_name: &str,
    ) -> Self {
        let api_key = api_key.into();
        let api_base = api_base.into();
        let mut model = default_model.into();
        if model.is_empty() {
            model = DEFAULT_MODEL.into();
        }
        let gateway = catalog::find_gateway(provider_name, &api_key, &api_base);
        Self {
            api_key,
            api_base,
            model,
            extra_headers: Vec::new(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            gateway,
        }
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// The detected gateway spec, if any.
    pub fn gateway(&self) -> Option<&'static ProviderSpec> {
        self.gateway
    }

    /// Normalize a model name for the configured endpoint.
    ///
    /// With a gateway: optionally strip the leading `provider/` segment,
    /// then ensure the gateway's own prefix. Without one: a known
    /// `provider/` prefix is stripped when the provider has its own API
    /// base — the target endpoint wants the bare model name.
    fn resolve_model(&self, model: &str) -> String {
        if let Some(gateway) = self.gateway {
            let mut model = model.to_string();
            if gateway.strip_model_prefix {
                if let Some((_, rest)) = model.split_once('/') {
                    model = rest.to_string();
                }
            }
            let prefix = gateway.gateway_prefix;
            if !prefix.is_empty() && !model.starts_with(&format!("{prefix}/")) {
                model = format!("{prefix}/{model}");
            }
            return model;
        }

        if let Some(spec) = catalog::find_by_model(model) {
            if !spec.default_api_base.is_empty() && !spec.gateway_prefix.is_empty() {
                if let Some(rest) = model.strip_prefix(&format!("{}/", spec.gateway_prefix)) {
                    return rest.to_string();
                }
            }
        }
        model.to_string()
    }

    /// Apply per-model parameter overrides (substring match, lowercased).
    fn apply_model_overrides(model: &str, temperature: &mut f64) {
        let lower = model.to_lowercase();
        let Some(spec) = catalog::find_by_model(model) else {
            return;
        };
        for ov in spec.model_overrides {
            if lower.contains(ov.pattern) {
                if let Some(t) = ov.temperature {
                    *temperature = t;
                }
                return;
            }
        }
    }

    fn parse_response(body: &[u8]) -> LlmResponse {
        let parsed: CompletionResponse = match serde_json::from_slice(body) {
            Ok(p) => p,
            Err(e) => return LlmResponse::error(format!("Error parsing response: {e}")),
        };

        let Some(choice) = parsed.choices.into_iter().next() else {
            return LlmResponse::error("Error: no choices in response");
        };

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::Object(serde_json::Map::new()));
                ToolCallRequest {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        let mut usage = std::collections::HashMap::new();
        if let Some(u) = parsed.usage {
            usage.insert("prompt_tokens".to_string(), u.prompt_tokens);
            usage.insert("completion_tokens".to_string(), u.completion_tokens);
            usage.insert("total_tokens".to_string(), u.total_tokens);
        }

        let finish_reason = if choice.finish_reason.is_empty() {
            "stop".to_string()
        } else {
            choice.finish_reason
        };

        LlmResponse {
            content: choice.message.content,
            tool_calls,
            finish_reason,
            usage,
            reasoning_content: choice.message.reasoning_content,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn chat(&self, req: ChatRequest) -> Result<LlmResponse, ProviderError> {
        let model = if req.model.is_empty() {
            self.model.clone()
        } else {
            req.model.clone()
        };
        let model = self.resolve_model(&model);

        let max_tokens = if req.max_tokens < 1 {
            DEFAULT_MAX_TOKENS
        } else {
            req.max_tokens
        };

        let mut temperature = req.temperature;
        Self::apply_model_overrides(&model, &mut temperature);

        let mut body = json!({
            "model": model,
            "messages": req.messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.clone());
            body["tool_choice"] = Value::String("auto".into());
        }

        let api_base = if self.api_base.is_empty() {
            DEFAULT_API_BASE
        } else {
            &self.api_base
        };
        let endpoint = format!("{}/chat/completions", api_base.trim_end_matches('/'));
        debug!(%endpoint, %model, "chat completion request");

        let mut request = self.client.post(&endpoint).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        for (name, value) in &self.extra_headers {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Ok(LlmResponse::error(format!("Error calling LLM: {e}"))),
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => return Ok(LlmResponse::error(format!("Error reading response: {e}"))),
        };

        if !status.is_success() {
            return Ok(LlmResponse::error(format!(
                "Error calling LLM (HTTP {}): {}",
                status.as_u16(),
                String::from_utf8_lossy(&bytes)
            )));
        }

        Ok(Self::parse_response(&bytes))
    }

    fn default_model(&self) -> String {
        self.model.clone()
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: String,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<RawToolCall>,
}

#[derive(Deserialize)]
struct RawToolCall {
    id: String,
    function: RawToolFunction,
}

#[derive(Deserialize)]
struct RawToolFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_fallback() {
        let p = OpenAiProvider::new("key", "", "", "");
        assert_eq!(p.default_model(), DEFAULT_MODEL);
    }

    #[test]
    fn resolve_model_strips_known_prefix_for_native_api() {
        // DeepSeek's own endpoint wants the bare model name.
        let p = OpenAiProvider::new("key", "https://api.deepseek.com/v1", "", "");
        assert_eq!(p.resolve_model("deepseek/deepseek-chat"), "deepseek-chat");
    }

    #[test]
    fn resolve_model_leaves_bare_names_alone() {
        let p = OpenAiProvider::new("key", "", "", "");
        assert_eq!(p.resolve_model("deepseek-chat"), "deepseek-chat");
        // Gemini has no native default API base configured; its prefixed
        // form passes through untouched.
        assert_eq!(p.resolve_model("gemini/gemini-pro"), "gemini/gemini-pro");
    }

    #[test]
    fn gateway_prefixes_model() {
        let p = OpenAiProvider::new("sk-or-xyz", "https://openrouter.ai/api/v1", "", "");
        assert!(p.gateway().is_some());
        assert_eq!(
            p.resolve_model("anthropic/claude-sonnet-4-5"),
            "openrouter/anthropic/claude-sonnet-4-5"
        );
    }

    #[test]
    fn stripping_gateway_drops_provider_segment() {
        // AiHubMix strips "anthropic/" and prepends "openai/".
        let p = OpenAiProvider::new("key", "https://aihubmix.com/v1", "", "");
        assert_eq!(
            p.resolve_model("anthropic/claude-sonnet-4-5"),
            "openai/claude-sonnet-4-5"
        );
    }

    #[test]
    fn model_override_forces_temperature() {
        let mut temp = 0.7;
        OpenAiProvider::apply_model_overrides("moonshot/kimi-k2.5-chat", &mut temp);
        assert_eq!(temp, 1.0);

        let mut temp = 0.7;
        OpenAiProvider::apply_model_overrides("gpt-4o", &mut temp);
        assert_eq!(temp, 0.7);
    }

    #[test]
    fn parse_plain_response() {
        let body = serde_json::json!({
            "choices": [{
                "message": {"content": "Hello human!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        });
        let resp = OpenAiProvider::parse_response(body.to_string().as_bytes());
        assert_eq!(resp.content.as_deref(), Some("Hello human!"));
        assert_eq!(resp.finish_reason, "stop");
        assert_eq!(resp.usage["total_tokens"], 13);
        assert!(!resp.has_tool_calls());
    }

    #[test]
    fn parse_tool_call_response() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "type": "function",
                        "function": {"name": "list_dir", "arguments": "{\"path\": \"/tmp\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp = OpenAiProvider::parse_response(body.to_string().as_bytes());
        assert!(resp.has_tool_calls());
        assert_eq!(resp.tool_calls[0].name, "list_dir");
        assert_eq!(resp.tool_calls[0].arguments["path"], "/tmp");
    }

    #[test]
    fn parse_empty_choices_is_error_response() {
        let resp = OpenAiProvider::parse_response(br#"{"choices": []}"#);
        assert_eq!(resp.finish_reason, "error");
    }

    #[test]
    fn parse_garbage_is_error_response() {
        let resp = OpenAiProvider::parse_response(b"not json");
        assert_eq!(resp.finish_reason, "error");
        assert!(resp.content.unwrap().starts_with("Error parsing response"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_folds_into_error_response() {
        let p = OpenAiProvider::new("key", "http://127.0.0.1:1", "gpt-4o", "");
        let resp = p.chat(ChatRequest::default()).await.unwrap();
        assert_eq!(resp.finish_reason, "error");
        assert!(resp.content.unwrap().starts_with("Error calling LLM"));
    }
}
