//! The bounded reason/act loop.
//!
//! One [`AgentLoop`] per registered agent. Each call runs the cycle:
//! ask the provider, execute any requested tools, feed results back,
//! repeat until the model answers in plain text or the iteration cap is
//! hit. Tool failures never abort the cycle — they become tool messages
//! prefixed `"Error: "` that the model sees and can adapt to.

pub mod context;

use std::sync::Arc;

use parking_lot::RwLock;
use swarm_llm::{ChatMessage, ChatProvider, ChatRequest, LlmResponse};
use swarm_tools::ToolRegistry;
use tracing::{debug, warn};

use crate::errors::RuntimeError;
use crate::guard::{ContextGuard, GuardAction, GuardConfig};
use crate::session::SessionManager;

pub use context::ContextBuilder;

/// Sentinel reply when the loop exits by iteration cap.
pub const MAX_ITERATIONS_REACHED: &str = "Max iterations reached";

/// Tunable loop parameters. Hot-updatable through the registry.
#[derive(Clone, Debug)]
pub struct LoopParams {
    /// Model identifier; empty uses the provider default.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token cap.
    pub max_tokens: u32,
    /// Reason/act iteration cap.
    pub max_iterations: u32,
    /// Session history window (messages).
    pub memory_window: usize,
}

impl Default for LoopParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.7,
            max_tokens: 4096,
            max_iterations: 20,
            memory_window: 50,
        }
    }
}

/// The core processing engine: builds context, calls the LLM, executes
/// tools, and returns the assistant reply.
pub struct AgentLoop {
    provider: Arc<dyn ChatProvider>,
    tools: ToolRegistry,
    context: ContextBuilder,
    sessions: Arc<SessionManager>,
    guard: ContextGuard,
    params: RwLock<LoopParams>,
}

impl AgentLoop {
    /// Create a loop over a provider, tool set, and workspace.
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        tools: ToolRegistry,
        context: ContextBuilder,
        sessions: Arc<SessionManager>,
        params: LoopParams,
    ) -> Self {
        Self {
            provider,
            tools,
            context,
            sessions,
            guard: ContextGuard::new(GuardConfig::default()),
            params: RwLock::new(params),
        }
    }

    /// Snapshot of the current parameters.
    pub fn params(&self) -> LoopParams {
        self.params.read().clone()
    }

    /// Update parameters in place; non-zero/non-empty fields win.
    pub fn update_params(
        &self,
        model: Option<&str>,
        temperature: Option<f64>,
        max_tokens: Option<u32>,
        max_iterations: Option<u32>,
    ) {
        let mut params = self.params.write();
        if let Some(model) = model {
            if !model.is_empty() {
                params.model = model.to_string();
            }
        }
        if let Some(t) = temperature {
            if t > 0.0 {
                params.temperature = t;
            }
        }
        if let Some(mt) = max_tokens {
            if mt > 0 {
                params.max_tokens = mt;
            }
        }
        if let Some(mi) = max_iterations {
            if mi > 0 {
                params.max_iterations = mi;
            }
        }
    }

    /// The tool registry backing this loop.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// The context builder backing this loop.
    pub fn context(&self) -> &ContextBuilder {
        &self.context
    }

    /// Run the tool-calling cycle until the model produces a plain
    /// response or `max_iterations` is exhausted. Returns the final
    /// content and the tool names invoked, in order.
    pub async fn run(
        &self,
        mut messages: Vec<ChatMessage>,
    ) -> Result<(String, Vec<String>), RuntimeError> {
        let params = self.params();
        let mut tools_used = Vec::new();

        for iteration in 0..params.max_iterations {
            let response = self
                .provider
                .chat(ChatRequest {
                    messages: messages.clone(),
                    tools: self.tools.schemas(),
                    model: params.model.clone(),
                    max_tokens: params.max_tokens,
                    temperature: params.temperature,
                })
                .await?;

            if !response.has_tool_calls() {
                return Ok((response.content.unwrap_or_default(), tools_used));
            }

            debug!(
                iteration,
                calls = response.tool_calls.len(),
                "executing tool calls"
            );
            self.apply_tool_calls(&mut messages, &response, &mut tools_used)
                .await;
        }

        Ok((MAX_ITERATIONS_REACHED.to_string(), tools_used))
    }

    /// Append the assistant turn and one tool-result message per call.
    async fn apply_tool_calls(
        &self,
        messages: &mut Vec<ChatMessage>,
        response: &LlmResponse,
        tools_used: &mut Vec<String>,
    ) {
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
            tools_used.push(call.name.clone());
            let result = match self.tools.get(&call.name) {
                Some(tool) => match tool.execute(call.arguments.clone()).await {
                    Ok(output) => output,
                    Err(e) => format!("Error: {e}"),
                },
                None => {
                    warn!(tool = %call.name, "unknown tool requested");
                    format!("Error: unknown tool {:?}", call.name)
                }
            };
            messages.push(ChatMessage::tool_result(&call.id, &call.name, result));
        }
    }

    /// Process one message end-to-end: assemble context with session
    /// history, run the cycle, and record the exchange.
    pub async fn process_direct(
        &self,
        content: &str,
        session_key: &str,
        channel: &str,
        chat_id: &str,
    ) -> Result<String, RuntimeError> {
        let session_key = if session_key.is_empty() {
            "cli:direct"
        } else {
            session_key
        };
        let channel = if channel.is_empty() { "cli" } else { channel };
        let chat_id = if chat_id.is_empty() { "direct" } else { chat_id };

        let params = self.params();
        let history = self.sessions.history(session_key, params.memory_window);
        let mut messages = self.context.build_messages(history, content, channel, chat_id);

        // Token pre-check against the model's context window.
        let model = if params.model.is_empty() {
            self.provider.default_model()
        } else {
            params.model.clone()
        };
        let check = self.guard.pre_check(&messages, &model);
        let mut notice = String::new();
        match check.action {
            GuardAction::Reset => {
                self.sessions.clear(session_key)?;
                messages = self.context.build_messages(Vec::new(), content, channel, chat_id);
                notice = check.notification_message();
            }
            GuardAction::Compress => {
                // Halve the history window for this call.
                let trimmed = self
                    .sessions
                    .history(session_key, params.memory_window / 2);
                messages = self.context.build_messages(trimmed, content, channel, chat_id);
            }
            GuardAction::Warn | GuardAction::Pass => {}
        }

        let (mut final_content, _tools_used) = self.run(messages).await?;
        if final_content.is_empty() {
            final_content = "Completed processing.".to_string();
        }
        if !notice.is_empty() {
            final_content = format!("{notice}\n\n{final_content}");
        }

        self.sessions
            .record_exchange(session_key, content, &final_content)?;
        Ok(final_content)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use swarm_llm::{ProviderError, ToolCallRequest};
    use swarm_tools::{Tool, ToolError};

    use super::*;

    /// Provider returning a scripted sequence of responses.
    struct ScriptedProvider {
        script: Vec<LlmResponse>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<LlmResponse>) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<LlmResponse, ProviderError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.script.is_empty() {
                return Ok(LlmResponse::default());
            }
            Ok(self.script[i.min(self.script.len() - 1)].clone())
        }

        fn default_model(&self) -> String {
            "scripted".into()
        }
    }

    struct ListDirStub;

    #[async_trait]
    impl Tool for ListDirStub {
        fn name(&self) -> &str {
            "list_dir"
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            Ok("file_a\nfile_b".into())
        }
    }

    fn tool_call_response(name: &str) -> LlmResponse {
        LlmResponse {
            tool_calls: vec![ToolCallRequest {
                id: "c1".into(),
                name: name.into(),
                arguments: json!({"path": "/tmp"}),
            }],
            finish_reason: "tool_calls".into(),
            ..LlmResponse::default()
        }
    }

    fn make_loop(provider: Arc<dyn ChatProvider>, max_iterations: u32) -> (AgentLoop, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ListDirStub));
        let agent = AgentLoop::new(
            provider,
            tools,
            ContextBuilder::new(dir.path()),
            Arc::new(SessionManager::new(dir.path())),
            LoopParams {
                max_iterations,
                ..LoopParams::default()
            },
        );
        (agent, dir)
    }

    #[tokio::test]
    async fn single_turn_no_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![LlmResponse::text("Hello human!")]));
        let (agent, _dir) = make_loop(provider.clone(), 20);

        let (content, tools_used) =
            agent.run(vec![ChatMessage::user("Hi")]).await.unwrap();
        assert_eq!(content, "Hello human!");
        assert!(tools_used.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_tool_hop() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_response("list_dir"),
            LlmResponse::text("Directory listed"),
        ]));
        let (agent, _dir) = make_loop(provider.clone(), 20);

        let (content, tools_used) =
            agent.run(vec![ChatMessage::user("list /tmp")]).await.unwrap();
        assert_eq!(content, "Directory listed");
        assert_eq!(tools_used, vec!["list_dir"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn iteration_cap_returns_sentinel() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_call_response("list_dir")]));
        let (agent, _dir) = make_loop(provider.clone(), 3);

        let (content, tools_used) =
            agent.run(vec![ChatMessage::user("loop")]).await.unwrap();
        assert_eq!(content, MAX_ITERATIONS_REACHED);
        assert_eq!(tools_used.len(), 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn max_iterations_one_calls_provider_once() {
        let provider = Arc::new(ScriptedProvider::new(vec![LlmResponse::text("done")]));
        let (agent, _dir) = make_loop(provider.clone(), 1);
        let (content, _) = agent.run(vec![ChatMessage::user("x")]).await.unwrap();
        assert_eq!(content, "done");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_message() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_response("no_such_tool"),
            LlmResponse::text("recovered"),
        ]));
        let (agent, _dir) = make_loop(provider, 20);

        let (content, tools_used) =
            agent.run(vec![ChatMessage::user("x")]).await.unwrap();
        // The loop records the attempted name and keeps going.
        assert_eq!(content, "recovered");
        assert_eq!(tools_used, vec!["no_such_tool"]);
    }

    #[tokio::test]
    async fn process_direct_records_session() {
        let provider = Arc::new(ScriptedProvider::new(vec![LlmResponse::text("the reply")]));
        let (agent, _dir) = make_loop(provider, 20);

        let reply = agent
            .process_direct("a question", "cli:direct", "cli", "direct")
            .await
            .unwrap();
        assert_eq!(reply, "the reply");

        let history = agent.sessions.history("cli:direct", 10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ("user".to_string(), "a question".to_string()));
    }

    #[tokio::test]
    async fn process_direct_empty_reply_placeholder() {
        let provider = Arc::new(ScriptedProvider::new(vec![LlmResponse::text("")]));
        let (agent, _dir) = make_loop(provider, 20);
        let reply = agent.process_direct("q", "", "", "").await.unwrap();
        assert_eq!(reply, "Completed processing.");
    }

    #[tokio::test]
    async fn oversized_session_is_reset_with_notice() {
        let provider = Arc::new(ScriptedProvider::new(vec![LlmResponse::text("fresh start")]));
        let (agent, _dir) = make_loop(provider, 20);

        // Inflate the session far past the default 64k-token window.
        let huge = "x".repeat(150_000);
        agent
            .sessions
            .record_exchange("cli:direct", &huge, "ok")
            .unwrap();

        let reply = agent.process_direct("hello", "", "", "").await.unwrap();
        assert!(reply.contains("reset"));
        assert!(reply.ends_with("fresh start"));

        // Only the new exchange survives.
        let history = agent.sessions.history("cli:direct", 50);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].1, "hello");
    }

    #[test]
    fn update_params_ignores_zero_values() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let (agent, _dir) = make_loop(provider, 20);
        agent.update_params(Some("gpt-4o"), Some(0.0), Some(0), Some(12));
        let params = agent.params();
        assert_eq!(params.model, "gpt-4o");
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_tokens, 4096);
        assert_eq!(params.max_iterations, 12);
    }
}
