//! # swarm-tools
//!
//! The tool contract every agent tool honors, the name-keyed registry, and
//! the built-in tool set (filesystem, shell, web, messaging, subagent
//! spawning).
//!
//! Tool failures never crash the loop: user-level problems (missing file,
//! denied command) come back as `Ok` strings starting with `"Error: "`,
//! and hard failures are stringified the same way by the caller.

pub mod fs;
pub mod message;
pub mod registry;
pub mod shell;
pub mod web;

use async_trait::async_trait;
use serde_json::{json, Value};

pub use registry::ToolRegistry;

/// Errors from tool execution plumbing.
///
/// Runtime failures inside a tool (missing file, denied command, HTTP
/// trouble) are folded into `Ok` strings starting with `"Error: "`, so
/// the only hard error is a call whose arguments don't match the schema.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Arguments did not match the tool's schema.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

/// The contract every agent tool implements.
///
/// `name` is the stable identifier used in LLM function-call responses.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name — the exact string sent to/from the LLM.
    fn name(&self) -> &str;

    /// What the tool does.
    fn description(&self) -> &str;

    /// JSON Schema (object) for the tool's parameters.
    fn parameters(&self) -> Value;

    /// Run the tool with parsed JSON arguments.
    async fn execute(&self, args: Value) -> Result<String, ToolError>;
}

/// Convert a tool to OpenAI function-calling format.
pub fn to_schema(tool: &dyn Tool) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name(),
            "description": tool.description(),
            "parameters": tool.parameters(),
        }
    })
}

/// Extract a required string argument.
pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing string field {key:?}")))
}

/// Extract an optional string argument.
pub(crate) fn opt_str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}
