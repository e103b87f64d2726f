//! Shell execution tool with deny-pattern guards and a hard timeout.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;

use crate::{opt_str_arg, str_arg, Tool, ToolError};

/// Patterns matching destructive commands, denied by default.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\brmdir\s+/s\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:",
];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_OUTPUT_CHARS: usize = 10_000;

/// Execute a shell command and return its combined output.
pub struct ExecTool {
    timeout: Duration,
    working_dir: Option<PathBuf>,
    deny_patterns: Vec<Regex>,
}

impl ExecTool {
    /// Create an exec tool with the default deny list and 60 s timeout.
    pub fn new() -> Self {
        let deny_patterns = DEFAULT_DENY_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self {
            timeout: DEFAULT_TIMEOUT,
            working_dir: None,
            deny_patterns,
        }
    }

    /// Override the execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the default working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn denied(&self, command: &str) -> bool {
        self.deny_patterns.iter().any(|re| re.is_match(command))
    }
}

impl Default for ExecTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The shell command to execute"},
                "working_dir": {"type": "string", "description": "Optional working directory"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let command = str_arg(&args, "command")?;
        if self.denied(command) {
            warn!(%command, "command denied by safety pattern");
            return Ok("Error: command denied by safety policy".into());
        }

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = opt_str_arg(&args, "working_dir") {
            cmd.current_dir(dir);
        } else if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Ok(format!(
                    "Error: command timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
            Ok(Err(e)) => return Ok(format!("Error: {e}")),
            Ok(Ok(out)) => out,
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("[stderr]\n");
            text.push_str(stderr.trim_end());
        }
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            text = format!("[exit code {code}]\n{text}");
        }
        if text.len() > MAX_OUTPUT_CHARS {
            text.truncate(MAX_OUTPUT_CHARS);
            text.push_str("\n… (output truncated)");
        }
        if text.trim().is_empty() {
            text = "(no output)".into();
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_output() {
        let tool = ExecTool::new();
        let out = tool
            .execute(json!({"command": "printf swarm"}))
            .await
            .unwrap();
        assert_eq!(out, "swarm");
    }

    #[tokio::test]
    async fn nonzero_exit_is_annotated() {
        let tool = ExecTool::new();
        let out = tool.execute(json!({"command": "exit 3"})).await.unwrap();
        assert!(out.starts_with("[exit code 3]"));
    }

    #[tokio::test]
    async fn dangerous_command_is_denied() {
        let tool = ExecTool::new();
        let out = tool
            .execute(json!({"command": "rm -rf /"}))
            .await
            .unwrap();
        assert_eq!(out, "Error: command denied by safety policy");
    }

    #[tokio::test]
    async fn fork_bomb_is_denied() {
        let tool = ExecTool::new();
        let out = tool
            .execute(json!({"command": ":(){ :|:& };:"}))
            .await
            .unwrap();
        assert!(out.starts_with("Error: command denied"));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let tool = ExecTool::new().with_timeout(Duration::from_millis(100));
        let out = tool.execute(json!({"command": "sleep 5"})).await.unwrap();
        assert!(out.starts_with("Error: command timed out"));
    }

    #[tokio::test]
    async fn working_dir_applies() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ExecTool::new().with_working_dir(dir.path());
        let out = tool.execute(json!({"command": "pwd"})).await.unwrap();
        assert!(out.trim().ends_with(
            dir.path().file_name().unwrap().to_str().unwrap()
        ));
    }
}
