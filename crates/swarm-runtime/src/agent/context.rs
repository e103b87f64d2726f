//! System prompt and message-list assembly.

use std::path::{Path, PathBuf};

use chrono::Local;
use swarm_llm::ChatMessage;

use crate::memory::MemoryStore;
use crate::skills::SkillsLoader;

/// Workspace files folded into the system prompt when present.
pub const BOOTSTRAP_FILES: &[&str] = &["AGENTS.md", "SOUL.md", "USER.md", "TOOLS.md", "IDENTITY.md"];

/// Assembles system prompts and message lists for the loop.
pub struct ContextBuilder {
    workspace: PathBuf,
    memory: MemoryStore,
    skills: SkillsLoader,
}

impl ContextBuilder {
    /// Create a builder for a workspace.
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        let workspace = workspace.as_ref().to_path_buf();
        Self {
            memory: MemoryStore::new(&workspace),
            skills: SkillsLoader::new(&workspace, None),
            workspace,
        }
    }

    /// The workspace memory store.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// The workspace skills loader.
    pub fn skills(&self) -> &SkillsLoader {
        &self.skills
    }

    /// Full system prompt: identity, bootstrap files, long-term memory,
    /// and the skills manifest.
    pub fn build_system_prompt(&self) -> String {
        let mut parts = vec![self.identity()];

        let bootstrap = self.load_bootstrap_files();
        if !bootstrap.is_empty() {
            parts.push(bootstrap);
        }
        let memory = self.memory.memory_context();
        if !memory.is_empty() {
            parts.push(format!("# Memory\n\n{memory}"));
        }
        let manifest = self.skills.skills_manifest();
        if !manifest.is_empty() {
            parts.push(format!(
                "# Skills\n\nThe following skills extend your capabilities. To use a skill, \
                 read its SKILL.md file using the read_file tool.\n\n{manifest}"
            ));
        }
        parts.join("\n\n---\n\n")
    }

    fn identity(&self) -> String {
        let now = Local::now().format("%Y-%m-%d %H:%M (%A)");
        let workspace = self
            .workspace
            .canonicalize()
            .unwrap_or_else(|_| self.workspace.clone());
        let ws = workspace.display();
        format!(
            "# swarm\n\n\
             You are a helpful AI assistant serving one node of a swarm cluster. \
             You have access to tools that allow you to:\n\
             - Read, write, and list files\n\
             - Execute shell commands\n\
             - Search the web and fetch web pages\n\
             - Send messages to users on chat channels\n\
             - Spawn subagents for complex background tasks\n\n\
             ## Current Time\n{now}\n\n\
             ## Runtime\n{} {}, Rust\n\n\
             ## Workspace\nYour workspace is at: {ws}\n\
             - Long-term memory: {ws}/memory/MEMORY.md\n\
             - History log: {ws}/memory/HISTORY.md (grep-searchable)\n\
             - Custom skills: {ws}/skills/{{skill-name}}/SKILL.md\n\n\
             Always be helpful, accurate, and concise.",
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }

    fn load_bootstrap_files(&self) -> String {
        let parts: Vec<String> = BOOTSTRAP_FILES
            .iter()
            .filter_map(|name| {
                std::fs::read_to_string(self.workspace.join(name))
                    .ok()
                    .map(|content| format!("## {name}\n\n{content}"))
            })
            .collect();
        parts.join("\n\n")
    }

    /// The full message list for a new request: system prompt (plus a
    /// "Current Session" tail when channel and chat are known), session
    /// history, then the user message.
    pub fn build_messages(
        &self,
        history: Vec<(String, String)>,
        user_msg: &str,
        channel: &str,
        chat_id: &str,
    ) -> Vec<ChatMessage> {
        let mut system = self.build_system_prompt();
        if !channel.is_empty() && !chat_id.is_empty() {
            system.push_str(&format!(
                "\n\n## Current Session\nChannel: {channel}\nChat ID: {chat_id}"
            ));
        }

        let mut messages = vec![ChatMessage::system(system)];
        for (role, content) in history {
            messages.push(ChatMessage {
                role,
                content,
                tool_calls: None,
                tool_call_id: None,
                name: None,
                reasoning_content: None,
            });
        }
        messages.push(ChatMessage::user(user_msg));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_contains_identity_and_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ContextBuilder::new(dir.path());
        let prompt = builder.build_system_prompt();
        assert!(prompt.contains("## Current Time"));
        assert!(prompt.contains("## Workspace"));
    }

    #[test]
    fn bootstrap_files_are_folded_in() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SOUL.md"), "Be kind.").unwrap();
        std::fs::write(dir.path().join("USER.md"), "Name: Ada").unwrap();
        let builder = ContextBuilder::new(dir.path());
        let prompt = builder.build_system_prompt();
        assert!(prompt.contains("## SOUL.md"));
        assert!(prompt.contains("Be kind."));
        assert!(prompt.contains("## USER.md"));
        // Absent bootstrap files leave no header behind.
        assert!(!prompt.contains("## TOOLS.md"));
    }

    #[test]
    fn messages_order_system_history_user() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ContextBuilder::new(dir.path());
        let history = vec![
            ("user".to_string(), "earlier".to_string()),
            ("assistant".to_string(), "reply".to_string()),
        ];
        let messages = builder.build_messages(history, "now", "telegram", "42");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("## Current Session"));
        assert!(messages[0].content.contains("Channel: telegram"));
        assert_eq!(messages[1].content, "earlier");
        assert_eq!(messages[3].role, "user");
        assert_eq!(messages[3].content, "now");
    }

    #[test]
    fn session_tail_needs_both_channel_and_chat() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ContextBuilder::new(dir.path());
        let messages = builder.build_messages(Vec::new(), "hi", "telegram", "");
        assert!(!messages[0].content.contains("## Current Session"));
    }
}
