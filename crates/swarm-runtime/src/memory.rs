//! Two-layer workspace memory: `memory/MEMORY.md` (long-term, injected
//! into the system prompt) and `memory/HISTORY.md` (append-only,
//! grep-searchable log).

use std::path::{Path, PathBuf};

use crate::errors::RuntimeError;

/// File-backed memory store rooted at `<workspace>/memory`.
pub struct MemoryStore {
    memory_file: PathBuf,
    history_file: PathBuf,
}

impl MemoryStore {
    /// Create a store, ensuring the memory directory exists.
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        let dir = workspace.as_ref().join("memory");
        let _ = std::fs::create_dir_all(&dir);
        Self {
            memory_file: dir.join("MEMORY.md"),
            history_file: dir.join("HISTORY.md"),
        }
    }

    /// Read the long-term memory file, empty when absent.
    pub fn read_long_term(&self) -> String {
        std::fs::read_to_string(&self.memory_file).unwrap_or_default()
    }

    /// Replace the long-term memory file.
    pub fn write_long_term(&self, content: &str) -> Result<(), RuntimeError> {
        std::fs::write(&self.memory_file, content)?;
        Ok(())
    }

    /// Append an entry to the history log.
    pub fn append_history(&self, entry: &str) -> Result<(), RuntimeError> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_file)?;
        writeln!(file, "{}\n", entry.trim_end_matches('\n'))?;
        Ok(())
    }

    /// Formatted memory block for the system prompt, empty when there is
    /// no long-term memory.
    pub fn memory_context(&self) -> String {
        let long_term = self.read_long_term();
        if long_term.is_empty() {
            String::new()
        } else {
            format!("## Long-term Memory\n{long_term}")
        }
    }
}
