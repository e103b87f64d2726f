//! Filesystem tools: `read_file`, `write_file`, `list_dir`.
//!
//! Paths expand a leading `~` and may be restricted to an allowed
//! directory; violations come back as user-level `"Error: …"` strings.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{str_arg, Tool, ToolError};

/// Resolve a path, expanding `~` and enforcing the optional allowed
/// directory restriction.
fn resolve_path(path: &str, allowed_dir: Option<&Path>) -> Result<PathBuf, String> {
    let expanded = if let Some(rest) = path.strip_prefix('~') {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/".into());
        PathBuf::from(home).join(rest.trim_start_matches('/'))
    } else {
        PathBuf::from(path)
    };
    let resolved = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map_err(|e| e.to_string())?
            .join(expanded)
    };
    if let Some(allowed) = allowed_dir {
        if !resolved.starts_with(allowed) {
            return Err(format!(
                "path {} is outside allowed directory {}",
                path,
                allowed.display()
            ));
        }
    }
    Ok(resolved)
}

/// Read a file's contents.
#[derive(Default)]
pub struct ReadFileTool {
    /// Restrict reads to this directory when set.
    pub allowed_dir: Option<PathBuf>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "The file path to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let path = str_arg(&args, "path")?;
        let resolved = match resolve_path(path, self.allowed_dir.as_deref()) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: {e}")),
        };
        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(format!("Error: File not found: {path}"))
            }
            Err(e) => Ok(format!("Error reading file: {e}")),
        }
    }
}

/// Write content to a file, creating parent directories.
#[derive(Default)]
pub struct WriteFileTool {
    /// Restrict writes to this directory when set.
    pub allowed_dir: Option<PathBuf>,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "The file path to write"},
                "content": {"type": "string", "description": "The content to write"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let path = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;
        let resolved = match resolve_path(path, self.allowed_dir.as_deref()) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: {e}")),
        };
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(format!("Error creating directory: {e}"));
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => Ok(format!("Wrote {} bytes to {path}", content.len())),
            Err(e) => Ok(format!("Error writing file: {e}")),
        }
    }
}

/// List a directory's entries, directories first, sorted by name.
#[derive(Default)]
pub struct ListDirTool {
    /// Restrict listing to this directory when set.
    pub allowed_dir: Option<PathBuf>,
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "The directory path to list"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let path = str_arg(&args, "path")?;
        let resolved = match resolve_path(path, self.allowed_dir.as_deref()) {
            Ok(p) => p,
            Err(e) => return Ok(format!("Error: {e}")),
        };
        let mut read_dir = match tokio::fs::read_dir(&resolved).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(format!("Error: Directory not found: {path}"));
            }
            Err(e) => return Ok(format!("Error listing directory: {e}")),
        };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                dirs.push(format!("{name}/"));
            } else {
                files.push(name);
            }
        }
        dirs.sort();
        files.sort();
        dirs.extend(files);
        if dirs.is_empty() {
            return Ok(format!("(empty directory: {path})"));
        }
        Ok(dirs.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        let path_str = path.to_string_lossy().into_owned();

        let write = WriteFileTool::default();
        let out = write
            .execute(json!({"path": path_str, "content": "hello"}))
            .await
            .unwrap();
        assert!(out.starts_with("Wrote 5 bytes"));

        let read = ReadFileTool::default();
        let content = read.execute(json!({"path": path_str})).await.unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn read_missing_file_is_user_error() {
        let read = ReadFileTool::default();
        let out = read
            .execute(json!({"path": "/definitely/not/here.txt"}))
            .await
            .unwrap();
        assert!(out.starts_with("Error: File not found"));
    }

    #[tokio::test]
    async fn list_dir_sorts_dirs_first() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "x").await.unwrap();

        let list = ListDirTool::default();
        let out = list
            .execute(json!({"path": dir.path().to_string_lossy()}))
            .await
            .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, vec!["sub/", "a.txt"]);
    }

    #[tokio::test]
    async fn allowed_dir_blocks_escape() {
        let dir = tempfile::tempdir().unwrap();
        let read = ReadFileTool {
            allowed_dir: Some(dir.path().to_path_buf()),
        };
        let out = read.execute(json!({"path": "/etc/hosts"})).await.unwrap();
        assert!(out.starts_with("Error: path"));
    }

    #[test]
    fn tilde_expands_to_home() {
        std::env::set_var("HOME", "/home/tester");
        let resolved = resolve_path("~/notes.md", None).unwrap();
        assert_eq!(resolved, PathBuf::from("/home/tester/notes.md"));
    }
}
