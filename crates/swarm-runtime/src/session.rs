//! Conversation sessions with JSONL persistence.
//!
//! One file per session under `<workspace>/sessions/`, named after the
//! session key with `:` mapped to `_`. The first line is a metadata
//! record `{"_type":"metadata",…}`; every following line is one message.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::RuntimeError;

/// A single conversation message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMessage {
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// Message text.
    pub content: String,
    /// RFC 3339 timestamp.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    /// Channel-specific metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,
}

/// A conversation's message history. Append-only from the loop's view.
#[derive(Clone, Debug)]
pub struct Session {
    /// Session key: `"<channel>:<chatId>"`.
    pub key: String,
    /// Messages in arrival order.
    pub messages: Vec<SessionMessage>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Index up to which history has been consolidated into memory.
    pub last_consolidated: usize,
}

impl Session {
    fn new(key: &str) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            last_consolidated: 0,
        }
    }

    /// Append a message.
    pub fn add_message(&mut self, role: &str, content: &str) {
        self.messages.push(SessionMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            extra: None,
        });
        self.updated_at = Utc::now();
    }

    /// The last `max_messages` messages as `(role, content)` pairs.
    pub fn history(&self, max_messages: usize) -> Vec<(String, String)> {
        let start = self.messages.len().saturating_sub(max_messages);
        self.messages[start..]
            .iter()
            .map(|m| (m.role.clone(), m.content.clone()))
            .collect()
    }

    /// Remove all messages and reset the consolidation mark.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.last_consolidated = 0;
        self.updated_at = Utc::now();
    }
}

#[derive(Serialize, Deserialize)]
struct MetadataLine {
    #[serde(rename = "_type")]
    record_type: String,
    created_at: String,
    updated_at: String,
    last_consolidated: usize,
}

/// Manages sessions with an in-memory cache over JSONL files.
pub struct SessionManager {
    sessions_dir: PathBuf,
    cache: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    /// Create a manager rooted at `<data_dir>/sessions`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref().join("sessions");
        let _ = std::fs::create_dir_all(&dir);
        Self {
            sessions_dir: dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The last `max_messages` of a session's history.
    pub fn history(&self, key: &str, max_messages: usize) -> Vec<(String, String)> {
        let mut cache = self.cache.lock();
        self.entry(&mut cache, key).history(max_messages)
    }

    /// Append a user/assistant exchange and persist the session.
    pub fn record_exchange(
        &self,
        key: &str,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<(), RuntimeError> {
        let session = {
            let mut cache = self.cache.lock();
            let session = self.entry(&mut cache, key);
            session.add_message("user", user_content);
            session.add_message("assistant", assistant_content);
            session.clone()
        };
        self.save(&session)
    }

    /// Drop a session from the cache (next access reloads from disk).
    pub fn invalidate(&self, key: &str) {
        self.cache.lock().remove(key);
    }

    /// Clear a session's messages and persist the empty state.
    pub fn clear(&self, key: &str) -> Result<(), RuntimeError> {
        let session = {
            let mut cache = self.cache.lock();
            let session = self.entry(&mut cache, key);
            session.clear();
            session.clone()
        };
        self.save(&session)
    }

    /// Info about every stored session, from file metadata lines.
    pub fn list_sessions(&self) -> Vec<Map<String, Value>> {
        let Ok(entries) = std::fs::read_dir(&self.sessions_dir) else {
            return Vec::new();
        };
        let mut result = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(".jsonl") else {
                continue;
            };
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let Some(first) = content.lines().next() else {
                continue;
            };
            let Ok(meta) = serde_json::from_str::<MetadataLine>(first) else {
                continue;
            };
            if meta.record_type != "metadata" {
                continue;
            }
            let mut info = Map::new();
            info.insert("key".into(), Value::String(stem.replace('_', ":")));
            info.insert(
                "path".into(),
                Value::String(entry.path().to_string_lossy().into_owned()),
            );
            info.insert("created_at".into(), Value::String(meta.created_at));
            info.insert("updated_at".into(), Value::String(meta.updated_at));
            result.push(info);
        }
        result
    }

    fn entry<'a>(&self, cache: &'a mut HashMap<String, Session>, key: &str) -> &'a mut Session {
        cache
            .entry(key.to_string())
            .or_insert_with(|| self.load(key).unwrap_or_else(|| Session::new(key)))
    }

    fn session_path(&self, key: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.jsonl", key.replace(':', "_")))
    }

    fn load(&self, key: &str) -> Option<Session> {
        let content = std::fs::read_to_string(self.session_path(key)).ok()?;
        let mut lines = content.lines();
        let meta: MetadataLine = serde_json::from_str(lines.next()?).ok()?;
        if meta.record_type != "metadata" {
            return None;
        }
        let mut session = Session::new(key);
        if let Ok(ts) = DateTime::parse_from_rfc3339(&meta.created_at) {
            session.created_at = ts.with_timezone(&Utc);
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(&meta.updated_at) {
            session.updated_at = ts.with_timezone(&Utc);
        }
        session.last_consolidated = meta.last_consolidated;
        for line in lines {
            match serde_json::from_str::<SessionMessage>(line) {
                Ok(msg) => session.messages.push(msg),
                Err(e) => warn!(key, error = %e, "skipping corrupt session line"),
            }
        }
        Some(session)
    }

    fn save(&self, session: &Session) -> Result<(), RuntimeError> {
        let path = self.session_path(&session.key);
        let mut file = std::fs::File::create(path)?;
        let meta = MetadataLine {
            record_type: "metadata".into(),
            created_at: session.created_at.to_rfc3339(),
            updated_at: session.updated_at.to_rfc3339(),
            last_consolidated: session.last_consolidated,
        };
        writeln!(file, "{}", serde_json::to_string(&meta)?)?;
        for msg in &session.messages {
            writeln!(file, "{}", serde_json::to_string(msg)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path());
        mgr.record_exchange("cli:direct", "hi", "hello!").unwrap();

        // Fresh manager re-reads from disk.
        let mgr2 = SessionManager::new(dir.path());
        let history = mgr2.history("cli:direct", 50);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ("user".to_string(), "hi".to_string()));
        assert_eq!(history[1], ("assistant".to_string(), "hello!".to_string()));
    }

    #[test]
    fn first_line_is_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path());
        mgr.record_exchange("tg:42", "q", "a").unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("sessions").join("tg_42.jsonl")).unwrap();
        let first: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first["_type"], "metadata");
        assert!(first.get("created_at").is_some());
        assert!(first.get("last_consolidated").is_some());
    }

    #[test]
    fn history_windows_to_last_n() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path());
        for i in 0..5 {
            mgr.record_exchange("cli:direct", &format!("q{i}"), &format!("a{i}"))
                .unwrap();
        }
        let history = mgr.history("cli:direct", 3);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].1, "a3");
        assert_eq!(history[2].1, "a4");
    }

    #[test]
    fn list_sessions_restores_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path());
        mgr.record_exchange("telegram:42", "q", "a").unwrap();
        mgr.record_exchange("slack:C9", "q", "a").unwrap();

        let mut keys: Vec<String> = mgr
            .list_sessions()
            .iter()
            .map(|info| info["key"].as_str().unwrap().to_string())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["slack:C9", "telegram:42"]);
    }

    #[test]
    fn clear_empties_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path());
        mgr.record_exchange("cli:direct", "q", "a").unwrap();
        mgr.clear("cli:direct").unwrap();
        assert!(mgr.history("cli:direct", 10).is_empty());

        let mgr2 = SessionManager::new(dir.path());
        assert!(mgr2.history("cli:direct", 10).is_empty());
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::new(dir.path());
        mgr.record_exchange("cli:direct", "q", "a").unwrap();

        let path = dir.path().join("sessions").join("cli_direct.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{broken\n");
        std::fs::write(&path, content).unwrap();

        let mgr2 = SessionManager::new(dir.path());
        assert_eq!(mgr2.history("cli:direct", 10).len(), 2);
    }
}
