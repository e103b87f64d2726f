//! Name-keyed tool registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::{to_schema, Tool};

/// Central index of registered tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Overwrites an existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool = tool.name(), "tool registered");
        self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All registered tools (arbitrary order).
    pub fn all(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.values().cloned().collect()
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// OpenAI function-call schemas for every registered tool.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.values().map(|t| to_schema(t.as_ref())).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Whether a tool with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::ToolError;

    struct StubTool(&'static str);

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            Ok("ok".into())
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(StubTool("read_file")));
        assert!(reg.get("read_file").is_some());
        assert!(reg.get("nope").is_none());
        assert!(reg.contains("read_file"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn register_same_name_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(StubTool("exec")));
        reg.register(Arc::new(StubTool("exec")));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn names_are_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(StubTool("web_fetch")));
        reg.register(Arc::new(StubTool("exec")));
        reg.register(Arc::new(StubTool("read_file")));
        assert_eq!(reg.names(), vec!["exec", "read_file", "web_fetch"]);
    }

    #[test]
    fn schemas_cover_all_tools() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(StubTool("a")));
        reg.register(Arc::new(StubTool("b")));
        let schemas = reg.schemas();
        assert_eq!(schemas.len(), 2);
        for schema in schemas {
            assert_eq!(schema["type"], "function");
        }
    }
}
