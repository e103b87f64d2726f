//! Business event rule engine.
//!
//! YAML-declared rules match incoming events by type (with wildcards) and
//! conditions, render a message template from the event payload, and
//! dispatch it to an agent through the same handler the chat path uses.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::errors::RuntimeError;

/// A single event matching rule.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Rule {
    /// Event type pattern: exact, `"prefix.*"`, or `"*"`.
    pub event_type: String,
    /// Agent that handles matching events.
    pub agent_id: String,
    /// Message template with `{key}` / `{a.b}` placeholders.
    pub template: String,
    /// Channel recorded on the dispatch session; `"none"` when empty.
    pub channel: String,
    /// Event field providing the dispatch target.
    pub target_field: String,
    /// Field conditions; `min_`/`max_` prefixes compare numerically.
    pub conditions: Map<String, Value>,
    /// Disabled rules never match (default enabled).
    pub enabled: Option<bool>,
    /// Higher priority dispatches first.
    pub priority: i64,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            event_type: String::new(),
            agent_id: String::new(),
            template: String::new(),
            channel: String::new(),
            target_field: String::new(),
            conditions: Map::new(),
            enabled: None,
            priority: 0,
        }
    }
}

impl Rule {
    /// Whether the rule is enabled (default true).
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Outcome of dispatching an event to one rule.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    /// The matched rule's event type.
    pub rule_type: String,
    /// The handling agent.
    pub agent_id: String,
    /// Agent reply, when dispatch succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Error, when dispatch failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The agent dispatch seam: `(content, session_key, channel, chat_id,
/// role_id)`.
pub type EventHandler = Arc<
    dyn Fn(String, String, String, String, String) -> BoxFuture<'static, Result<String, RuntimeError>>
        + Send
        + Sync,
>;

/// Matches events against YAML rules and dispatches them to agents.
pub struct EventEngine {
    rules: RwLock<Vec<Rule>>,
    handler: EventHandler,
    total_events: AtomicU64,
    total_dispatches: AtomicU64,
    total_errors: AtomicU64,
}

impl EventEngine {
    /// Create an engine with no rules loaded.
    pub fn new(handler: EventHandler) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            handler,
            total_events: AtomicU64::new(0),
            total_dispatches: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
        }
    }

    /// Load rules from every `.yaml`/`.yml` file in a directory,
    /// replacing the current set. A missing directory is not an error.
    pub fn load_rules(&self, dir: &Path) -> Result<(), RuntimeError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(dir = %dir.display(), "no events directory");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut rules = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".yaml") && !name.ends_with(".yml") {
                continue;
            }
            let content = match std::fs::read_to_string(entry.path()) {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = %name, error = %e, "failed to read rule file");
                    continue;
                }
            };
            match serde_yaml::from_str::<Vec<Rule>>(&content) {
                Ok(file_rules) => rules.extend(file_rules),
                Err(e) => warn!(file = %name, error = %e, "failed to parse rule file"),
            }
        }

        info!(count = rules.len(), dir = %dir.display(), "event rules loaded");
        *self.rules.write() = rules;
        Ok(())
    }

    /// Number of loaded rules.
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Process a business event: match all enabled rules, then dispatch
    /// in priority order (highest first).
    pub async fn ingest(&self, event: &Map<String, Value>) -> Vec<DispatchResult> {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let Some(event_type) = event.get("type").and_then(Value::as_str) else {
            return vec![DispatchResult {
                rule_type: String::new(),
                agent_id: String::new(),
                response: None,
                error: Some("event missing 'type' field".into()),
            }];
        };

        let mut matched: Vec<Rule> = self
            .rules
            .read()
            .iter()
            .filter(|rule| {
                rule.is_enabled()
                    && match_type(&rule.event_type, event_type)
                    && match_conditions(rule, event)
            })
            .cloned()
            .collect();

        if matched.is_empty() {
            info!(event_type, "no rules matched");
            return Vec::new();
        }
        matched.sort_by_key(|rule| std::cmp::Reverse(rule.priority));

        let mut results = Vec::with_capacity(matched.len());
        for rule in matched {
            results.push(self.dispatch(&rule, event).await);
        }
        results
    }

    async fn dispatch(&self, rule: &Rule, event: &Map<String, Value>) -> DispatchResult {
        let content = render_template(&rule.template, event);
        let target = if rule.target_field.is_empty() {
            String::new()
        } else {
            event
                .get(&rule.target_field)
                .map(value_to_string)
                .unwrap_or_default()
        };
        let session_key = format!("event:{}:{}", rule.event_type, target);
        let channel = if rule.channel.is_empty() {
            "none".to_string()
        } else {
            rule.channel.clone()
        };

        self.total_dispatches.fetch_add(1, Ordering::Relaxed);
        match (self.handler)(
            content,
            session_key,
            channel,
            String::new(),
            rule.agent_id.clone(),
        )
        .await
        {
            Ok(response) => {
                info!(
                    event_type = %rule.event_type,
                    agent = %rule.agent_id,
                    chars = response.len(),
                    "event dispatched"
                );
                DispatchResult {
                    rule_type: rule.event_type.clone(),
                    agent_id: rule.agent_id.clone(),
                    response: Some(response),
                    error: None,
                }
            }
            Err(e) => {
                self.total_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_type = %rule.event_type,
                    agent = %rule.agent_id,
                    error = %e,
                    "event dispatch failed"
                );
                DispatchResult {
                    rule_type: rule.event_type.clone(),
                    agent_id: rule.agent_id.clone(),
                    response: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Engine statistics.
    pub fn stats(&self) -> Value {
        let rules = self.rules.read();
        let mut by_type: Map<String, Value> = Map::new();
        for rule in rules.iter() {
            let counter = by_type
                .entry(rule.event_type.clone())
                .or_insert(Value::from(0));
            *counter = Value::from(counter.as_u64().unwrap_or(0) + 1);
        }
        json!({
            "totalRules": rules.len(),
            "totalEvents": self.total_events.load(Ordering::Relaxed),
            "totalDispatches": self.total_dispatches.load(Ordering::Relaxed),
            "totalErrors": self.total_errors.load(Ordering::Relaxed),
            "rulesByType": by_type,
        })
    }
}

/// Match an event type against a rule pattern (`*` and `prefix.*`).
fn match_type(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return event_type.starts_with(&format!("{prefix}."));
    }
    pattern == event_type
}

/// Check every rule condition against the event. `min_`/`max_` keys
/// compare numerically; other keys compare as strings.
fn match_conditions(rule: &Rule, event: &Map<String, Value>) -> bool {
    for (key, expected) in &rule.conditions {
        let Some(actual) = event.get(key) else {
            return false;
        };
        match expected {
            Value::Number(n) => {
                let Some(expected) = n.as_f64() else {
                    return false;
                };
                let Some(actual) = actual.as_f64() else {
                    return false;
                };
                let ok = if key.starts_with("min_") {
                    actual >= expected
                } else if key.starts_with("max_") {
                    actual <= expected
                } else {
                    actual == expected
                };
                if !ok {
                    return false;
                }
            }
            Value::String(expected) => {
                if value_to_string(actual) != *expected {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render `{key}` and nested `{a.b}` placeholders from the event.
/// Unresolved placeholders are preserved.
pub fn render_template(template: &str, data: &Map<String, Value>) -> String {
    let re = Regex::new(r"\{([^}]+)\}").expect("static regex");
    re.replace_all(template, |caps: &regex::Captures<'_>| {
        match nested_value(data, &caps[1]) {
            Some(value) => value_to_string(&value),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

fn nested_value(data: &Map<String, Value>, path: &str) -> Option<Value> {
    let mut current = Value::Object(data.clone());
    for part in path.split('.') {
        current = current.as_object()?.get(part)?.clone();
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_handler() -> EventHandler {
        Arc::new(|content, session_key, _channel, _chat, role| {
            Box::pin(async move { Ok(format!("[{role}@{session_key}] {content}")) })
        })
    }

    fn engine_with_rules(yaml: &str) -> EventEngine {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rules.yaml"), yaml).unwrap();
        let engine = EventEngine::new(ok_handler());
        engine.load_rules(dir.path()).unwrap();
        engine
    }

    fn event(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn dispatches_matching_rule() {
        let engine = engine_with_rules(
            r#"
- event_type: order.created
  agent_id: sales
  template: "New order {order_id} for {amount}"
  target_field: order_id
"#,
        );
        assert_eq!(engine.rule_count(), 1);

        let results = engine
            .ingest(&event(&[
                ("type", json!("order.created")),
                ("order_id", json!("o-77")),
                ("amount", json!(129.5)),
            ]))
            .await;

        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.agent_id, "sales");
        let response = r.response.as_ref().unwrap();
        assert!(response.contains("New order o-77 for 129.5"));
        assert!(response.contains("event:order.created:o-77"));
    }

    #[tokio::test]
    async fn wildcard_and_prefix_patterns() {
        let engine = engine_with_rules(
            r#"
- event_type: "order.*"
  agent_id: sales
  template: "t"
- event_type: "*"
  agent_id: audit
  template: "t"
  priority: 5
"#,
        );
        let results = engine
            .ingest(&event(&[("type", json!("order.cancelled"))]))
            .await;
        assert_eq!(results.len(), 2);
        // Higher priority dispatches first.
        assert_eq!(results[0].agent_id, "audit");
        assert_eq!(results[1].agent_id, "sales");
    }

    #[tokio::test]
    async fn min_max_conditions() {
        let engine = engine_with_rules(
            r#"
- event_type: payment
  agent_id: finance
  template: "big payment"
  conditions:
    min_amount: 1000
"#,
        );
        let small = engine
            .ingest(&event(&[("type", json!("payment")), ("min_amount", json!(10))]))
            .await;
        assert!(small.is_empty());

        let big = engine
            .ingest(&event(&[
                ("type", json!("payment")),
                ("min_amount", json!(5000)),
            ]))
            .await;
        assert_eq!(big.len(), 1);
    }

    #[tokio::test]
    async fn disabled_rules_never_match() {
        let engine = engine_with_rules(
            r#"
- event_type: ping
  agent_id: general
  template: "t"
  enabled: false
"#,
        );
        assert!(engine.ingest(&event(&[("type", json!("ping"))])).await.is_empty());
    }

    #[tokio::test]
    async fn missing_type_is_an_error_result() {
        let engine = engine_with_rules("[]");
        let results = engine.ingest(&event(&[("other", json!(1))])).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].error.as_ref().unwrap().contains("type"));
    }

    #[tokio::test]
    async fn handler_errors_are_recorded() {
        let handler: EventHandler = Arc::new(|_, _, _, _, _| {
            Box::pin(async { Err(RuntimeError::UnknownRole("ghost".into())) })
        });
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("r.yml"),
            "- event_type: ping\n  agent_id: ghost\n  template: t\n",
        )
        .unwrap();
        let engine = EventEngine::new(handler);
        engine.load_rules(dir.path()).unwrap();

        let results = engine.ingest(&event(&[("type", json!("ping"))])).await;
        assert!(results[0].error.is_some());
        assert_eq!(engine.stats()["totalErrors"], 1);
    }

    #[test]
    fn template_renders_nested_paths() {
        let data = event(&[
            ("user", json!({"name": "Ada", "vip": true})),
            ("amount", json!(42)),
        ]);
        let rendered = render_template("{user.name} paid {amount}; {missing} stays", &data);
        assert_eq!(rendered, "Ada paid 42; {missing} stays");
    }

    #[test]
    fn missing_events_directory_is_fine() {
        let engine = EventEngine::new(ok_handler());
        engine
            .load_rules(Path::new("/no/such/events/dir"))
            .unwrap();
        assert_eq!(engine.rule_count(), 0);
    }
}
