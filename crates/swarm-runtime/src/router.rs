//! LLM-based semantic intent routing.
//!
//! A lightweight router model classifies a message against the role
//! catalog and returns strict JSON naming a primary role plus related
//! roles with focused sub-questions. Results are validated against the
//! registered roles and cached briefly by content hash.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use swarm_llm::{ChatMessage, ChatProvider, ChatRequest};
use tracing::{debug, warn};

const CACHE_TTL: Duration = Duration::from_secs(60);
const CACHE_MAX: usize = 256;
const ROUTER_MAX_TOKENS: u32 = 300;
const ROUTER_TEMPERATURE: f64 = 0.1;

/// Fallback role when routing fails or nothing matches.
pub const DEFAULT_ROLE: &str = "general";

/// The routing analysis result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RouteResult {
    /// Primary agent id.
    pub primary: String,
    /// Related agent ids, by relevance.
    #[serde(default)]
    pub related: Vec<String>,
    /// Focused sub-question per related agent.
    #[serde(default)]
    pub sub_tasks: HashMap<String, String>,
    /// One-line routing rationale.
    #[serde(default)]
    pub reason: String,
    /// Involved domains.
    #[serde(default)]
    pub domains: Vec<String>,
}

impl RouteResult {
    fn general() -> Self {
        Self {
            primary: DEFAULT_ROLE.into(),
            ..Self::default()
        }
    }

    /// Primary + related, deduplicated, primary first.
    pub fn all_agents(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        seen.insert(self.primary.clone());
        let mut result = vec![self.primary.clone()];
        for id in &self.related {
            if seen.insert(id.clone()) {
                result.push(id.clone());
            }
        }
        result
    }
}

/// An available routing destination.
#[derive(Clone, Debug)]
pub struct Role {
    /// Role id (== agent id).
    pub id: String,
    /// What this role covers.
    pub description: String,
}

struct CacheEntry {
    result: RouteResult,
    at: Instant,
}

/// Semantic intent router backed by a dedicated (usually small) model.
pub struct LlmRouter {
    valid_ids: HashSet<String>,
    model: String,
    provider: Arc<dyn ChatProvider>,
    system_prompt: String,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl LlmRouter {
    /// Create a router over the given role catalog.
    pub fn new(roles: Vec<Role>, model: impl Into<String>, provider: Arc<dyn ChatProvider>) -> Self {
        let mut roles_block = String::new();
        for role in &roles {
            roles_block.push_str(&format!("- **{}**: {}\n", role.id, role.description));
        }
        let valid_ids = roles.iter().map(|r| r.id.clone()).collect();

        let system_prompt = format!(
            "You are a message router. Analyze the semantic intent of the user message, \
             pick the expert best suited to answer, and write a focused sub-question for \
             each related expert.\n\n\
             ## Available experts\n\n{roles_block}\n\
             ## Rules\n\
             1. Identify every domain the message touches.\n\
             2. Pick the most urgent/central domain as `primary`.\n\
             3. List genuinely relevant roles in `related`, most relevant first — never pad.\n\
             4. Give each related role one focused `sub_tasks` question (under 100 chars) \
             asking for its perspective.\n\
             5. Explain the routing in one short sentence.\n\n\
             ## Output format (strict JSON)\n\
             {{\"primary\":\"role_id\",\"related\":[\"id1\",\"id2\"],\
             \"sub_tasks\":{{\"id1\":\"question1\"}},\"reason\":\"one sentence\",\
             \"domains\":[\"domain1\"]}}\n\n\
             ## Notes\n\
             - Small talk, greetings, or unclear intent: primary is general, related empty.\n\
             - If only one domain is involved, related and sub_tasks may be empty."
        );

        Self {
            valid_ids,
            model: model.into(),
            provider,
            system_prompt,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Analyze a message for multi-domain routing. Always returns a
    /// result; failures fall back to the default role.
    pub async fn route_multi(&self, content: &str) -> RouteResult {
        let content = content.trim();
        if content.is_empty() {
            return RouteResult::general();
        }

        let key = content_hash(content);
        if let Some(hit) = self.cache_get(&key) {
            debug!(primary = %hit.primary, "router cache hit");
            return hit;
        }

        let mut result = match self.call_llm(content).await {
            Ok(r) => r,
            Err(reason) => {
                warn!(%reason, "router LLM failed, falling back to general");
                return RouteResult::general();
            }
        };

        if !self.valid_ids.contains(&result.primary) {
            warn!(primary = %result.primary, "router returned unknown primary");
            result.primary = DEFAULT_ROLE.into();
        }
        result.related.retain(|id| self.valid_ids.contains(id));

        self.cache_put(key, result.clone());
        debug!(primary = %result.primary, related = ?result.related, "router decision");
        result
    }

    async fn call_llm(&self, content: &str) -> Result<RouteResult, String> {
        let response = self
            .provider
            .chat(ChatRequest {
                messages: vec![
                    ChatMessage::system(self.system_prompt.clone()),
                    ChatMessage::user(content),
                ],
                tools: Vec::new(),
                model: self.model.clone(),
                max_tokens: ROUTER_MAX_TOKENS,
                temperature: ROUTER_TEMPERATURE,
            })
            .await
            .map_err(|e| e.to_string())?;

        let raw = response.content.unwrap_or_default();
        let raw = strip_code_fence(raw.trim());
        if raw.is_empty() {
            return Err("empty response".into());
        }

        match serde_json::from_str::<RouteResult>(&raw) {
            Ok(result) => Ok(result),
            Err(_) => {
                // Tolerate a bare role id.
                let candidate = raw.trim().to_lowercase();
                if self.valid_ids.contains(&candidate) {
                    Ok(RouteResult {
                        primary: candidate,
                        reason: "single-id fallback".into(),
                        ..RouteResult::default()
                    })
                } else {
                    Err(format!("unparseable router output: {raw:.100}"))
                }
            }
        }
    }

    fn cache_get(&self, key: &str) -> Option<RouteResult> {
        let cache = self.cache.lock();
        cache
            .get(key)
            .filter(|entry| entry.at.elapsed() < CACHE_TTL)
            .map(|entry| entry.result.clone())
    }

    fn cache_put(&self, key: String, result: RouteResult) {
        let mut cache = self.cache.lock();
        if cache.len() >= CACHE_MAX {
            // Evict the oldest entry.
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, entry)| entry.at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }
        cache.insert(key, CacheEntry {
            result,
            at: Instant::now(),
        });
    }
}

/// Short content hash for the router cache: lowercased, truncated to 200
/// chars, first 6 digest bytes as hex.
fn content_hash(content: &str) -> String {
    let mut text = content.trim().to_lowercase();
    if text.len() > 200 {
        let mut cut = 200;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    let digest = Sha256::digest(text.as_bytes());
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

/// Strip a fenced code block wrapper, if present.
fn strip_code_fence(raw: &str) -> String {
    if !raw.starts_with("```") {
        return raw.to_string();
    }
    let Some((_, rest)) = raw.split_once('\n') else {
        return raw.to_string();
    };
    match rest.rfind("```") {
        Some(idx) => rest[..idx].trim().to_string(),
        None => rest.trim().to_string(),
    }
}
