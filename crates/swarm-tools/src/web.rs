//! Web tools: `web_search` (Brave Search API) and `web_fetch`.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::{str_arg, Tool, ToolError};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_7_2) AppleWebKit/537.36";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_FETCH_MAX_CHARS: usize = 50_000;
const MAX_REDIRECTS: usize = 5;

/// Search the web via the Brave Search API.
pub struct WebSearchTool {
    api_key: Option<String>,
    max_results: usize,
    client: reqwest::Client,
}

impl WebSearchTool {
    /// Create a search tool. A `None` key falls back to `BRAVE_API_KEY`.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            max_results: 5,
            client: reqwest::Client::builder()
                .timeout(SEARCH_TIMEOUT)
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, URLs, and snippets."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "count": {"type": "integer", "description": "Results (1-10)"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let api_key = self
            .api_key
            .clone()
            .or_else(|| std::env::var("BRAVE_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            return Ok("Error: BRAVE_API_KEY not configured".into());
        }

        let query = str_arg(&args, "query")?;
        let mut count = self.max_results;
        if let Some(c) = args.get("count").and_then(Value::as_u64) {
            if (1..=10).contains(&c) {
                count = c as usize;
            }
        }

        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query), ("count", &count.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &api_key)
            .send()
            .await;
        let response = match response {
            Ok(r) => r,
            Err(e) => return Ok(format!("Error: {e}")),
        };

        let data: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return Ok(format!("Error: {e}")),
        };
        let results = data["web"]["results"].as_array().cloned().unwrap_or_default();
        if results.is_empty() {
            return Ok(format!("No results for: {query}"));
        }

        let mut lines = vec![format!("Results for: {query}\n")];
        for (i, item) in results.iter().take(count).enumerate() {
            let title = item["title"].as_str().unwrap_or("");
            let url = item["url"].as_str().unwrap_or("");
            lines.push(format!("{}. {title}\n   {url}", i + 1));
            if let Some(desc) = item["description"].as_str() {
                if !desc.is_empty() {
                    lines.push(format!("   {desc}"));
                }
            }
        }
        Ok(lines.join("\n"))
    }
}

/// Fetch a URL and extract readable text.
///
/// The result is a JSON object the model can reason about:
/// `{url, finalUrl, status, truncated, length, text}` on success,
/// `{error, url}` on failure.
pub struct WebFetchTool {
    max_chars: usize,
    client: reqwest::Client,
}

impl WebFetchTool {
    /// Create a fetch tool with the default size cap.
    pub fn new() -> Self {
        Self {
            max_chars: DEFAULT_FETCH_MAX_CHARS,
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .user_agent(USER_AGENT)
                .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
                .build()
                .unwrap_or_default(),
        }
    }

    fn error_result(url: &str, message: impl Into<String>) -> String {
        json!({"error": message.into(), "url": url}).to_string()
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject anything that isn't an http(s) URL with a host.
fn validate_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| format!("only http/https allowed: {url}"))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return Err("missing domain".to_string());
    }
    Ok(())
}

/// Strip scripts, styles, and tags from HTML.
fn strip_tags(html: &str) -> String {
    let scripts =
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("static regex");
    let tags = Regex::new(r"(?s)<[^>]+>").expect("static regex");
    let without_scripts = scripts.replace_all(html, " ");
    tags.replace_all(&without_scripts, " ").trim().to_string()
}

/// Collapse runs of spaces and blank lines.
fn normalize_whitespace(text: &str) -> String {
    let spaces = Regex::new(r"[ \t]+").expect("static regex");
    let collapsed = spaces.replace_all(text, " ");
    collapsed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch URL and extract readable content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to fetch"},
                "max_chars": {"type": "integer", "minimum": 100}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let url = str_arg(&args, "url")?;
        if let Err(reason) = validate_url(url) {
            return Ok(Self::error_result(url, format!("URL validation failed: {reason}")));
        }

        let mut max_chars = self.max_chars;
        if let Some(m) = args.get("max_chars").and_then(Value::as_u64) {
            if m >= 100 {
                max_chars = m as usize;
            }
        }

        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return Ok(Self::error_result(url, e.to_string())),
        };
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return Ok(Self::error_result(url, e.to_string())),
        };

        let mut text = normalize_whitespace(&strip_tags(&body));
        let truncated = text.len() > max_chars;
        if truncated {
            let mut cut = max_chars;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }

        Ok(json!({
            "url": url,
            "finalUrl": final_url,
            "status": status,
            "truncated": truncated,
            "length": text.len(),
            "text": text,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_tags_removes_scripts_and_markup() {
        let html = r#"<html><head><script>alert(1)</script></head>
            <body><h1>Title</h1><p>Hello <b>world</b></p></body></html>"#;
        let text = normalize_whitespace(&strip_tags(html));
        assert!(text.contains("Title"));
        assert!(text.contains("Hello"));
        assert!(!text.contains("alert"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn normalize_whitespace_collapses_runs() {
        let text = normalize_whitespace("a   b\t\tc\n\n\n  d  \n");
        assert_eq!(text, "a b c\nd");
    }

    #[test]
    fn validate_url_accepts_http_and_https_only() {
        assert!(validate_url("https://example.com/page").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("https:///no-host").is_err());
    }

    #[tokio::test]
    async fn fetch_rejects_non_http_scheme() {
        let tool = WebFetchTool::new();
        let out = tool
            .execute(json!({"url": "file:///etc/passwd"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert!(parsed["error"]
            .as_str()
            .unwrap()
            .starts_with("URL validation failed"));
        assert_eq!(parsed["url"], "file:///etc/passwd");
    }

    #[tokio::test]
    async fn search_without_key_is_user_error() {
        std::env::remove_var("BRAVE_API_KEY");
        let tool = WebSearchTool::new(None);
        let out = tool.execute(json!({"query": "rust"})).await.unwrap();
        assert_eq!(out, "Error: BRAVE_API_KEY not configured");
    }

    #[tokio::test]
    async fn fetch_unreachable_host_is_error_object() {
        let tool = WebFetchTool::new();
        let out = tool
            .execute(json!({"url": "http://127.0.0.1:1/x"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert!(parsed["error"].is_string());
        assert_eq!(parsed["url"], "http://127.0.0.1:1/x");
    }
}
