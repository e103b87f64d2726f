//! Context guard: token pre-check before each LLM call.
//!
//! Estimates the prompt size against the model's context window and
//! decides whether to pass, warn, compress, or force-reset the session.
//! The estimate deliberately overshoots (total chars / 2) — running the
//! compressor early is cheaper than a hard provider rejection.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::json;
use swarm_llm::ChatMessage;
use tracing::warn;

/// Pre-check outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardAction {
    /// Token usage is fine.
    Pass,
    /// Approaching the limit.
    Warn,
    /// Context should be compressed before the call.
    Compress,
    /// Session must be force-reset.
    Reset,
}

/// Result of a token pre-check.
#[derive(Clone, Copy, Debug)]
pub struct PreCheckResult {
    /// The decided action.
    pub action: GuardAction,
    /// Estimated prompt tokens.
    pub token_estimate: usize,
    /// The model's context window.
    pub token_limit: usize,
    /// `estimate / limit`.
    pub ratio: f64,
}

impl PreCheckResult {
    /// Whether the user should be told (only on reset).
    pub fn should_notify_user(&self) -> bool {
        self.action == GuardAction::Reset
    }

    /// User-visible message for resets.
    pub fn notification_message(&self) -> String {
        if self.action != GuardAction::Reset {
            return String::new();
        }
        format!(
            "The conversation exceeded the model's context limit ({:.0}%), so the session \
             was reset automatically. Earlier context was saved and remains searchable.",
            self.ratio * 100.0
        )
    }
}

/// Context window sizes by model name. Longest-prefix match; unknown
/// models use `DEFAULT_TOKEN_LIMIT`.
pub const MODEL_TOKEN_LIMITS: &[(&str, usize)] = &[
    ("deepseek/deepseek-chat", 64_000),
    ("deepseek/deepseek-reasoner", 64_000),
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4-turbo", 128_000),
    ("openai/gpt-4o", 128_000),
    ("anthropic/claude-sonnet-4-5", 200_000),
    ("anthropic/claude-opus-4-5", 200_000),
    ("zhipuai/glm-5", 128_000),
    ("zhipuai/glm-4-flash", 128_000),
];

/// Fallback context window.
pub const DEFAULT_TOKEN_LIMIT: usize = 64_000;

/// The context window for a model name (exact match, then prefix).
pub fn model_token_limit(model: &str) -> usize {
    for (name, limit) in MODEL_TOKEN_LIMITS {
        if model == *name {
            return *limit;
        }
    }
    for (name, limit) in MODEL_TOKEN_LIMITS {
        if model.starts_with(name) {
            return *limit;
        }
    }
    DEFAULT_TOKEN_LIMIT
}

/// Rough token estimate: total chars (content + tool-call arguments)
/// divided by two.
pub fn estimate_tokens(messages: &[ChatMessage]) -> usize {
    let mut total = 0;
    for msg in messages {
        total += msg.content.len();
        if let Some(calls) = &msg.tool_calls {
            for call in calls {
                total += call.function.arguments.len();
            }
        }
    }
    total / 2
}

/// Guard thresholds as ratios of the context window.
#[derive(Clone, Copy, Debug)]
pub struct GuardConfig {
    /// Log a warning above this ratio.
    pub warn_ratio: f64,
    /// Trigger compression above this ratio.
    pub compress_ratio: f64,
    /// Force-reset the session above this ratio.
    pub critical_ratio: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            warn_ratio: 0.70,
            compress_ratio: 0.80,
            critical_ratio: 0.95,
        }
    }
}

/// Monitors token usage across calls.
pub struct ContextGuard {
    cfg: GuardConfig,
    total_checks: AtomicU64,
    warning_count: AtomicU64,
    compression_count: AtomicU64,
    reset_count: AtomicU64,
}

impl ContextGuard {
    /// Create a guard with the given thresholds.
    pub fn new(cfg: GuardConfig) -> Self {
        Self {
            cfg,
            total_checks: AtomicU64::new(0),
            warning_count: AtomicU64::new(0),
            compression_count: AtomicU64::new(0),
            reset_count: AtomicU64::new(0),
        }
    }

    /// Check the prompt against the model's window before an LLM call.
    pub fn pre_check(&self, messages: &[ChatMessage], model: &str) -> PreCheckResult {
        self.total_checks.fetch_add(1, Ordering::Relaxed);

        let token_estimate = estimate_tokens(messages);
        let token_limit = model_token_limit(model);
        let ratio = token_estimate as f64 / token_limit as f64;

        let action = if ratio >= self.cfg.critical_ratio {
            self.reset_count.fetch_add(1, Ordering::Relaxed);
            warn!(token_estimate, token_limit, ratio, "context critical, forcing reset");
            GuardAction::Reset
        } else if ratio >= self.cfg.compress_ratio {
            self.compression_count.fetch_add(1, Ordering::Relaxed);
            warn!(token_estimate, token_limit, ratio, "context compressing");
            GuardAction::Compress
        } else if ratio >= self.cfg.warn_ratio {
            self.warning_count.fetch_add(1, Ordering::Relaxed);
            warn!(token_estimate, token_limit, ratio, "context approaching limit");
            GuardAction::Warn
        } else {
            GuardAction::Pass
        };

        PreCheckResult {
            action,
            token_estimate,
            token_limit,
            ratio,
        }
    }

    /// Guard statistics.
    pub fn stats(&self) -> serde_json::Value {
        json!({
            "totalChecks": self.total_checks.load(Ordering::Relaxed),
            "warningCount": self.warning_count.load(Ordering::Relaxed),
            "compressionCount": self.compression_count.load(Ordering::Relaxed),
            "resetCount": self.reset_count.load(Ordering::Relaxed),
        })
    }
}
