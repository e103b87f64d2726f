//! Static provider catalog — the single source of truth for LLM backend
//! metadata: model-name keywords, env keys, gateway prefixes, default API
//! bases, and per-model parameter overrides.

/// Per-model parameter override, matched by substring on the lowercased
/// model name.
#[derive(Clone, Copy, Debug)]
pub struct ModelOverride {
    /// Substring to match.
    pub pattern: &'static str,
    /// Forced temperature for matching models.
    pub temperature: Option<f64>,
}

/// Metadata for one LLM backend.
#[derive(Clone, Copy, Debug)]
pub struct ProviderSpec {
    /// Config field name, e.g. `"dashscope"`.
    pub name: &'static str,
    /// Lowercase model-name keywords for matching.
    pub keywords: &'static [&'static str],
    /// Environment variable holding the API key.
    pub env_key: &'static str,
    /// Display name shown in status output.
    pub display_name: &'static str,
    /// Prefix prepended when routing models through this provider.
    pub gateway_prefix: &'static str,
    /// Don't add the prefix if the model already starts with one of these.
    pub skip_prefixes: &'static [&'static str],
    /// Whether this provider can route any model (OpenRouter, AiHubMix).
    pub is_gateway: bool,
    /// Local deployment (vLLM, Ollama).
    pub is_local: bool,
    /// Gateway auto-detection: API-key prefix.
    pub detect_by_key_prefix: &'static str,
    /// Gateway auto-detection: substring of the API base URL.
    pub detect_by_base_substring: &'static str,
    /// Fallback API base URL.
    pub default_api_base: &'static str,
    /// Strip an existing `provider/` segment before re-prefixing.
    pub strip_model_prefix: bool,
    /// Per-model parameter overrides.
    pub model_overrides: &'static [ModelOverride],
}

impl ProviderSpec {
    /// Display label, falling back to the config name.
    pub fn label(&self) -> &'static str {
        if self.display_name.is_empty() {
            self.name
        } else {
            self.display_name
        }
    }
}

/// All-empty entry used as the base for the table below.
const EMPTY: ProviderSpec = ProviderSpec {
    name: "",
    keywords: &[],
    env_key: "",
    display_name: "",
    gateway_prefix: "",
    skip_prefixes: &[],
    is_gateway: false,
    is_local: false,
    detect_by_key_prefix: "",
    detect_by_base_substring: "",
    default_api_base: "",
    strip_model_prefix: false,
    model_overrides: &[],
};

/// The catalog. Order is priority: gateways first.
pub const PROVIDERS: &[ProviderSpec] = &[
    // Custom user-provided OpenAI-compatible endpoint.
    ProviderSpec {
        name: "custom",
        env_key: "OPENAI_API_KEY",
        display_name: "Custom",
        gateway_prefix: "openai",
        skip_prefixes: &["openai/"],
        is_gateway: true,
        strip_model_prefix: true,
        ..EMPTY
    },
    ProviderSpec {
        name: "openrouter",
        keywords: &["openrouter"],
        env_key: "OPENROUTER_API_KEY",
        display_name: "OpenRouter",
        gateway_prefix: "openrouter",
        is_gateway: true,
        detect_by_key_prefix: "sk-or-",
        detect_by_base_substring: "openrouter",
        default_api_base: "https://openrouter.ai/api/v1",
        ..EMPTY
    },
    ProviderSpec {
        name: "aihubmix",
        keywords: &["aihubmix"],
        env_key: "OPENAI_API_KEY",
        display_name: "AiHubMix",
        gateway_prefix: "openai",
        is_gateway: true,
        detect_by_base_substring: "aihubmix",
        default_api_base: "https://aihubmix.com/v1",
        strip_model_prefix: true,
        ..EMPTY
    },
    ProviderSpec {
        name: "anthropic",
        keywords: &["anthropic", "claude"],
        env_key: "ANTHROPIC_API_KEY",
        display_name: "Anthropic",
        ..EMPTY
    },
    ProviderSpec {
        name: "openai",
        keywords: &["openai", "gpt"],
        env_key: "OPENAI_API_KEY",
        display_name: "OpenAI",
        ..EMPTY
    },
    ProviderSpec {
        name: "deepseek",
        keywords: &["deepseek"],
        env_key: "DEEPSEEK_API_KEY",
        display_name: "DeepSeek",
        gateway_prefix: "deepseek",
        skip_prefixes: &["deepseek/"],
        default_api_base: "https://api.deepseek.com/v1",
        ..EMPTY
    },
    ProviderSpec {
        name: "gemini",
        keywords: &["gemini"],
        env_key: "GEMINI_API_KEY",
        display_name: "Gemini",
        gateway_prefix: "gemini",
        skip_prefixes: &["gemini/"],
        ..EMPTY
    },
    ProviderSpec {
        name: "zhipu",
        keywords: &["zhipu", "glm", "zai"],
        env_key: "ZAI_API_KEY",
        display_name: "Zhipu AI",
        gateway_prefix: "zai",
        skip_prefixes: &["zhipu/", "zai/", "openrouter/", "hosted_vllm/"],
        ..EMPTY
    },
    ProviderSpec {
        name: "dashscope",
        keywords: &["qwen", "dashscope"],
        env_key: "DASHSCOPE_API_KEY",
        display_name: "DashScope",
        gateway_prefix: "dashscope",
        skip_prefixes: &["dashscope/", "openrouter/"],
        ..EMPTY
    },
    ProviderSpec {
        name: "moonshot",
        keywords: &["moonshot", "kimi"],
        env_key: "MOONSHOT_API_KEY",
        display_name: "Moonshot",
        gateway_prefix: "moonshot",
        skip_prefixes: &["moonshot/", "openrouter/"],
        default_api_base: "https://api.moonshot.ai/v1",
        model_overrides: &[ModelOverride {
            pattern: "kimi-k2.5",
            temperature: Some(1.0),
        }],
        ..EMPTY
    },
    ProviderSpec {
        name: "minimax",
        keywords: &["minimax"],
        env_key: "MINIMAX_API_KEY",
        display_name: "MiniMax",
        gateway_prefix: "minimax",
        skip_prefixes: &["minimax/", "openrouter/"],
        default_api_base: "https://api.minimax.io/v1",
        ..EMPTY
    },
    ProviderSpec {
        name: "vllm",
        keywords: &["vllm"],
        env_key: "HOSTED_VLLM_API_KEY",
        display_name: "vLLM/Local",
        gateway_prefix: "hosted_vllm",
        is_local: true,
        ..EMPTY
    },
    ProviderSpec {
        name: "groq",
        keywords: &["groq"],
        env_key: "GROQ_API_KEY",
        display_name: "Groq",
        gateway_prefix: "groq",
        skip_prefixes: &["groq/"],
        ..EMPTY
    },
];

/// Find a standard provider by model-name keyword. Gateways and local
/// providers are skipped — their model names don't identify a backend.
pub fn find_by_model(model: &str) -> Option<&'static ProviderSpec> {
    let lower = model.to_lowercase();
    PROVIDERS
        .iter()
        .filter(|spec| !spec.is_gateway && !spec.is_local)
        .find(|spec| spec.keywords.iter().any(|kw| lower.contains(kw)))
}

/// Find a provider by config name.
pub fn find_by_name(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|spec| spec.name == name)
}

/// Detect a gateway/local provider. Priority: explicit name, then API-key
/// prefix, then API-base substring.
pub fn find_gateway(
    provider_name: &str,
    api_key: &str,
    api_base: &str,
) -> Option<&'static ProviderSpec> {
    if !provider_name.is_empty() {
        if let Some(spec) = find_by_name(provider_name) {
            if spec.is_gateway || spec.is_local {
                return Some(spec);
            }
        }
    }
    PROVIDERS.iter().find(|spec| {
        (!spec.detect_by_key_prefix.is_empty()
            && !api_key.is_empty()
            && api_key.starts_with(spec.detect_by_key_prefix))
            || (!spec.detect_by_base_substring.is_empty()
                && !api_base.is_empty()
                && api_base.contains(spec.detect_by_base_substring))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_by_model_matches_keywords() {
        assert_eq!(find_by_model("claude-sonnet-4-5").unwrap().name, "anthropic");
        assert_eq!(find_by_model("deepseek-chat").unwrap().name, "deepseek");
        assert_eq!(find_by_model("qwen-max").unwrap().name, "dashscope");
        assert_eq!(find_by_model("kimi-k2.5").unwrap().name, "moonshot");
    }

    #[test]
    fn find_by_model_skips_gateways() {
        // "openrouter" is a gateway keyword; by-model lookup must not match it.
        assert!(find_by_model("openrouter/foo").is_none());
    }

    #[test]
    fn find_by_model_unknown_is_none() {
        assert!(find_by_model("some-unheard-of-model").is_none());
    }

    #[test]
    fn gateway_by_name() {
        let spec = find_gateway("openrouter", "", "").unwrap();
        assert_eq!(spec.name, "openrouter");
    }

    #[test]
    fn gateway_by_name_rejects_non_gateway() {
        // anthropic is not a gateway; detection falls through and finds nothing.
        assert!(find_gateway("anthropic", "", "").is_none());
    }

    #[test]
    fn gateway_by_key_prefix() {
        let spec = find_gateway("", "sk-or-v1-abcdef", "").unwrap();
        assert_eq!(spec.name, "openrouter");
    }

    #[test]
    fn gateway_by_base_substring() {
        let spec = find_gateway("", "", "https://aihubmix.com/v1").unwrap();
        assert_eq!(spec.name, "aihubmix");
    }

    #[test]
    fn label_falls_back_to_name() {
        let spec = find_by_name("openai").unwrap();
        assert_eq!(spec.label(), "OpenAI");
    }

    #[test]
    fn moonshot_has_kimi_temperature_override() {
        let spec = find_by_name("moonshot").unwrap();
        let ov = spec
            .model_overrides
            .iter()
            .find(|o| o.pattern == "kimi-k2.5")
            .unwrap();
        assert_eq!(ov.temperature, Some(1.0));
    }
}
