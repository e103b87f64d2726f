//! Request-to-role routing.
//!
//! Priority: explicit role → @mention → keyword (strong) → LLM semantic →
//! keyword (weak) → default. The keyword table is data, keyed by role id;
//! ties break by table order.

use std::collections::HashMap;

use serde::Serialize;
use swarm_runtime::router::DEFAULT_ROLE;
use swarm_runtime::{AgentRegistry, LlmRouter, RouteResult};

/// Keyword score required to route without consulting the LLM.
const STRONG_SCORE: usize = 2;

/// Keyword routes per role id. Order is the tie-break order.
pub const KEYWORD_ROUTES: &[(&str, &[&str])] = &[
    (
        "legal",
        &[
            "法律", "打官司", "起诉", "律师", "合同", "纠纷", "赔偿", "仲裁", "法院", "判决",
            "诉讼", "维权", "侵权", "违约",
        ],
    ),
    (
        "mechanic",
        &[
            "修车", "维修", "保养", "4S店", "换胎", "发动机", "变速箱", "底盘", "刹车", "机油",
            "零件", "故障灯",
        ],
    ),
    (
        "driving",
        &[
            "驾照", "违章", "扣分", "罚款", "行驶证", "年检", "审车", "科目", "路考", "交通规则",
        ],
    ),
    (
        "health",
        &[
            "身体", "健康", "头痛", "腰痛", "失眠", "养生", "锻炼", "饮食", "体检", "疲劳", "颈椎",
        ],
    ),
    (
        "stockgod",
        &[
            "股票", "A股", "涨停", "跌停", "基金", "持仓", "K线", "均线", "MACD", "量能", "板块",
            "龙头", "打板",
        ],
    ),
    (
        "insurance",
        &[
            "保险", "理赔", "定损", "赔多少", "报销", "骗保", "交强险", "商业险", "三者险",
            "车损险", "严公估",
        ],
    ),
    (
        "food",
        &[
            "吃饭", "饿了", "美食", "菜", "餐厅", "点餐", "外卖", "小吃", "火锅", "烧烤",
        ],
    ),
    (
        "rescue",
        &[
            "拖车", "救援", "抛锚", "没电", "搭电", "轮胎", "爆胎", "事故", "碰撞", "翻车",
        ],
    ),
];

/// Score message content against the keyword table. Returns the best
/// role and its score; score 0 means no match.
pub fn route_by_keyword(content: &str) -> (Option<&'static str>, usize) {
    let mut best_role = None;
    let mut best_score = 0;
    for (role, keywords) in KEYWORD_ROUTES {
        let score = keywords.iter().filter(|kw| content.contains(*kw)).count();
        if score > best_score {
            best_score = score;
            best_role = Some(*role);
        }
    }
    (best_role, best_score)
}

/// Check whether the content @mentions a mapped name.
pub fn check_mention(content: &str, mention_map: &HashMap<String, String>) -> Option<String> {
    mention_map
        .iter()
        .find(|(mention, _)| content.contains(&format!("@{mention}")))
        .map(|(_, role_id)| role_id.clone())
}

/// Determine which agent should handle the message.
///
/// Returns `(role_id, method, llm_route)` where method is one of
/// `"explicit"`, `"mention"`, `"keyword"`, `"llm"`, `"default"`.
pub async fn resolve_route(
    llm_router: Option<&LlmRouter>,
    mention_map: &HashMap<String, String>,
    content: &str,
    role_id: &str,
) -> (String, &'static str, Option<RouteResult>) {
    // 1. Explicit role from the request.
    if !role_id.is_empty() && role_id != DEFAULT_ROLE {
        return (role_id.to_string(), "explicit", None);
    }

    // 2. @mention.
    if let Some(mentioned) = check_mention(content, mention_map) {
        return (mentioned, "mention", None);
    }

    // 3. Strong keyword match.
    let (kw_role, kw_score) = route_by_keyword(content);
    if let Some(role) = kw_role {
        if kw_score >= STRONG_SCORE {
            return (role.to_string(), "keyword", None);
        }
    }

    // 4. LLM semantic routing.
    if let Some(router) = llm_router {
        let result = router.route_multi(content).await;
        if !result.primary.is_empty() && result.primary != DEFAULT_ROLE {
            let primary = result.primary.clone();
            return (primary, "llm", Some(result));
        }
        if !result.related.is_empty() {
            // Primary stays general but related experts are still
            // surfaced for the UI.
            return (DEFAULT_ROLE.to_string(), "llm", Some(result));
        }
    }

    // 5. Weak keyword match.
    if let Some(role) = kw_role {
        if kw_score >= 1 {
            return (role.to_string(), "keyword", None);
        }
    }

    (DEFAULT_ROLE.to_string(), "default", None)
}

/// Routing decision metadata attached to API responses.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    /// Chosen agent id.
    pub agent_id: String,
    /// Short display name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub agent_name: String,
    /// Agent description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// How the decision was made.
    pub method: String,
    /// LLM routing rationale.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Related agent ids.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
    /// Involved domains.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    /// One-line human-readable summary.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

/// Build the route info for a decision.
pub fn build_route_info(
    registry: &AgentRegistry,
    role_id: &str,
    method: &str,
    llm_route: Option<&RouteResult>,
) -> RouteInfo {
    let mut info = RouteInfo {
        agent_id: role_id.to_string(),
        method: method.to_string(),
        ..RouteInfo::default()
    };

    if let Some(spec) = registry.get_spec(role_id) {
        info.agent_name = extract_agent_name(role_id, &spec.description);
        info.description = spec.description;
    }
    if let Some(route) = llm_route {
        info.related = route.related.clone();
        info.domains = route.domains.clone();
        info.reason = route.reason.clone();
    }

    let name = if info.agent_name.is_empty() {
        info.agent_id.clone()
    } else {
        info.agent_name.clone()
    };
    info.summary = match method {
        "keyword" => format!("关键词匹配 → {name}"),
        "llm" => {
            let mut summary = format!("AI 语义分析 → {name}");
            if !info.reason.is_empty() {
                summary.push_str(" | ");
                summary.push_str(&info.reason);
            }
            summary
        }
        "mention" => format!("@提及 → {name}"),
        "explicit" => format!("指定 → {name}"),
        _ => format!("默认 → {name}"),
    };
    info
}

/// Format the route info as a user-visible text block, prependable to
/// replies.
pub fn format_route_header(registry: &AgentRegistry, info: &RouteInfo) -> String {
    let name = if info.agent_name.is_empty() {
        &info.agent_id
    } else {
        &info.agent_name
    };

    let mut header = format!("> 🎭 **{name}** 为您服务");
    if !info.description.is_empty() {
        header.push_str(" | ");
        header.push_str(&info.description);
    }
    header.push('\n');
    header.push_str(&format!("> 📍 路由: {}\n", info.summary));

    if !info.related.is_empty() {
        let names: Vec<String> = info
            .related
            .iter()
            .map(|rid| {
                let name = registry
                    .get_spec(rid)
                    .map(|spec| extract_agent_name(rid, &spec.description))
                    .unwrap_or_else(|| rid.clone());
                format!("**{name}**")
            })
            .collect();
        header.push_str(&format!("> 🔗 相关专家: {}\n", names.join(" · ")));
    }
    header
}

/// Extract a short display name from a description, e.g.
/// `"叶律 — 法律纠纷处理专家"` → `"叶律"`.
pub fn extract_agent_name(role_id: &str, description: &str) -> String {
    if description.is_empty() {
        return role_id.to_string();
    }
    for sep in [" — ", " - ", "——", "：", ":"] {
        if let Some((head, _)) = description.split_once(sep) {
            let head = head.trim();
            if !head.is_empty() && head.chars().count() <= 20 {
                return head.to_string();
            }
        }
    }
    if description.chars().count() > 10 {
        return description.chars().take(10).collect();
    }
    description.to_string()
}

/// Remove leaked internal reasoning sections from a reply.
pub fn strip_thinking(text: &str) -> String {
    const PATTERNS: &[&str] = &[
        "**Reflection**",
        "**Next Steps**",
        "**Analysis**",
        "**思考过程**",
        "**推理过程**",
        "**内部分析**",
    ];

    let mut text = text.to_string();
    for pattern in PATTERNS {
        while let Some(start) = text.find(pattern) {
            let rest = &text[start..];
            match rest.find("\n\n") {
                Some(end) => text = format!("{}{}", &text[..start], &text[start + end + 2..]),
                None => text.truncate(start),
            }
        }
    }
    text.trim().to_string()
}
