//! Model selection.
//!
//! Requested model names are first matched against a table of alias
//! families; otherwise the conversation text is classified by keyword into
//! an intent and each intent maps to one configured backend model. Both steps
//! are pure and total: every input yields a model id.

use crate::config::RoutingConfig;
use crate::translate::request::Message;
use serde::{Deserialize, Serialize};

/// Conversations shorter than this (in bytes) take the fast path.
const SHORT_TEXT_LEN: usize = 100;

/// An alias rule fires when the requested model contains any of `families`
/// and all of `variants`.
struct AliasRule {
    families: &'static [&'static str],
    variants: &'static [&'static str],
    target: &'static str,
}

const GROK_4_1: &[&str] = &["grok-4.1", "grok-4-1"];
const GPT_5_1: &[&str] = &["gpt-5.1", "gpt-5-1"];

// Most specific first: "non-reasoning" also contains "reasoning".
const ALIASES: &[AliasRule] = &[
    AliasRule {
        families: GROK_4_1,
        variants: &["non-reasoning"],
        target: "x-ai/grok-4-1-fast-non-reasoning",
    },
    AliasRule {
        families: GROK_4_1,
        variants: &["reasoning"],
        target: "x-ai/grok-4-1-fast-reasoning",
    },
    AliasRule {
        families: GROK_4_1,
        variants: &[],
        target: "x-ai/grok-4-1-fast",
    },
    AliasRule {
        families: GPT_5_1,
        variants: &["codex", "max"],
        target: "gpt-5.1-codex-max",
    },
    AliasRule {
        families: GPT_5_1,
        variants: &["codex", "mini"],
        target: "gpt-5.1-codex-mini",
    },
    AliasRule {
        families: GPT_5_1,
        variants: &["codex"],
        target: "gpt-5.1-codex",
    },
    AliasRule {
        families: &["gpt-5", "gpt5"],
        variants: &["mini"],
        target: "gpt-5-mini",
    },
];

const BUILDING_KEYWORDS: &[&str] = &[
    "code", "implement", "function", "class", "api", "debug", "bug", "fix", "refactor", "sql",
    "database", "frontend", "backend", "deploy", "config", "docker", "kubernetes", "terraform",
    "write a", "create a", "build", "develop",
];

const PLANNING_KEYWORDS: &[&str] = &[
    "plan", "design", "rencana", "rencanakan", "strategy", "analyze", "compare", "decision",
    "recommend", "struktur", "periksa", "overview", "roadmap", "alur", "diagram", "flow",
    "system design", "high level",
];

const REASONING_KEYWORDS: &[&str] = &[
    "reason", "solve", "explain", "how does", "why is", "what is", "step by step", "proof",
    "calculate", "derive", "think about",
];

/// Conversation intent, checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Building,
    Planning,
    Reasoning,
    Fast,
    /// Nothing matched; served by the fast model as well.
    General,
}

/// Backend model for each intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentModels {
    #[serde(default = "default_building")]
    pub building: String,
    #[serde(default = "default_planning")]
    pub planning: String,
    #[serde(default = "default_reasoning")]
    pub reasoning: String,
    #[serde(default = "default_fast")]
    pub fast: String,
}

fn default_building() -> String {
    "gpt-5-nano".to_string()
}

fn default_planning() -> String {
    "deepseek-reasoner".to_string()
}

fn default_reasoning() -> String {
    "deepseek-reasoner".to_string()
}

fn default_fast() -> String {
    "gpt-5-nano".to_string()
}

impl Default for IntentModels {
    fn default() -> Self {
        Self {
            building: default_building(),
            planning: default_planning(),
            reasoning: default_reasoning(),
            fast: default_fast(),
        }
    }
}

impl IntentModels {
    #[must_use]
    pub fn for_intent(&self, intent: Intent) -> &str {
        match intent {
            Intent::Building => &self.building,
            Intent::Planning => &self.planning,
            Intent::Reasoning => &self.reasoning,
            Intent::Fast | Intent::General => &self.fast,
        }
    }
}

/// Map a requested model name onto its alias family, if any.
#[must_use]
pub fn resolve_alias(requested: &str) -> Option<&'static str> {
    let requested = requested.to_lowercase();
    ALIASES
        .iter()
        .find(|rule| {
            rule.families.iter().any(|f| requested.contains(f))
                && rule.variants.iter().all(|v| requested.contains(v))
        })
        .map(|rule| rule.target)
}

/// Classify a conversation by keyword. Only the first matching intent counts.
#[must_use]
pub fn classify(messages: &[Message]) -> Intent {
    let text = messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let mentions = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if mentions(BUILDING_KEYWORDS) {
        Intent::Building
    } else if mentions(PLANNING_KEYWORDS) {
        Intent::Planning
    } else if mentions(REASONING_KEYWORDS) {
        Intent::Reasoning
    } else if is_quick_question(&text) {
        Intent::Fast
    } else {
        Intent::General
    }
}

/// Pick a backend model: alias match first, then intent classification.
#[must_use]
pub fn pick_model(messages: &[Message], requested: Option<&str>, targets: &IntentModels) -> String {
    if let Some(target) = requested.and_then(resolve_alias) {
        return target.to_string();
    }
    targets.for_intent(classify(messages)).to_string()
}

/// Empty, short, or question-shaped text.
fn is_quick_question(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || text.len() < SHORT_TEXT_LEN || text.ends_with('?')
}

/// Resolve the model for one request under the routing policy.
///
/// Order: forced model, alias, explicit request (when honoured and not
/// `auto`), classifier.
#[must_use]
pub fn resolve_model(routing: &RoutingConfig, messages: &[Message], requested: Option<&str>) -> String {
    if let Some(ref forced) = routing.forced_model {
        return forced.clone();
    }

    let requested = requested
        .map(str::trim)
        .filter(|m| !m.is_empty() && !m.eq_ignore_ascii_case("auto"));

    if let Some(target) = requested.and_then(resolve_alias) {
        return target.to_string();
    }

    match requested {
        Some(model) if routing.honor_requested_model => model.to_string(),
        _ => pick_model(messages, None, &routing.models),
    }
}
