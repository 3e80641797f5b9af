//! Puter driver presets.
//!
//! The Puter drivers API routes a chat call to a backend family ("driver")
//! that must be named in every request. Each preset matches model names by
//! prefix; the first match wins and unknown models fall back to the OpenAI
//! driver.

/// A backend family reachable through the Puter drivers API.
#[derive(Debug, Clone)]
pub struct DriverPreset {
    pub driver: &'static str,
    pub prefixes: &'static [&'static str],
    pub owned_by: &'static str,
}

const PRESETS: &[DriverPreset] = &[
    DriverPreset {
        driver: "openrouter",
        prefixes: &["openrouter:"],
        owned_by: "openrouter",
    },
    DriverPreset {
        driver: "claude",
        prefixes: &["claude"],
        owned_by: "anthropic",
    },
    DriverPreset {
        driver: "deepseek",
        prefixes: &["deepseek"],
        owned_by: "deepseek",
    },
    DriverPreset {
        driver: "xai",
        prefixes: &["x-ai/", "grok"],
        owned_by: "xai",
    },
    DriverPreset {
        driver: "gemini",
        prefixes: &["gemini", "google/"],
        owned_by: "google",
    },
    DriverPreset {
        driver: "mistral",
        prefixes: &["mistral", "codestral", "pixtral"],
        owned_by: "mistral",
    },
];

const FALLBACK: DriverPreset = DriverPreset {
    driver: "openai-completion",
    prefixes: &[],
    owned_by: "openai",
};

impl DriverPreset {
    /// Find the preset serving `model`. Matching is case-insensitive.
    #[must_use]
    pub fn for_model(model: &str) -> &'static DriverPreset {
        let model = model.to_lowercase();
        PRESETS
            .iter()
            .find(|p| p.prefixes.iter().any(|prefix| model.starts_with(prefix)))
            .unwrap_or(&FALLBACK)
    }

    #[must_use]
    pub fn all() -> &'static [DriverPreset] {
        PRESETS
    }
}
