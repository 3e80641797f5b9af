use crate::error::{ProxyError, Result};
use crate::models::IntentModels;
use crate::translate::request::InputPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Fallback env var read when the configured token variable is unset.
const LEGACY_TOKEN_ENV: &str = "puterAuthToken";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub input_policy: InputPolicy,
    /// Model ids advertised on `/v1/models`.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,
    #[serde(default = "default_true")]
    pub require_auth_token: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pin every call to one Puter driver instead of deriving it from the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Send every request to this model, ignoring the request and the classifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced_model: Option<String>,
    #[serde(default = "default_true")]
    pub honor_requested_model: bool,
    #[serde(default)]
    pub models: IntentModels,
}

fn default_port() -> u16 {
    3333
}

fn default_base_url() -> String {
    "https://api.puter.com".to_string()
}

fn default_auth_token_env() -> String {
    "PUTER_AUTH_TOKEN".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_models() -> Vec<String> {
    [
        "auto",
        "gpt-5-nano",
        "gpt-5-mini",
        "gpt-5.1-codex",
        "gpt-5.1-codex-mini",
        "gpt-5.1-codex-max",
        "deepseek-chat",
        "deepseek-reasoner",
        "claude-opus-4-5-latest",
        "claude-sonnet-4-5",
        "x-ai/grok-4-1-fast",
        "x-ai/grok-4-1-fast-reasoning",
        "x-ai/grok-4-1-fast-non-reasoning",
    ]
    .iter()
    .map(|m| (*m).to_string())
    .collect()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token_env: default_auth_token_env(),
            require_auth_token: true,
            timeout_secs: default_timeout_secs(),
            driver: None,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            forced_model: None,
            honor_requested_model: true,
            models: IntentModels::default(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig::default(),
            routing: RoutingConfig::default(),
            input_policy: InputPolicy::default(),
            models: default_models(),
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file. Missing sections take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Apply `PORT` and `PUTER_API_URL` from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ProxyError::config(format!("PORT is not a valid port: {port}")))?;
        }
        if let Ok(url) = std::env::var("PUTER_API_URL") {
            if !url.trim().is_empty() {
                self.upstream.base_url = url.trim().to_string();
            }
        }
        Ok(())
    }

    /// Resolve the bearer token once at startup.
    ///
    /// Returns `Ok(None)` when no token is set and the config allows running
    /// without one.
    pub fn resolve_auth_token(&self) -> Result<Option<String>> {
        let token = first_token_from_env(&[self.upstream.auth_token_env.as_str(), LEGACY_TOKEN_ENV]);

        match token {
            Some(t) => Ok(Some(t)),
            None if self.upstream.require_auth_token => Err(ProxyError::config(format!(
                "Environment variable '{}' not set. Set it to your Puter auth token.",
                self.upstream.auth_token_env
            ))),
            None => Ok(None),
        }
    }
}

/// First of `names` set to a non-blank value. A blank variable does not
/// shadow the ones after it.
fn first_token_from_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|t| !t.trim().is_empty())
}

/// Candidate config files, highest priority first.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("puter-proxy.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("puter-proxy").join("config.toml"));
    }
    if let Some(home) = dirs_path() {
        paths.push(home.join(".config").join("puter-proxy").join("config.toml"));
        paths.push(home.join(".puter-proxy.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
