//! Declarative configuration (§6.5): tool definitions, provider metadata,
//! LLM model/limits, timeouts and backoff constants.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Canonical provider key.
    pub key: String,
    /// Alias keys treated as interchangeable with `key` (§4.3, §6.3).
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Lightweight endpoint used by `warmConnection` (§4.1).
    pub ping_endpoint: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_llm_timeout")]
    pub llm_turn_secs: u64,
    #[serde(default = "default_warm_timeout")]
    pub provider_warm_secs: u64,
    #[serde(default = "default_action_timeout")]
    pub provider_action_secs: u64,
}

fn default_llm_timeout() -> u64 {
    60
}
fn default_warm_timeout() -> u64 {
    5
}
fn default_action_timeout() -> u64 {
    30
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            llm_turn_secs: default_llm_timeout(),
            provider_warm_secs: default_warm_timeout(),
            provider_action_secs: default_action_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_jitter")]
    pub jitter_pct: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_ms() -> u64 {
    250
}
fn default_factor() -> f64 {
    2.0
}
fn default_jitter() -> f64 {
    0.25
}
fn default_max_attempts() -> u32 {
    3
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            factor: default_factor(),
            jitter_pct: default_jitter(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_api_token_env")]
    pub api_token_env: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".into()
}
fn default_api_token_env() -> String {
    "OVERTURE_API_TOKEN".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./state")
}

/// Session reset policy: when a session's in-memory state (history, active
/// run) is dropped so the next turn starts clean. Both checks are optional
/// and independent; the daily boundary is evaluated before the idle timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub daily_reset_hour: Option<u8>,
    #[serde(default)]
    pub idle_timeout_minutes: Option<u32>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self { daily_reset_hour: None, idle_timeout_minutes: Some(60) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    #[serde(default)]
    pub providers: Vec<ProviderMetadata>,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Path to the declarative tool-definition file (§4.2).
    #[serde(default = "default_tools_path")]
    pub tools_path: PathBuf,
}

fn default_tools_path() -> PathBuf {
    PathBuf::from("./config/tools.toml")
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.as_ref().display()))?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Warnings never abort startup; errors do (mirrors the teacher's
    /// `Config::validate` + severity split).
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.llm.model.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "llm.model must not be empty".into(),
            });
        }
        if self.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "no providers configured — the provider gateway will have nothing to dispatch to".into(),
            });
        }
        issues
    }

    /// Canonical-key → alias chain, used by the User Tool Filter (§4.3).
    pub fn provider_alias_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for p in &self.providers {
            map.insert(p.key.clone(), p.key.clone());
            for alias in &p.aliases {
                map.insert(alias.clone(), p.key.clone());
            }
        }
        map
    }
}
