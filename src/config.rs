use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{SidePilotError, SidePilotResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub adapter: ProviderAdapter,
    /// Stream the completion over SSE (OpenAI-compatible adapter only).
    #[serde(default)]
    pub stream: bool,
    /// Optional API key stored in config.toml (falls back to env var SIDEPILOT_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderAdapter {
    #[default]
    Openai,
    Gemini,
}

fn default_temperature() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// DevTools HTTP endpoint of the browser to attach to.
    #[serde(default = "default_debugger_url")]
    pub debugger_url: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            debugger_url: default_debugger_url(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl BrowserConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn default_debugger_url() -> String {
    "http://127.0.0.1:9222".to_string()
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

/// Timing and loop limits for the orchestrator and the action executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_page_load_timeout_ms")]
    pub page_load_timeout_ms: u64,
    #[serde(default = "default_ready_poll_interval_ms")]
    pub ready_poll_interval_ms: u64,
    /// Grace delay after the document reports `complete`.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Delay inserted between consecutive actions of one model response.
    #[serde(default = "default_action_gap_ms")]
    pub action_gap_ms: u64,
    /// Upper bound on model round trips per turn. Unbounded when absent.
    #[serde(default)]
    pub max_rounds: Option<u32>,
    /// Longest sleep a `wait` action may request.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_true")]
    pub visual_cues: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            page_load_timeout_ms: default_page_load_timeout_ms(),
            ready_poll_interval_ms: default_ready_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            action_gap_ms: default_action_gap_ms(),
            max_rounds: None,
            max_wait_ms: default_max_wait_ms(),
            visual_cues: true,
        }
    }
}

impl AgentConfig {
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn action_gap(&self) -> Duration {
        Duration::from_millis(self.action_gap_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

fn default_page_load_timeout_ms() -> u64 {
    10_000
}

fn default_ready_poll_interval_ms() -> u64 {
    100
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_action_gap_ms() -> u64 {
    1_000
}

fn default_max_wait_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Where conversation logs are written. Defaults to the platform data dir.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptsConfig {
    /// Replaces the built-in system prompt when set.
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,
}

fn resolve_config_path() -> SidePilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(SidePilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn parse_config(content: &str) -> SidePilotResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    if !config.llm.active_provider.is_empty()
        && !config.llm.providers.contains_key(&config.llm.active_provider)
    {
        return Err(SidePilotError::Config(format!(
            "active provider '{}' has no [llm.providers.{}] entry",
            config.llm.active_provider, config.llm.active_provider
        )));
    }
    Ok(config)
}

pub fn load_config() -> SidePilotResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> SidePilotResult<()> {
    let path = resolve_config_path()?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
