use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CasePilotError, CasePilotResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub backoff: BackoffSection,
}

/// Loop limits and timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_stagnation_threshold")]
    pub stagnation_threshold: u32,
    #[serde(default = "default_duplicate_action_limit")]
    pub duplicate_action_limit: u32,
    /// Package identity of the host application running this agent; landing
    /// there means the agent backed out of the target app.
    #[serde(default)]
    pub own_package: String,
    #[serde(default = "default_post_action_delay_ms")]
    pub post_action_delay_ms: u64,
    #[serde(default = "default_iteration_delay_ms")]
    pub iteration_delay_ms: u64,
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_capture_max_wait_ms")]
    pub capture_max_wait_ms: u64,
    #[serde(default = "default_capture_poll_ms")]
    pub capture_poll_ms: u64,
}

fn default_max_iterations() -> u32 {
    40
}
fn default_stagnation_threshold() -> u32 {
    3
}
fn default_duplicate_action_limit() -> u32 {
    3
}
fn default_post_action_delay_ms() -> u64 {
    1500
}
fn default_iteration_delay_ms() -> u64 {
    800
}
fn default_pause_poll_ms() -> u64 {
    200
}
fn default_wait_timeout_ms() -> u64 {
    10_000
}
fn default_capture_max_wait_ms() -> u64 {
    5000
}
fn default_capture_poll_ms() -> u64 {
    250
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            stagnation_threshold: default_stagnation_threshold(),
            duplicate_action_limit: default_duplicate_action_limit(),
            own_package: String::new(),
            post_action_delay_ms: default_post_action_delay_ms(),
            iteration_delay_ms: default_iteration_delay_ms(),
            pause_poll_ms: default_pause_poll_ms(),
            wait_timeout_ms: default_wait_timeout_ms(),
            capture_max_wait_ms: default_capture_max_wait_ms(),
            capture_poll_ms: default_capture_poll_ms(),
        }
    }
}

impl AgentConfig {
    pub fn post_action_delay(&self) -> Duration {
        Duration::from_millis(self.post_action_delay_ms)
    }
    pub fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.iteration_delay_ms)
    }
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
    pub fn capture_max_wait(&self) -> Duration {
        Duration::from_millis(self.capture_max_wait_ms)
    }
    pub fn capture_poll(&self) -> Duration {
        Duration::from_millis(self.capture_poll_ms)
    }
}

/// Endpoint settings for the reference oracle adapter. The API key can
/// live here or in the `CASEPILOT_<ID>_API_KEY` environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_oracle_id")]
    pub id: String,
    #[serde(default)]
    pub api_base: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_oracle_id() -> String {
    "default".into()
}
fn default_temperature() -> f64 {
    0.1
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            id: default_oracle_id(),
            api_base: String::new(),
            model: String::new(),
            temperature: default_temperature(),
            api_key: None,
        }
    }
}

impl OracleConfig {
    /// Config-file key wins; environment variable is the fallback.
    pub fn resolve_api_key(&self) -> String {
        self.api_key.clone().unwrap_or_else(|| {
            std::env::var(format!("CASEPILOT_{}_API_KEY", self.id.to_uppercase()))
                .unwrap_or_default()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

fn default_keep_recent_turns() -> usize {
    4
}
fn default_token_budget() -> usize {
    24_000
}
fn default_max_messages() -> usize {
    120
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            keep_recent_turns: default_keep_recent_turns(),
            token_budget: default_token_budget(),
            max_messages: default_max_messages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSection {
    #[serde(default = "default_backoff_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_retries")]
    pub max_retries: u32,
}

fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_backoff_retries() -> u32 {
    5
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_backoff_base_ms(),
            max_delay_ms: default_backoff_max_ms(),
            max_retries: default_backoff_retries(),
        }
    }
}

impl BackoffSection {
    pub fn policy(&self) -> crate::oracle::retry::BackoffPolicy {
        crate::oracle::retry::BackoffPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_retries: self.max_retries,
        }
    }
}

fn resolve_config_path() -> CasePilotResult<PathBuf> {
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

    Err(CasePilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> CasePilotResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> CasePilotResult<()> {
    let path = resolve_config_path()?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
