//! Configuration loading, validation, and management for Hearth.
//!
//! Loads configuration from `~/.hearth/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.hearth/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model backend settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Turn loop budgets and safety switches
    #[serde(default)]
    pub agent: AgentConfig,

    /// Stream-open retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Verification loop settings
    #[serde(default)]
    pub verification: VerificationConfig,
}

/// Which wire protocol the model server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelApi {
    /// Ollama native `/api/chat` (NDJSON)
    Ollama,
    /// OpenAI-compatible `/v1/chat/completions` (SSE)
    Openai,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_api")]
    pub api: ModelApi,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api() -> ModelApi {
    ModelApi::Ollama
}
fn default_base_url() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "qwen2.5-coder:32b".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api: default_api(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api", &self.api)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model round-trips allowed per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Tool calls allowed per turn
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,

    #[serde(default = "default_true")]
    pub require_approval: bool,

    /// Read a file automatically before modifying it when it is not yet in the read-set
    #[serde(default = "default_true")]
    pub auto_read_on_modify: bool,

    /// Estimated tokens of history before compaction kicks in
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,

    /// Messages preserved verbatim by compaction
    #[serde(default = "default_keep_recent_messages")]
    pub keep_recent_messages: usize,

    #[serde(default = "default_undo_limit")]
    pub undo_limit: usize,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_max_tool_calls() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_context_token_budget() -> usize {
    8000
}
fn default_keep_recent_messages() -> usize {
    10
}
fn default_undo_limit() -> usize {
    50
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tool_calls: default_max_tool_calls(),
            require_approval: true,
            auto_read_on_modify: true,
            context_token_budget: default_context_token_budget(),
            keep_recent_messages: default_keep_recent_messages(),
            undo_limit: default_undo_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    1.5
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_verification_iterations")]
    pub max_iterations: u32,

    /// Shell commands to run; empty means detect from project marker files
    #[serde(default)]
    pub commands: Vec<String>,

    #[serde(default = "default_command_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_output_tail_lines")]
    pub output_tail_lines: usize,
}

fn default_verification_iterations() -> u32 {
    12
}
fn default_command_timeout_secs() -> u64 {
    120
}
fn default_output_tail_lines() -> usize {
    100
}

impl VerificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_verification_iterations(),
            commands: Vec::new(),
            timeout_secs: default_command_timeout_secs(),
            output_tail_lines: default_output_tail_lines(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.hearth/config.toml).
    ///
    /// Environment variables override file values:
    /// - `HEARTH_MODEL`, then `OLLAMA_MODEL`
    /// - `HEARTH_BASE_URL`, then `OLLAMA_BASE_URL`
    /// - `HEARTH_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty("HEARTH_MODEL").or_else(|| non_empty("OLLAMA_MODEL")) {
            self.model.model = model;
        }
        if let Some(url) = non_empty("HEARTH_BASE_URL").or_else(|| non_empty("OLLAMA_BASE_URL")) {
            self.model.base_url = url;
        }
        if let Some(key) = non_empty("HEARTH_API_KEY") {
            self.model.api_key = Some(key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".hearth")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.model.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model.base_url must not be empty".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }
        if self.agent.max_tool_calls == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_calls must be > 0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be >= 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }
        if self.verification.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "verification.max_iterations must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model.api, ModelApi::Ollama);
        assert_eq!(config.agent.max_tool_calls, 3);
        assert_eq!(config.verification.max_iterations, 12);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.model, config.model.model);
        assert_eq!(parsed.agent.undo_limit, config.agent.undo_limit);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[model]
api = "openai"
base_url = "http://localhost:8080"

[agent]
max_tool_calls = 8
require_approval = false

[verification]
commands = ["cargo test"]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.api, ModelApi::Openai);
        assert_eq!(config.model.model, "qwen2.5-coder:32b");
        assert_eq!(config.agent.max_tool_calls, 8);
        assert!(!config.agent.require_approval);
        assert!(config.agent.auto_read_on_modify);
        assert_eq!(config.verification.commands, vec!["cargo test"]);
        assert_eq!(config.verification.timeout_secs, 120);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.model.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_budgets_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_tool_calls = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model.base_url, "http://localhost:11434");
    }

    #[test]
    fn load_from_file_and_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("config.toml");
        std::fs::write(&good, "[agent]\nmax_iterations = 4\n").unwrap();
        assert_eq!(AppConfig::load_from(&good).unwrap().agent.max_iterations, 4);

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[agent\nmax_iterations = 4\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(&bad),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_take_priority() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OLLAMA_MODEL", "llama3.1"),
            ("HEARTH_BASE_URL", "http://gpu-box:11434"),
            ("OLLAMA_BASE_URL", "http://ignored:11434"),
            ("HEARTH_API_KEY", "sk-test"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.model.model, "llama3.1");
        assert_eq!(config.model.base_url, "http://gpu-box:11434");
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));

        let env: HashMap<&str, &str> = HashMap::from([("HEARTH_MODEL", "a"), ("OLLAMA_MODEL", "b")]);
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.model.model, "a");
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-very-secret".into());
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-very-secret"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("max_tool_calls = 3"));
        assert!(toml_str.contains("ollama"));
    }
}
