//! Configuration management for pilot.toml
//!
//! Lookup order: explicit path, `pilot.toml` in the current directory or
//! its parents, then `<config_dir>/shellpilot/config.toml`. Every section
//! is optional and falls back to defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::retry::RetryConfig;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

const CONFIG_FILE_NAME: &str = "pilot.toml";
const APP_DIR: &str = "shellpilot";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Remote model selection and generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key; falls back to `GEMINI_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_response_mime_type")]
    pub response_mime_type: String,
    /// HTTP timeout for a single generate call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Blocking threshold for a harm category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmThreshold {
    #[default]
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

/// Per-category content safety thresholds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub harassment: HarmThreshold,
    #[serde(default)]
    pub hate_speech: HarmThreshold,
    #[serde(default)]
    pub sexually_explicit: HarmThreshold,
    #[serde(default)]
    pub dangerous_content: HarmThreshold,
}

impl SafetyConfig {
    /// Category identifiers paired with their thresholds, in wire order
    pub fn categories(&self) -> [(&'static str, HarmThreshold); 4] {
        [
            ("HARM_CATEGORY_HARASSMENT", self.harassment),
            ("HARM_CATEGORY_HATE_SPEECH", self.hate_speech),
            ("HARM_CATEGORY_SEXUALLY_EXPLICIT", self.sexually_explicit),
            ("HARM_CATEGORY_DANGEROUS_CONTENT", self.dangerous_content),
        ]
    }
}

/// Agent loop limits and command execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum commands executed for a single user request
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Captured output beyond this many bytes is truncated
    #[serde(default = "default_max_output_len")]
    pub max_output_len: usize,
    /// Interpreter used to run commands (default: `sh` / `cmd`)
    #[serde(default)]
    pub shell: Option<String>,
    /// Directory commands run in (default: the current directory)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// File locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default)]
    pub pilot_prompt: Option<PathBuf>,
    #[serde(default)]
    pub memory_file: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_model_name() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    0.95
}

fn default_top_k() -> u32 {
    64
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_response_mime_type() -> String {
    "text/plain".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_chain_depth() -> usize {
    50
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_max_output_len() -> usize {
    50_000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            base_url: default_base_url(),
            api_key: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: default_max_output_tokens(),
            response_mime_type: default_response_mime_type(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_chain_depth: default_max_chain_depth(),
            command_timeout_secs: default_command_timeout_secs(),
            max_output_len: default_max_output_len(),
            shell: None,
            working_dir: None,
        }
    }
}

impl Config {
    /// Load configuration, preferring an explicit path when given
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        match Self::find_config_path() {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
        config
            .retry
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Find pilot.toml by searching current directory and parents, then the user config dir
    pub fn find_config_path() -> Option<PathBuf> {
        if let Ok(mut current) = std::env::current_dir() {
            for _ in 0..10 {
                let candidate = current.join(CONFIG_FILE_NAME);
                if candidate.exists() {
                    return Some(candidate);
                }
                if !current.pop() {
                    break;
                }
            }
        }

        Self::user_config_path().filter(|p| p.exists())
    }

    /// `<config_dir>/shellpilot/config.toml`
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    /// API key from config or the environment
    pub fn api_key(&self) -> Result<String> {
        if let Some(key) = self.model.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.clone());
        }

        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => anyhow::bail!(
                "No API key configured. Set model.api_key in {} or export {}",
                CONFIG_FILE_NAME,
                API_KEY_ENV
            ),
        }
    }

    pub fn pilot_prompt_path(&self) -> PathBuf {
        self.paths
            .pilot_prompt
            .clone()
            .unwrap_or_else(|| app_config_dir().join("pilot_prompt.txt"))
    }

    pub fn memory_path(&self) -> PathBuf {
        self.paths
            .memory_file
            .clone()
            .unwrap_or_else(|| app_data_dir().join("memory.json"))
    }

    pub fn log_path(&self) -> PathBuf {
        self.paths
            .log_file
            .clone()
            .unwrap_or_else(|| app_data_dir().join("shellpilot.log"))
    }

    /// Write a commented default configuration file
    pub fn create_default(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists: {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        fs::write(path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// `<data_dir>/shellpilot`
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// `<config_dir>/shellpilot`
pub fn app_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

const DEFAULT_CONFIG: &str = r#"# shellpilot configuration

[model]
name = "gemini-1.5-flash"
# api_key = "..."            # or export GEMINI_API_KEY
temperature = 1.0
top_p = 0.95
top_k = 64
max_output_tokens = 8192
response_mime_type = "text/plain"

[safety]
# BLOCK_NONE, BLOCK_ONLY_HIGH, BLOCK_MEDIUM_AND_ABOVE, BLOCK_LOW_AND_ABOVE
harassment = "BLOCK_NONE"
hate_speech = "BLOCK_NONE"
sexually_explicit = "BLOCK_NONE"
dangerous_content = "BLOCK_NONE"

[retry]
max_attempts = 5
initial_delay_ms = 1000
backoff_multiplier = 2
# max_delay_ms = 30000
jitter = false

[agent]
# Commands the model may chain for one request
max_chain_depth = 50
command_timeout_secs = 120
max_output_len = 50000
# shell = "bash"
# working_dir = "/srv/work"

[paths]
# pilot_prompt = "~/.config/shellpilot/pilot_prompt.txt"
# memory_file = "~/.local/share/shellpilot/memory.json"
# log_file = "~/.local/share/shellpilot/shellpilot.log"
"#;
