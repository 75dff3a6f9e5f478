//! Configuration loading, validation, and management for Tidechat.
//!
//! Loads configuration from `~/.tidechat/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.tidechat/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Context window budgets
    #[serde(default)]
    pub context: ContextConfig,

    /// File upload limits and chunking
    #[serde(default)]
    pub upload: UploadConfig,

    /// Gateway (HTTP + WebSocket) configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Conversation storage configuration
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("context", &self.context)
            .field("upload", &self.upload)
            .field("gateway", &self.gateway)
            .field("store", &self.store)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// The model's total context window in tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Tokens reserved for the model's reply
    #[serde(default = "default_reply_tokens")]
    pub reply_tokens: usize,
}

fn default_max_tokens() -> usize {
    128_000
}
fn default_reply_tokens() -> usize {
    800
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            reply_tokens: default_reply_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Chunk size in tokens for file analysis
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,

    /// Maximum upload size in bytes
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Accepted file extensions (lowercase, no dot)
    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_chunk_tokens() -> usize {
    1000
}
fn default_max_bytes() -> u64 {
    5 * 1024 * 1024
}
fn default_extensions() -> Vec<String> {
    vec!["txt".into(), "md".into(), "json".into()]
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: default_chunk_tokens(),
            max_bytes: default_max_bytes(),
            allowed_extensions: default_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds to wait for the next stream fragment before the generation
    /// is treated as failed
    #[serde(default = "default_fragment_timeout")]
    pub fragment_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    7640
}
fn default_fragment_timeout() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            fragment_timeout_secs: default_fragment_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Storage backend: "sqlite" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// SQLite database path (ignored for the memory backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.tidechat/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `TIDECHAT_API_KEY`
    /// - `TIDECHAT_API_URL`
    /// - `TIDECHAT_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(key) = std::env::var("TIDECHAT_API_KEY") {
            config.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("TIDECHAT_API_URL") {
            config.api_url = Some(url);
        }
        if let Ok(model) = std::env::var("TIDECHAT_MODEL") {
            config.model = model;
        }

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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tidechat")
    }

    /// Default SQLite database path under the config directory.
    pub fn default_db_path() -> PathBuf {
        Self::config_dir().join("conversations.db")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.context.reply_tokens >= self.context.max_tokens {
            return Err(ConfigError::ValidationError(
                "context.reply_tokens must be smaller than context.max_tokens".into(),
            ));
        }

        if self.upload.chunk_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "upload.chunk_tokens must be greater than zero".into(),
            ));
        }

        match self.store.backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown store backend {other:?} (expected \"sqlite\" or \"memory\")"
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            model: default_model(),
            temperature: default_temperature(),
            context: ContextConfig::default(),
            upload: UploadConfig::default(),
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
        }
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
