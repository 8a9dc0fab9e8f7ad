use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{RelayError, Result};

/// Main configuration structure for chatrelay
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream generation service configuration
    #[serde(default)]
    pub chat: ChatConfig,
    /// Streaming relay tuning
    #[serde(default)]
    pub relay: RelayConfig,
    /// Log output configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Certificate ledger configuration
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl Config {
    /// Read and parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {e}")))
    }

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.chat.base_url).map_err(|e| {
            RelayError::Config(format!(
                "Invalid chat.base_url '{}': {e}",
                self.chat.base_url
            ))
        })?;

        if self.chat.timeout_secs == 0 {
            return Err(RelayError::Config(
                "chat.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !self.chat.temperature.is_finite() || self.chat.temperature < 0.0 {
            return Err(RelayError::Config(
                "chat.temperature must be a finite number >= 0".to_string(),
            ));
        }
        if self.chat.max_tokens == 0 {
            return Err(RelayError::Config(
                "chat.max_tokens must be greater than 0".to_string(),
            ));
        }
        if self.relay.queue_capacity == 0 {
            return Err(RelayError::Config(
                "relay.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.relay.session_timeout_secs == 0 {
            return Err(RelayError::Config(
                "relay.session_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8082")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8082".to_string()
}

/// Upstream generation service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Base URL of the OpenAI-compatible API (without `/chat/completions`)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key; takes precedence over `api_key_env`
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable name for the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model identifier sent upstream
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature used when a request does not set one
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Output length cap used when a request does not set one
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upstream connect timeout in seconds
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl ChatConfig {
    /// Resolve the API key from config or environment
    ///
    /// An unset key is not an error: local OpenAI-compatible servers
    /// often run without authentication.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "CHAT_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_chat_timeout_secs() -> u64 {
    60
}

/// Streaming relay tuning
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Capacity of the per-session event queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Absolute lifetime of one streaming session in seconds
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// How long the producer may wait to enqueue its final error event
    #[serde(default = "default_error_send_timeout_ms")]
    pub error_send_timeout_ms: u64,
}

impl RelayConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn error_send_timeout(&self) -> Duration {
        Duration::from_millis(self.error_send_timeout_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            session_timeout_secs: default_session_timeout_secs(),
            error_send_timeout_ms: default_error_send_timeout_ms(),
        }
    }
}

fn default_queue_capacity() -> usize {
    100
}

fn default_session_timeout_secs() -> u64 {
    60
}

fn default_error_send_timeout_ms() -> u64 {
    2000
}

/// Log output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Directory for daily log files (stdout only when unset)
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Default filter level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Certificate ledger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Chain id reported by the network status endpoint
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// RPC endpoint of the chain (informational for the in-memory ledger)
    #[serde(default)]
    pub rpc_url: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            rpc_url: None,
        }
    }
}

fn default_chain_id() -> u64 {
    11155111
}
