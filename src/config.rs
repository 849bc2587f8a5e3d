//! Configuration module for marketchat.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{ChatError, Result};

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/marketchat.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// JWT secret key (must be set).
    #[serde(default)]
    pub jwt_secret: String,
    /// Lifetime in seconds of tokens minted by `JwtState::issue`.
    ///
    /// Production tokens come from the marketplace auth service; this only
    /// applies to tokens issued locally, as the test suites do.
    #[serde(default = "default_token_expiry")]
    pub token_expiry_secs: u64,
}

fn default_token_expiry() -> u64 {
    900 // 15 minutes
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_expiry_secs: default_token_expiry(),
        }
    }
}

/// Chat hub tuning.
///
/// Durations are in milliseconds so tests can run the keepalive protocol
/// on a short clock.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Time allowed to write one batch of frames to the peer.
    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,
    /// Idle read window. A peer that sends nothing (not even a pong)
    /// for this long is considered dead.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,
    /// Ping interval. Defaults to 9/10 of `pong_wait_ms`.
    #[serde(default)]
    pub ping_period_ms: Option<u64>,
    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    /// Capacity of each room's publish channel.
    #[serde(default = "default_room_queue_capacity")]
    pub room_queue_capacity: usize,
    /// Capacity of the hub's register and unregister channels.
    #[serde(default = "default_hub_queue_capacity")]
    pub hub_queue_capacity: usize,
}

fn default_write_wait() -> u64 {
    10_000
}

fn default_pong_wait() -> u64 {
    60_000
}

fn default_max_message_size() -> usize {
    512
}

fn default_send_queue_capacity() -> usize {
    256
}

fn default_room_queue_capacity() -> usize {
    256
}

fn default_hub_queue_capacity() -> usize {
    64
}

impl ChatConfig {
    /// Write deadline for one batch.
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Idle read window.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Effective ping interval.
    pub fn ping_period(&self) -> Duration {
        let ms = self
            .ping_period_ms
            .unwrap_or(self.pong_wait_ms.saturating_mul(9) / 10);
        Duration::from_millis(ms)
    }

    /// Check the keepalive and capacity settings.
    pub fn validate(&self) -> Result<()> {
        if self.ping_period() >= self.pong_wait() || self.ping_period().is_zero() {
            return Err(ChatError::Config(format!(
                "ping period ({} ms) must be positive and shorter than pong wait ({} ms)",
                self.ping_period().as_millis(),
                self.pong_wait_ms
            )));
        }
        if self.write_wait_ms == 0 {
            return Err(ChatError::Config("write_wait_ms must be positive".to_string()));
        }
        if self.send_queue_capacity == 0
            || self.room_queue_capacity == 0
            || self.hub_queue_capacity == 0
        {
            return Err(ChatError::Config(
                "queue capacities must be greater than zero".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ChatError::Config(
                "max_message_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            write_wait_ms: default_write_wait(),
            pong_wait_ms: default_pong_wait(),
            ping_period_ms: None,
            max_message_size: default_max_message_size(),
            send_queue_capacity: default_send_queue_capacity(),
            room_queue_capacity: default_room_queue_capacity(),
            hub_queue_capacity: default_hub_queue_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/marketchat.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Chat hub configuration.
    #[serde(default)]
    pub chat: ChatConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ChatError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ChatError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `MARKETCHAT_JWT_SECRET`: Override the JWT secret key
    /// - `MARKETCHAT_DATABASE_PATH`: Override the database file path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(jwt_secret) = std::env::var("MARKETCHAT_JWT_SECRET") {
            if !jwt_secret.is_empty() {
                self.auth.jwt_secret = jwt_secret;
            }
        }
        if let Ok(path) = std::env::var("MARKETCHAT_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ChatError::Config(
                "jwt_secret is not set. \
                 Set it in config.toml or via MARKETCHAT_JWT_SECRET environment variable."
                    .to_string(),
            ));
        }
        self.chat.validate()
    }
}
