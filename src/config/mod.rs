//! # Engine Configuration
//!
//! Layered configuration for the formation engine.
//!
//! ## Sources
//!
//! Later sources override earlier ones:
//!
//! 1. Compiled defaults ([`EngineConfig::default`])
//! 2. `base.toml` in the configuration directory
//! 3. `<environment>.toml`, with the environment taken from `FORMATION_ENV`, then `APP_ENV`,
//!    default `development`
//! 4. Environment variables prefixed `FORMATION_ENGINE__`, with `__` separating sections,
//!    e.g. `FORMATION_ENGINE__WEB__BIND_ADDRESS=127.0.0.1:9000`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use formation_engine::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let concurrency = manager.config().engine.max_concurrent_notifications;
//! # let _ = concurrency;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::system::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_MAX_CONCURRENT_NOTIFICATIONS,
    DEFAULT_MAX_FOLLOW_UP_ROUNDS,
};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: EngineSettings,
    pub dispatch: DispatchConfig,
    pub web: WebConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

/// Orchestration limits
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Deliveries in flight at once within one batch
    pub max_concurrent_notifications: usize,
    /// Follow-up rounds processed for one external event before stopping
    pub max_follow_up_rounds: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_notifications: DEFAULT_MAX_CONCURRENT_NOTIFICATIONS,
            max_follow_up_rounds: DEFAULT_MAX_FOLLOW_UP_ROUNDS,
        }
    }
}

/// Outbound webhook delivery
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl DispatchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            user_agent: format!("formation-engine/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP surface
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub request_timeout_ms: u64,
    /// Origins allowed by CORS; empty allows any
    pub cors_allowed_origins: Vec<String>,
    pub auth: WebAuthConfig,
}

impl WebConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_ms: 30_000,
            cors_allowed_origins: Vec::new(),
            auth: WebAuthConfig::default(),
        }
    }
}

/// Credentials accepted on protected routes
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WebAuthConfig {
    pub enabled: bool,
    pub api_key_header: String,
    /// Keys accepted in `api_key_header`
    pub api_keys: Vec<String>,
    /// Bearer tokens accepted from receivers reporting status
    pub callback_tokens: Vec<String>,
}

impl Default for WebAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key_header: "x-api-key".to_string(),
            api_keys: Vec::new(),
            callback_tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Overridden by `RUST_LOG` when set
    pub level: String,
    pub format: LogFormat,
    /// Directory for JSON log files; console only when unset
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
        }
    }
}

impl EngineConfig {
    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.engine.max_concurrent_notifications == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.max_concurrent_notifications",
                "0",
                "at least one delivery must be allowed in flight",
            ));
        }

        if self.engine.max_follow_up_rounds == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.max_follow_up_rounds",
                "0",
                "follow-up rounds must be greater than 0",
            ));
        }

        if self.dispatch.request_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.request_timeout_ms",
                "0",
                "timeout must be greater than 0",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "channel capacity must be greater than 0",
            ));
        }

        if self.web.enabled {
            if self.web.bind_address.parse::<std::net::SocketAddr>().is_err() {
                return Err(ConfigurationError::invalid_value(
                    "web.bind_address",
                    self.web.bind_address.clone(),
                    "expected host:port",
                ));
            }

            let auth = &self.web.auth;
            if auth.enabled && auth.api_keys.is_empty() && auth.callback_tokens.is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "web.auth.api_keys",
                    "authentication is enabled but no credentials are configured",
                ));
            }
        }

        Ok(())
    }
}
