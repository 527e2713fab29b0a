//! Configuration module
//!
//! Layered loading: built-in defaults, then `config/default.toml`, then an
//! environment-specific file selected by `SCANWATCH_ENV`, then
//! `config/local.toml`, then `SCANWATCH__`-prefixed environment variables.
//! Durations are configured in seconds and converted at the accessor
//! boundary.

use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub tracking: TrackingConfig,
    pub credits: CreditConfig,
    pub retry: RetrySettings,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            tracking: TrackingConfig::default(),
            credits: CreditConfig::default(),
            retry: RetrySettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Scan engine endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the scan engine API
    pub base_url: String,
    /// Requester identity sent with submissions and list queries
    pub requester_id: String,
    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            requester_id: String::new(),
            request_timeout_seconds: 30,
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Cadences and bounds for the tracking workers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Delay between status poll fan-outs, in seconds
    pub poll_cadence_seconds: u64,
    /// Bound on a whole watch session, in seconds
    pub watch_timeout_seconds: u64,
    /// Session heartbeat cadence, in seconds
    pub heartbeat_cadence_seconds: u64,
    /// Full job list refresh cadence, in seconds
    pub list_refresh_seconds: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            poll_cadence_seconds: 5,
            watch_timeout_seconds: 3600,
            heartbeat_cadence_seconds: 300,
            list_refresh_seconds: 60,
        }
    }
}

impl TrackingConfig {
    pub fn poll_cadence(&self) -> Duration {
        Duration::from_secs(self.poll_cadence_seconds)
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_seconds)
    }

    pub fn heartbeat_cadence(&self) -> Duration {
        Duration::from_secs(self.heartbeat_cadence_seconds)
    }

    pub fn list_refresh(&self) -> Duration {
        Duration::from_secs(self.list_refresh_seconds)
    }
}

/// Credit gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditConfig {
    /// Starting balance used only when no persisted state exists yet
    pub initial_balance: u32,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self { initial_balance: 10 }
    }
}

/// Retry policy for scan engine calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 2000,
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&RetrySettings> for crate::infrastructure::resilience::RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Emit logs as JSON instead of human-readable lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("SCANWATCH_ENV").unwrap_or_else(|_| "development".into());

        let config = ConfigBuilder::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("SCANWATCH")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would wedge the workers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracking.poll_cadence_seconds == 0 {
            return Err(ConfigError::Message(
                "tracking.poll_cadence_seconds must be greater than zero".into(),
            ));
        }
        if self.tracking.heartbeat_cadence_seconds == 0 {
            return Err(ConfigError::Message(
                "tracking.heartbeat_cadence_seconds must be greater than zero".into(),
            ));
        }
        if self.tracking.watch_timeout_seconds < self.tracking.poll_cadence_seconds {
            return Err(ConfigError::Message(
                "tracking.watch_timeout_seconds must cover at least one poll cadence".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "retry.max_attempts must be greater than zero".into(),
            ));
        }
        if self.engine.base_url.is_empty() {
            return Err(ConfigError::Message("engine.base_url must be set".into()));
        }
        Ok(())
    }
}
