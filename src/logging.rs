//! Tracing subscriber setup

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level when set. Safe to call once;
/// subsequent calls are ignored so tests can initialize freely.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let builder = fmt().with_env_filter(filter).with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    // Already initialized (e.g. by a test harness); keep the existing one.
    if result.is_err() {
        tracing::debug!("Tracing subscriber already initialized");
    }
}
