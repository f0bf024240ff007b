//! Logging setup for binaries and tests.
//!
//! Library code logs through the `log` macros. `init` installs a
//! `tracing-subscriber` and bridges `log` records into it with
//! `tracing_log::LogTracer`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::ConfigError;

const DEFAULT_FILTER: &str = "info";

/// Builds the filter: `RUST_LOG` wins, then the configured directive, then
/// `info`.
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = config.filter.as_deref().unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directive).map_err(|e| ConfigError::Validation {
        message: format!("Invalid logging filter '{}': {}", directive, e),
    })
}

/// Installs the global subscriber. Calling it again is a no-op.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_env_filter(config)?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().json().with_target(true)),
        )
    } else {
        tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().with_target(true)),
        )
    };

    match installed {
        Ok(()) => {
            // Fails only if another `log` logger was installed first.
            if let Err(e) = tracing_log::LogTracer::init() {
                tracing::warn!("log records will not reach tracing: {}", e);
            }
        }
        Err(_) => log::debug!("Global subscriber already installed, keeping it"),
    }
    Ok(())
}
