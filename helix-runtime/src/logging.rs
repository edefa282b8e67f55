//! Logging initialization.
//!
//! The runtime emits `tracing` events everywhere (region enter/exit at
//! `debug`, frame growth and task joins at `trace`, task failures at `warn`,
//! root panic reports at `error`). Host programs that do not install their
//! own subscriber can call [`init_logging`] once at startup.
//!
//! `RUST_LOG` overrides the configured level when set.

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogFormat, LogLevel};

/// Errors that can occur during logging initialization.
#[derive(Debug, Error)]
pub enum LogError {
    /// The filter directive could not be parsed.
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
    /// A global subscriber is already installed.
    #[error("subscriber already initialized")]
    AlreadyInitialized,
}

/// Build the filter for a configuration, honouring `RUST_LOG` first.
pub fn build_filter(level: LogLevel) -> Result<EnvFilter, LogError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level.as_str()).map_err(|e| LogError::InvalidFilter(e.to_string())),
    }
}

/// Install the global tracing subscriber for the given configuration.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = build_filter(config.level)?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_thread_names(true))
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized),
        LogFormat::Plain => registry
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized),
    }
}
