//! # wsrelay-logging
//!
//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs the global `fmt` subscriber (compact or JSON)
//!   behind an [`EnvFilter`]; `RUST_LOG` takes precedence over the configured level.
//! - [`banner`] builds the startup lines announcing where the relay is reachable.

#![deny(unsafe_code)]

pub mod banner;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub use banner::{local_ipv4, startup_lines};

/// Subscriber options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `info`, `wsrelay_server=debug`).
    pub level: String,
    /// Emit one JSON object per line.
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

/// Errors from subscriber installation.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber was already set.
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
    /// The configured level is not a valid filter directive.
    #[error("invalid log filter {directive:?}: {reason}")]
    InvalidFilter {
        /// The rejected directive.
        directive: String,
        /// Parser message.
        reason: String,
    },
}

/// Build the filter: `RUST_LOG` if set and valid, otherwise `config.level`.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| LoggingError::InvalidFilter {
        directive: config.level.clone(),
        reason: e.to_string(),
    })
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// Call once at application startup. A second call returns
/// [`LoggingError::AlreadyInitialized`].
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;

    let result = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init()
    };

    result.map_err(|_| LoggingError::AlreadyInitialized)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
