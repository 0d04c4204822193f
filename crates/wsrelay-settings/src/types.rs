//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial: missing fields take their compiled default.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 9000, "heartbeatIntervalMs": 15000 },
///   "logging": { "level": "debug", "json": true }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and connection settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
    /// Hosting platform detection.
    pub platform: PlatformSettings,
}

impl RelaySettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be greater than zero".into(),
            ));
        }
        if s.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be greater than zero".into(),
            ));
        }
        if s.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundQueueCapacity must be greater than zero".into(),
            ));
        }
        if s.max_message_size_bytes == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSizeBytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and per-connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port. `0` picks an ephemeral port.
    pub port: u16,
    /// Upgrades beyond this many open connections are refused.
    pub max_connections: usize,
    /// Liveness ping period in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Largest accepted inbound frame.
    pub max_message_size_bytes: usize,
    /// Per-connection outbound queue depth.
    pub outbound_queue_capacity: usize,
    /// Upper bound on connection draining during shutdown.
    pub shutdown_timeout_ms: u64,
    /// Directory served for static assets and the landing page.
    pub static_dir: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 1000,
            heartbeat_interval_ms: 30_000,
            max_message_size_bytes: 1_048_576,
            outbound_queue_capacity: 256,
            shutdown_timeout_ms: 10_000,
            static_dir: "public".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Hosting platform detection. Only affects the startup log line.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformSettings {
    /// Running on Render.
    pub render: bool,
    /// Public URL assigned by the platform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
