//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use wsrelay_settings::ServerSettings;

use crate::websocket::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;

/// Runtime configuration for [`RelayServer`](crate::RelayServer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind; `0` auto-assigns.
    pub port: u16,
    /// Upgrades beyond this many open connections get `503`.
    pub max_connections: usize,
    /// Liveness ping period.
    pub heartbeat_interval: Duration,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub outbound_queue_capacity: usize,
    /// How long shutdown waits for clients to close.
    pub shutdown_timeout: Duration,
    /// Static asset directory; also holds the landing page.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_connections: 1000,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_message_size: 1024 * 1024, // 1 MB
            outbound_queue_capacity: 256,
            shutdown_timeout: Duration::from_secs(10),
            static_dir: PathBuf::from("public"),
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            max_message_size: s.max_message_size_bytes,
            outbound_queue_capacity: s.outbound_queue_capacity,
            shutdown_timeout: Duration::from_millis(s.shutdown_timeout_ms),
            static_dir: PathBuf::from(&s.static_dir),
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
