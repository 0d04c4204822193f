//! Connection lifecycle: accept, release and shutdown drain.
//!
//! Every way a connection can end (clean close, transport error, forced
//! termination) funnels into one idempotent release, which unregisters the
//! connection and tells the remaining clients how many are left.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, close_code};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::broadcast::Broadcaster;
use super::connection::{Connection, ConnectionId, Outbound};
use super::registry::ConnectionRegistry;
use crate::errors::RelayError;
use crate::frames::{DisconnectFrame, WelcomeFrame};
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL, record_error,
};

/// Close reason sent to clients during shutdown.
pub const SHUTDOWN_REASON: &str = "server shutting down";

/// Owns the registry and every transition into and out of it.
pub struct Lifecycle {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    next_id: AtomicU64,
}

impl Lifecycle {
    /// Create a controller over an empty registry.
    pub fn new() -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&registry)));
        Self {
            registry,
            broadcaster,
            next_id: AtomicU64::new(1),
        }
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The broadcaster over [`registry`](Self::registry).
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Assign an id, register the connection and queue its welcome frame.
    pub fn accept(&self, tx: mpsc::Sender<Outbound>, peer: impl Into<String>) -> Arc<Connection> {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection::new(id, peer, tx));

        let count = self.registry.register_with(Arc::clone(&conn), |c, len| {
            if let Err(e) = c.send_json(&WelcomeFrame::new(len)) {
                warn!(conn_id = %id, error = %e, "failed to queue welcome frame");
            }
        });

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        #[allow(clippy::cast_precision_loss)]
        gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
        info!(conn_id = %id, peer = conn.peer(), connected_clients = count, "client connected");
        conn
    }

    /// The peer closed cleanly or the stream ended.
    pub fn on_close(&self, conn: &Connection) -> bool {
        self.release(conn, "closed")
    }

    /// The transport failed. No further sends are attempted.
    pub fn on_error(&self, conn: &Connection, error: &dyn fmt::Display) -> bool {
        let err = RelayError::Transport {
            conn_id: conn.id(),
            reason: error.to_string(),
        };
        warn!(conn_id = %conn.id(), kind = err.kind(), error = %err, "websocket error");
        record_error(&err);
        conn.terminate();
        self.release(conn, "error")
    }

    /// Drop the connection without a close handshake.
    pub fn terminate(&self, conn: &Connection) -> bool {
        conn.terminate();
        self.release(conn, "terminated")
    }

    /// Returns `true` only for the call that actually released `conn`.
    fn release(&self, conn: &Connection, reason: &'static str) -> bool {
        if !conn.release() {
            return false;
        }
        let _ = self.registry.unregister(conn.id());
        let remaining = self.registry.len();

        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        #[allow(clippy::cast_precision_loss)]
        gauge!(WS_CONNECTIONS_ACTIVE).set(remaining as f64);
        info!(
            conn_id = %conn.id(),
            reason,
            connected_clients = remaining,
            duration_ms = u64::try_from(conn.age().as_millis()).unwrap_or(u64::MAX),
            dropped = conn.drop_count(),
            "client disconnected"
        );

        let _ = self.broadcaster.broadcast(&DisconnectFrame::new(remaining));
        true
    }

    /// Send a "going away" close frame to every open connection.
    ///
    /// Returns how many close frames were queued.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        self.registry.for_each(|conn| {
            let frame = CloseFrame {
                code: close_code::AWAY,
                reason: SHUTDOWN_REASON.into(),
            };
            match conn.close(frame) {
                Ok(()) => closed += 1,
                Err(e) => warn!(conn_id = %conn.id(), error = %e, "failed to queue close frame"),
            }
        });
        closed
    }

    /// Close every connection and wait for the registry to empty.
    ///
    /// Connections still registered after `timeout` are terminated.
    /// Returns `true` if every connection closed on its own.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let closing = self.close_all();
        info!(closing, ?timeout, "draining connections");

        if self.registry.wait_until_empty(timeout).await {
            return true;
        }

        let leftovers = self.registry.snapshot();
        warn!(count = leftovers.len(), "drain timed out, terminating remaining connections");
        for conn in &leftovers {
            let _ = self.terminate(conn);
        }
        false
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
