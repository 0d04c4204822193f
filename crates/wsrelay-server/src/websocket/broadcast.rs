//! Fan-out of one payload to every open connection.

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::registry::ConnectionRegistry;
use crate::errors::RelayError;
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, record_error};

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Open connections the frame was offered to.
    pub recipients: usize,
    /// Sends that were queued.
    pub delivered: usize,
    /// Sends that failed.
    pub failed: usize,
}

/// Sends frames to every open connection in a registry.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Serialize `payload` once and send it to every open connection.
    ///
    /// Never fails: per-connection errors are logged and counted in the report.
    pub fn broadcast<T: Serialize + ?Sized>(&self, payload: &T) -> BroadcastReport {
        match serde_json::to_string(payload) {
            Ok(json) => self.broadcast_text(json.into()),
            Err(e) => {
                error!(error = %e, "failed to serialize broadcast payload");
                BroadcastReport::default()
            }
        }
    }

    /// Send a pre-serialized frame to every open connection.
    pub fn broadcast_text(&self, text: Utf8Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for conn in self.registry.snapshot() {
            if !conn.is_open() {
                continue;
            }
            report.recipients += 1;
            match conn.send_text(text.clone()) {
                Ok(()) => report.delivered += 1,
                Err(source) => {
                    report.failed += 1;
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    let err = RelayError::SendFailed {
                        conn_id: conn.id(),
                        source,
                    };
                    warn!(
                        conn_id = %conn.id(),
                        dropped = conn.drop_count(),
                        error = %err,
                        "broadcast send failed"
                    );
                    record_error(&err);
                }
            }
        }

        debug!(
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}
