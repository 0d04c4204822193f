//! Error types for the relay.
//!
//! Only [`ServerError`] ever reaches a caller. [`RelayError`] values are
//! recovered locally where they occur and exist for logs and metrics.

use std::time::Duration;

use thiserror::Error;

use crate::websocket::connection::ConnectionId;

/// Why a frame could not be queued for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection is closing or closed.
    #[error("connection is not open")]
    NotOpen,
    /// The outbound queue is at capacity.
    #[error("outbound queue is full")]
    QueueFull,
    /// The writer task has gone away.
    #[error("outbound channel closed")]
    Closed,
    /// The payload could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// Recoverable relay failures, one variant per failure class.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound text was not valid JSON.
    #[error("malformed payload: {reason}")]
    MalformedPayload {
        /// Parser message.
        reason: String,
    },
    /// A send to one connection failed.
    #[error("send to connection {conn_id} failed: {source}")]
    SendFailed {
        /// Target connection.
        conn_id: ConnectionId,
        /// Underlying send failure.
        #[source]
        source: SendError,
    },
    /// The transport reported an error for a connection.
    #[error("transport error on connection {conn_id}: {reason}")]
    Transport {
        /// Affected connection.
        conn_id: ConnectionId,
        /// Transport message.
        reason: String,
    },
    /// The peer missed a liveness round.
    #[error("connection {conn_id} missed a pong (silent for {silent_for:?})")]
    DeadPeer {
        /// Reclaimed connection.
        conn_id: ConnectionId,
        /// Time since the last pong.
        silent_for: Duration,
    },
}

impl RelayError {
    /// Stable label for logs and the `relay_errors_total{kind}` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::SendFailed { .. } => "send_failed",
            Self::Transport { .. } => "transport",
            Self::DeadPeer { .. } => "dead_peer",
        }
    }
}

/// Fatal listener errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
    /// Any other I/O failure on the listener.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let id = ConnectionId::new(7);
        let cases = [
            (
                RelayError::MalformedPayload {
                    reason: "expected value".into(),
                },
                "malformed_payload",
            ),
            (
                RelayError::SendFailed {
                    conn_id: id,
                    source: SendError::QueueFull,
                },
                "send_failed",
            ),
            (
                RelayError::Transport {
                    conn_id: id,
                    reason: "reset".into(),
                },
                "transport",
            ),
            (
                RelayError::DeadPeer {
                    conn_id: id,
                    silent_for: Duration::from_secs(60),
                },
                "dead_peer",
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn send_failed_display_includes_cause() {
        let err = RelayError::SendFailed {
            conn_id: ConnectionId::new(3),
            source: SendError::Closed,
        };
        assert_eq!(
            err.to_string(),
            "send to connection 3 failed: outbound channel closed"
        );
    }

    #[test]
    fn bind_error_display() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:80".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "failed to bind 0.0.0.0:80: denied");
    }
}
