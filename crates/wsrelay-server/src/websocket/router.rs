//! Inbound message routing.
//!
//! [`MessageRouter`] decides what happens to one raw frame and performs no
//! I/O. [`Dispatcher`] owns the single consumer of the inbound channel and
//! carries out the decision, so relayed messages leave the server in the
//! order they arrived.

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::broadcast::{BroadcastReport, Broadcaster};
use super::connection::Connection;
use crate::errors::RelayError;
use crate::frames::ErrorFrame;
use crate::metrics::{RELAY_MALFORMED_TOTAL, RELAY_MESSAGES_TOTAL, record_error};

/// Field added to relayed objects.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Routing decision for one inbound frame.
#[derive(Debug)]
pub enum Route {
    /// Relay this payload to every open connection.
    Broadcast(Value),
    /// Reply to the sender only.
    Reject {
        /// Directed error frame.
        frame: ErrorFrame,
        /// Parse failure.
        error: RelayError,
    },
}

/// One text frame read from a connection.
#[derive(Debug)]
pub struct InboundFrame {
    /// Sender.
    pub connection: Arc<Connection>,
    /// Raw frame text.
    pub text: Utf8Bytes,
}

/// Parses inbound text and stamps relayed objects.
#[derive(Clone, Copy)]
pub struct MessageRouter {
    clock: fn() -> DateTime<Utc>,
}

impl MessageRouter {
    /// Router stamping with the system clock.
    pub fn new() -> Self {
        Self { clock: Utc::now }
    }

    /// Router stamping with `clock`.
    pub fn with_clock(clock: fn() -> DateTime<Utc>) -> Self {
        Self { clock }
    }

    /// Decide what to do with `raw`.
    pub fn route(&self, raw: &str) -> Route {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Route::Broadcast(enrich(value, &format_timestamp((self.clock)()))),
            Err(e) => Route::Reject {
                frame: ErrorFrame::invalid_format(raw),
                error: RelayError::MalformedPayload {
                    reason: e.to_string(),
                },
            },
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge `timestamp` into a JSON object, replacing any existing value.
///
/// Values other than objects are returned unchanged.
pub fn enrich(value: Value, timestamp: &str) -> Value {
    match value {
        Value::Object(mut map) => {
            let _ = map.insert(
                TIMESTAMP_FIELD.to_string(),
                Value::String(timestamp.to_string()),
            );
            Value::Object(map)
        }
        other => other,
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2026-10-18T12:00:00.000Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// What the dispatcher did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Relayed to every open connection.
    Broadcast(BroadcastReport),
    /// Rejected; `replied` says whether the error frame was queued to the sender.
    Rejected {
        /// Error frame queued.
        replied: bool,
    },
}

/// Single consumer of inbound frames.
pub struct Dispatcher {
    router: MessageRouter,
    broadcaster: Arc<Broadcaster>,
}

impl Dispatcher {
    /// Create a dispatcher relaying through `broadcaster`.
    pub fn new(router: MessageRouter, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            router,
            broadcaster,
        }
    }

    /// Consume frames until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<InboundFrame>) {
        while let Some(frame) = rx.recv().await {
            let _ = self.dispatch(&frame);
        }
        info!("inbound channel closed, dispatcher stopped");
    }

    /// Route and deliver one frame.
    pub fn dispatch(&self, frame: &InboundFrame) -> DispatchOutcome {
        let conn_id = frame.connection.id();
        match self.router.route(frame.text.as_str()) {
            Route::Broadcast(payload) => {
                counter!(RELAY_MESSAGES_TOTAL).increment(1);
                let report = self.broadcaster.broadcast(&payload);
                debug!(%conn_id, recipients = report.recipients, "message relayed");
                DispatchOutcome::Broadcast(report)
            }
            Route::Reject { frame: reply, error } => {
                counter!(RELAY_MALFORMED_TOTAL).increment(1);
                warn!(%conn_id, kind = error.kind(), error = %error, "invalid JSON received");
                record_error(&error);
                let replied = match frame.connection.send_json(&reply) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(%conn_id, error = %e, "could not reply to malformed message");
                        false
                    }
                };
                DispatchOutcome::Rejected { replied }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::websocket::connection::{ConnectionId, Outbound};
    use crate::websocket::registry::ConnectionRegistry;

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn router() -> MessageRouter {
        MessageRouter::with_clock(fixed_clock)
    }

    #[test]
    fn object_is_stamped() {
        let Route::Broadcast(v) = router().route(r#"{"temperature":21.5,"humidity":40}"#) else {
            panic!("expected broadcast");
        };
        assert_eq!(
            v,
            json!({
                "temperature": 21.5,
                "humidity": 40,
                "timestamp": "2026-10-18T12:00:00.000Z",
            })
        );
    }

    #[test]
    fn sender_timestamp_is_overwritten() {
        let Route::Broadcast(v) = router().route(r#"{"timestamp":"yesterday"}"#) else {
            panic!("expected broadcast");
        };
        assert_eq!(v["timestamp"], "2026-10-18T12:00:00.000Z");
    }

    #[test]
    fn non_object_json_is_relayed_unmodified() {
        for raw in ["42", "\"hi\"", "[1,2]", "null", "true"] {
            let Route::Broadcast(v) = router().route(raw) else {
                panic!("expected broadcast for {raw}");
            };
            assert_eq!(v, serde_json::from_str::<Value>(raw).unwrap());
        }
    }

    #[test]
    fn malformed_text_is_rejected_with_raw_echo() {
        let Route::Reject { frame, error } = router().route("not-json") else {
            panic!("expected reject");
        };
        assert_eq!(frame, ErrorFrame::invalid_format("not-json"));
        assert_eq!(error.kind(), "malformed_payload");
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(matches!(router().route(""), Route::Reject { .. }));
    }

    #[test]
    fn timestamp_format() {
        assert_eq!(format_timestamp(fixed_clock()), "2026-10-18T12:00:00.000Z");
    }

    // ── Dispatcher ──────────────────────────────────────────────────

    struct Harness {
        dispatcher: Dispatcher,
        conns: Vec<Arc<Connection>>,
        receivers: Vec<mpsc::Receiver<Outbound>>,
    }

    fn harness(n: u64) -> Harness {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut conns = Vec::new();
        let mut receivers = Vec::new();
        for id in 1..=n {
            let (tx, rx) = mpsc::channel(8);
            let conn = Arc::new(Connection::new(ConnectionId::new(id), "test", tx));
            let _ = registry.register(Arc::clone(&conn));
            conns.push(conn);
            receivers.push(rx);
        }
        let broadcaster = Arc::new(Broadcaster::new(registry));
        Harness {
            dispatcher: Dispatcher::new(router(), broadcaster),
            conns,
            receivers,
        }
    }

    fn next_json(rx: &mut mpsc::Receiver<Outbound>) -> Value {
        match rx.try_recv() {
            Ok(Outbound::Text(t)) => serde_json::from_str(t.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn valid_message_reaches_everyone_including_sender() {
        let mut h = harness(3);
        let frame = InboundFrame {
            connection: Arc::clone(&h.conns[0]),
            text: r#"{"temperature":20}"#.into(),
        };
        let outcome = h.dispatcher.dispatch(&frame);
        assert!(matches!(
            outcome,
            DispatchOutcome::Broadcast(BroadcastReport { delivered: 3, .. })
        ));
        for rx in &mut h.receivers {
            let v = next_json(rx);
            assert_eq!(v["temperature"], 20);
            assert_eq!(v["timestamp"], "2026-10-18T12:00:00.000Z");
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn malformed_message_only_answers_sender() {
        let mut h = harness(3);
        let frame = InboundFrame {
            connection: Arc::clone(&h.conns[1]),
            text: "not-json".into(),
        };
        assert_eq!(
            h.dispatcher.dispatch(&frame),
            DispatchOutcome::Rejected { replied: true }
        );
        assert_eq!(
            next_json(&mut h.receivers[1]),
            json!({"error": "Invalid message format", "message": "not-json"})
        );
        assert!(h.receivers[0].try_recv().is_err());
        assert!(h.receivers[2].try_recv().is_err());
    }

    #[test]
    fn malformed_message_from_gone_sender_is_dropped() {
        let h = harness(1);
        h.conns[0].terminate();
        let frame = InboundFrame {
            connection: Arc::clone(&h.conns[0]),
            text: "{oops".into(),
        };
        assert_eq!(
            h.dispatcher.dispatch(&frame),
            DispatchOutcome::Rejected { replied: false }
        );
    }

    #[tokio::test]
    async fn run_preserves_arrival_order() {
        let mut h = harness(1);
        let (tx, rx) = mpsc::channel(8);
        for i in 0..5 {
            tx.send(InboundFrame {
                connection: Arc::clone(&h.conns[0]),
                text: format!(r#"{{"seq":{i}}}"#).into(),
            })
            .await
            .unwrap();
        }
        drop(tx);
        h.dispatcher.run(rx).await;

        for i in 0..5 {
            assert_eq!(next_json(&mut h.receivers[0])["seq"], i);
        }
    }
}
