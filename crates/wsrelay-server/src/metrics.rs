//! Prometheus metrics recorder and `/metrics` rendering.

use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::RelayError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from a recorder handle.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Count a recovered relay error under its kind label.
pub fn record_error(error: &RelayError) {
    counter!(RELAY_ERRORS_TOTAL, "kind" => error.kind()).increment(1);
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections released (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registry size (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Valid inbound messages relayed (counter).
pub const RELAY_MESSAGES_TOTAL: &str = "relay_messages_total";
/// Inbound messages rejected as malformed (counter).
pub const RELAY_MALFORMED_TOTAL: &str = "relay_malformed_total";
/// Per-connection broadcast sends that failed (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Connections reclaimed by the liveness monitor (counter).
pub const WS_LIVENESS_TERMINATIONS_TOTAL: &str = "ws_liveness_terminations_total";
/// Recovered errors (counter, labels: kind).
pub const RELAY_ERRORS_TOTAL: &str = "relay_errors_total";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ConnectionId;

    #[test]
    fn render_from_local_handle() {
        // Build a recorder + handle (no global install to avoid test conflicts).
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_error(&RelayError::Transport {
                conn_id: ConnectionId::new(1),
                reason: "reset".into(),
            });
        });

        let output = render(&handle);
        assert!(output.contains("relay_errors_total"));
        assert!(output.contains("kind=\"transport\""));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            RELAY_MESSAGES_TOTAL,
            RELAY_MALFORMED_TOTAL,
            WS_BROADCAST_DROPS_TOTAL,
            WS_LIVENESS_TERMINATIONS_TOTAL,
            RELAY_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name} is not snake_case"
            );
        }
    }
}
