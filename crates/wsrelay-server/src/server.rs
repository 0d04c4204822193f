//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::ExtensionRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{HealthResponse, health_check};
use crate::metrics::render;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::heartbeat::LivenessMonitor;
use crate::websocket::lifecycle::Lifecycle;
use crate::websocket::router::{Dispatcher, InboundFrame, MessageRouter};
use crate::websocket::session::run_connection;

/// Capacity of the channel feeding the dispatcher.
const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// Served on `/` and `/temp` when the static directory has no `index.html`.
const DEFAULT_LANDING_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Sensor relay</title>
</head>
<body>
<h1>Sensor relay</h1>
<p>Temperature: <span id="temperature">-</span> &middot; Humidity: <span id="humidity">-</span></p>
<p id="status">connecting...</p>
<script>
const ws = new WebSocket(location.origin.replace(/^http/, "ws") + "/");
ws.onmessage = (event) => {
  const data = JSON.parse(event.data);
  if ("temperature" in data) document.getElementById("temperature").textContent = data.temperature;
  if ("humidity" in data) document.getElementById("humidity").textContent = data.humidity;
  if (data.message) document.getElementById("status").textContent = data.message;
};
ws.onclose = () => { document.getElementById("status").textContent = "disconnected"; };
</script>
</body>
</html>
"#;

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    lifecycle: Arc<Lifecycle>,
    inbound_tx: mpsc::Sender<InboundFrame>,
    shutdown: Arc<ShutdownCoordinator>,
    config: Arc<ServerConfig>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    state: AppState,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
    listener_token: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl RelayServer {
    /// Create a server. `metrics` enables `/metrics` when present.
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        Self {
            state: AppState {
                lifecycle: Arc::new(Lifecycle::new()),
                inbound_tx,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                config: Arc::new(config),
                start_time: Instant::now(),
                metrics,
            },
            inbound_rx: Mutex::new(Some(inbound_rx)),
            listener_token: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(None),
        }
    }

    /// Build the Axum router.
    pub fn router(&self) -> Router {
        let static_files = ServeDir::new(&self.state.config.static_dir);

        Router::new()
            .route("/", get(root_handler))
            .route("/temp", get(landing_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback_service(static_files)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, then spawn the HTTP server, the dispatcher and the liveness monitor.
    ///
    /// Returns the bound address and the server task handle.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.state.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let inbound_rx = self.inbound_rx.lock().take();
        if let Some(rx) = inbound_rx {
            let dispatcher = Dispatcher::new(
                MessageRouter::new(),
                Arc::clone(self.state.lifecycle.broadcaster()),
            );
            *self.dispatcher.lock() = Some(tokio::spawn(dispatcher.run(rx)));
        }

        let monitor = LivenessMonitor::new(
            Arc::clone(&self.state.lifecycle),
            self.state.config.heartbeat_interval,
        );
        let cancel = self.state.shutdown.token();
        self.background.lock().push(tokio::spawn(async move {
            let _ = monitor.run(cancel).await;
        }));

        let app = self.router();
        let stop = self.listener_token.clone();
        let handle = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });

        info!(
            %local_addr,
            heartbeat = ?self.state.config.heartbeat_interval,
            "relay listening"
        );
        Ok((local_addr, handle))
    }

    /// Stop in order: refuse upgrades and stop the liveness timer, drain every
    /// connection, then stop the listener and wait for the server task.
    ///
    /// Returns `true` if every client closed before the drain timeout.
    pub async fn shutdown_gracefully(&self, handle: JoinHandle<()>) -> bool {
        let timeout = self.state.config.shutdown_timeout;
        info!(
            connections = self.connection_count(),
            "shutdown requested, refusing new connections"
        );

        let tasks = std::mem::take(&mut *self.background.lock());
        let _ = self
            .state
            .shutdown
            .graceful_shutdown(tasks, Some(timeout))
            .await;

        let drained = self.state.lifecycle.drain(timeout).await;

        self.listener_token.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "server task ended abnormally");
        }
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.abort();
        }

        info!(drained, "shutdown complete");
        drained
    }

    /// Lifecycle controller (registry, broadcaster).
    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.state.lifecycle
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.state.lifecycle.connection_count()
    }
}

/// Client address for logs: first `X-Forwarded-For` entry, else the socket
/// address, else `"unknown"`.
pub fn peer_address(headers: &HeaderMap, socket: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .or_else(|| socket.map(|addr| addr.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Landing page from `<static_dir>/index.html`, or the built-in page.
pub async fn landing_page(static_dir: &Path) -> Html<String> {
    let path = static_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => Html(body),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no landing page on disk, using built-in");
            Html(DEFAULT_LANDING_PAGE.to_string())
        }
    }
}

/// `GET /`: WebSocket upgrade, or the landing page for plain requests.
async fn root_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    connect_info: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
    headers: HeaderMap,
) -> Response {
    let Ok(ws) = ws else {
        return landing_page(&state.config.static_dir).await.into_response();
    };

    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let count = state.lifecycle.connection_count();
    if count >= state.config.max_connections {
        warn!(
            count,
            max = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let peer = peer_address(&headers, connect_info.ok().map(|ConnectInfo(addr)| addr));
    let lifecycle = Arc::clone(&state.lifecycle);
    let inbound = state.inbound_tx.clone();
    let capacity = state.config.outbound_queue_capacity;

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_connection(socket, peer, lifecycle, inbound, capacity))
}

async fn landing_handler(State(state): State<AppState>) -> Html<String> {
    landing_page(&state.config.static_dir).await
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_check(
        state.start_time,
        state.lifecycle.connection_count(),
        state.shutdown.is_shutting_down(),
    ))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use super::*;

    fn config_with_dir(dir: &Path) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            static_dir: dir.to_path_buf(),
            ..ServerConfig::default()
        }
    }

    fn make_server() -> RelayServer {
        RelayServer::new(
            config_with_dir(Path::new("/nonexistent/wsrelay-static")),
            None,
        )
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let (status, body) = get(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 0);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_reports_shutdown() {
        let server = make_server();
        server.shutdown().shutdown();
        let (_, body) = get(server.router(), "/health").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "shutting_down");
    }

    #[tokio::test]
    async fn root_and_temp_serve_builtin_landing_page() {
        let server = make_server();
        for uri in ["/", "/temp"] {
            let (status, body) = get(server.router(), uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert!(body.contains("Sensor relay"), "{uri}");
        }
    }

    #[tokio::test]
    async fn landing_page_prefers_static_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>custom</h1>").unwrap();
        let server = RelayServer::new(config_with_dir(dir.path()), None);

        let (_, root) = get(server.router(), "/").await;
        let (_, temp) = get(server.router(), "/temp").await;
        assert_eq!(root, "<h1>custom</h1>");
        assert_eq!(temp, root);
    }

    #[tokio::test]
    async fn static_files_are_served_from_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1);").unwrap();
        let server = RelayServer::new(config_with_dir(dir.path()), None);

        let (status, body) = get(server.router(), "/app.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "console.log(1);");

        let (status, _) = get(server.router(), "/missing.css").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_is_404_without_handle() {
        let server = make_server();
        let (status, _) = get(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_renders_with_handle() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = RelayServer::new(
            config_with_dir(Path::new("/nonexistent/wsrelay-static")),
            Some(handle),
        );
        let (status, _) = get(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn peer_address_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let socket: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(peer_address(&headers, Some(socket)), "203.0.113.7");
    }

    #[test]
    fn peer_address_falls_back_to_socket_then_unknown() {
        let headers = HeaderMap::new();
        let socket: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(peer_address(&headers, Some(socket)), "127.0.0.1:4000");
        assert_eq!(peer_address(&headers, None), "unknown");
    }

    #[test]
    fn accessors() {
        let server = make_server();
        assert_eq!(server.config().port, 0);
        assert_eq!(server.connection_count(), 0);
        assert!(!server.shutdown().is_shutting_down());
        assert!(server.lifecycle().registry().is_empty());
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = blocker.local_addr().unwrap().port();
        let server = RelayServer::new(
            ServerConfig {
                host: "127.0.0.1".into(),
                port,
                ..ServerConfig::default()
            },
            None,
        );
        assert_matches!(server.listen().await, Err(ServerError::Bind { .. }));
    }
}
