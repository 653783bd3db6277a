//! `CourierServer`: axum HTTP + WebSocket front end for the [`Hub`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use courier_settings::ServerSettings;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::id_from_value;
use crate::errors::{HubError, Result};
use crate::health::HealthResponse;
use crate::hub::Hub;
use crate::metrics::{self as hub_metrics, WS_CONNECTIONS_REJECTED_TOTAL};
use crate::shutdown::ShutdownCoordinator;

/// WebSocket subprotocols offered during the upgrade, most recent first.
pub const SUPPORTED_PROTOCOLS: [&str; 3] = ["v12.stomp", "v11.stomp", "v10.stomp"];

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Frame dispatch and fanout.
    pub hub: Arc<Hub>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Concurrent socket limit (0 disables it).
    pub max_connections: usize,
}

/// Body accepted by the publish entry point.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    /// Destination as a client would subscribe to it.
    pub destination: String,
    /// JSON payload delivered as the `MESSAGE` body.
    #[serde(default)]
    pub payload: Value,
    /// Extra headers copied onto each `MESSAGE`.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Scopes `/user/...` destinations; string or number.
    #[serde(default)]
    pub user_id: Option<Value>,
}

/// The courier HTTP/WebSocket server.
pub struct CourierServer {
    settings: ServerSettings,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl CourierServer {
    /// Create a server in front of `hub`.
    pub fn new(settings: ServerSettings, hub: Arc<Hub>) -> Self {
        Self {
            settings,
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            max_connections: self.settings.max_connections,
        };

        Router::new()
            .route(&self.settings.ws_path, get(ws_handler))
            .route(&self.settings.publish_path, post(publish_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// The hub behind this server.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Bind the listener and serve in the background.
    pub async fn start(self) -> Result<ServerHandle> {
        let addr = self.settings.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| HubError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| HubError::Bind { addr, source })?;

        let router = self.router();
        let token = self.shutdown.token();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "server exited with error");
            }
        });

        info!(
            addr = %local_addr,
            ws_path = %self.settings.ws_path,
            publish_path = %self.settings.publish_path,
            "courier server listening"
        );

        Ok(ServerHandle {
            addr: local_addr,
            hub: self.hub,
            shutdown: self.shutdown,
            shutdown_timeout: self.settings.shutdown_timeout(),
            server,
        })
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    shutdown_timeout: Duration,
    server: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The hub behind this server.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Close every socket with 1001 and wait for the server and connection
    /// tasks, bounded by the configured shutdown timeout.
    pub async fn shutdown(self) {
        info!(connections = self.hub.connection_count(), "shutting down");
        if self.shutdown.drain(self.server, self.shutdown_timeout).await {
            info!("shutdown complete");
        }
    }
}

/// GET {ws_path}: upgrade to a hub connection.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let connections = state.hub.connection_count();
    if state.max_connections > 0 && connections >= state.max_connections {
        metrics::counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(connections, limit = state.max_connections, "connection limit reached, rejecting upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let hub = Arc::clone(&state.hub);
    let shutdown = Arc::clone(&state.shutdown);
    ws.protocols(SUPPORTED_PROTOCOLS)
        .on_upgrade(move |socket| shutdown.track_connection(hub.serve_socket(socket, shutdown.token())))
}

/// POST {publish_path}: inject an event into the fanout.
async fn publish_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<PublishRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!(error = %rejection, "rejected publish body");
            return bad_request(&rejection.body_text());
        }
    };
    if request.destination.trim().is_empty() {
        return bad_request("destination is required");
    }

    let user_id = request.user_id.as_ref().and_then(id_from_value);
    let delivered = state
        .hub
        .publish(&request.destination, &request.payload, user_id.as_deref(), &request.headers);
    debug!(destination = %request.destination, delivered, "external publish");
    StatusCode::NO_CONTENT.into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::snapshot(
        &state.hub,
        state.start_time,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            hub_metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
