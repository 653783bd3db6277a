//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections torn down (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused at the connection limit (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Frames dispatched (counter, labels: command).
pub const FRAMES_RECEIVED_TOTAL: &str = "frames_received_total";
/// `ERROR` frames sent (counter).
pub const FRAME_ERRORS_TOTAL: &str = "frame_errors_total";
/// Failed `CONNECT` authentications (counter).
pub const AUTH_FAILURES_TOTAL: &str = "auth_failures_total";
/// Publish calls (counter, labels: source).
pub const PUBLISHES_TOTAL: &str = "publishes_total";
/// `MESSAGE` frames queued for delivery (counter).
pub const WS_DELIVERIES_TOTAL: &str = "ws_deliveries_total";
/// Frames dropped on a full or closed send queue (counter).
pub const WS_DELIVERY_DROPS_TOTAL: &str = "ws_delivery_drops_total";
