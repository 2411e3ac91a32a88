//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at start-up, before anything records. Returns the handle that
/// renders `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names used by the façade. The AMI client records its own
// `ami_*` counters.

/// HTTP requests handled (counter, labels: route).
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// Originate attempts (counter, labels: outcome).
pub const ORIGINATE_TOTAL: &str = "originate_total";
/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Reconnect attempts by the supervisor (counter).
pub const AMI_RECONNECT_ATTEMPTS_TOTAL: &str = "ami_reconnect_attempts_total";
