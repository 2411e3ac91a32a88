//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Whether the AMI login is live.
    pub ami_connected: bool,
    /// Registered event subscribers.
    pub subscribers: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, ami_connected: bool, subscribers: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        ami_connected,
        subscribers,
    }
}
