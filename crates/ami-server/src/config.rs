//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the bridge HTTP/WebSocket server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Interval between server-initiated WebSocket pings, in milliseconds.
    pub ping_interval_ms: u64,
    /// Drop a WebSocket client that has been silent this long, in milliseconds.
    pub pong_timeout_ms: u64,
    /// Outbound queue depth per WebSocket client.
    pub client_queue_size: usize,
}

impl ServerConfig {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Ping interval as a `Duration`.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Pong timeout as a `Duration`.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 60_000,
            client_queue_size: 256,
        }
    }
}
