//! `BridgeServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::bridge::Bridge;
use crate::config::ServerConfig;
use crate::routes;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::Heartbeat;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The AMI façade.
    pub bridge: Arc<Bridge>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// WebSocket heartbeat timings.
    pub heartbeat: Heartbeat,
    /// Outbound queue depth per WebSocket client.
    pub queue_size: usize,
}

/// The bridge server.
pub struct BridgeServer {
    config: ServerConfig,
    bridge: Arc<Bridge>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl BridgeServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, bridge: Arc<Bridge>) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new(Arc::clone(&bridge)));
        Self {
            config,
            bridge,
            shutdown,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            bridge: self.bridge.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            heartbeat: Heartbeat {
                ping_interval: self.config.ping_interval(),
                pong_timeout: self.config.pong_timeout(),
            },
            queue_size: self.config.client_queue_size,
        };

        Router::new()
            .route("/connect", post(routes::connect))
            .route("/disconnect", post(routes::disconnect))
            .route("/status", get(routes::status))
            .route("/originate", post(routes::originate))
            .route("/channels", get(routes::channels))
            .route("/pjsip-endpoints", get(routes::pjsip_endpoints))
            .route("/health", get(routes::health))
            .route("/metrics", get(routes::metrics))
            .route("/ws", get(routes::ws))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve until the shutdown token fires. The serve task is
    /// tracked by the coordinator.
    ///
    /// Returns the bound address (useful with port `0`).
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        info!(%addr, "bridge server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        self.shutdown.track(handle);
        Ok(addr)
    }

    /// Start the reconnect supervisor, if enabled, under the shutdown
    /// token.
    pub fn spawn_supervisor(&self) -> bool {
        let handle = self
            .bridge
            .supervisor()
            .spawn(self.bridge.client().clone(), self.shutdown.token());
        match handle {
            Some(handle) => {
                self.shutdown.track(handle);
                true
            }
            None => false,
        }
    }

    /// The AMI façade.
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// The shutdown coordinator. Call its `shutdown` to stop the server.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
