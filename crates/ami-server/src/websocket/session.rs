//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use crate::bridge::Bridge;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_DISCONNECTIONS_TOTAL,
};

/// Heartbeat timings for a session.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    /// Interval between server-initiated Ping frames.
    pub ping_interval: Duration,
    /// Silence after which the client is dropped.
    pub pong_timeout: Duration,
}

/// Run a WebSocket session for a connected client.
///
/// The client is attached to the event fan-out first, so its opening frame
/// is always the current `status`. Inbound text is ignored; only liveness
/// is tracked.
#[instrument(skip_all, fields(client_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    bridge: Arc<Bridge>,
    heartbeat: Heartbeat,
    queue_size: usize,
    token: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<String>(queue_size.max(1));
    let connection = Arc::new(ClientConnection::new(send_tx));
    let client_id = connection.id.clone();
    let _ = tracing::Span::current().record("client_id", client_id.as_str());

    let started = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let subscriber = bridge.attach(connection.clone());

    let outbound_conn = connection.clone();
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat.ping_interval);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_pong_elapsed() > heartbeat.pong_timeout
                    {
                        warn!(timeout = ?heartbeat.pong_timeout, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let inbound_conn = connection.clone();
    let inbound = async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Close(_)) => {
                    debug!("client sent close frame");
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => inbound_conn.mark_alive(),
                Ok(Message::Text(_) | Message::Binary(_)) => {
                    inbound_conn.mark_alive();
                    debug!("ignoring inbound frame");
                }
                Err(e) => {
                    debug!(error = %e, "websocket read failed");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = &mut outbound => {}
        () = inbound => {}
        () = token.cancelled() => debug!("server shutting down"),
    }

    let _ = bridge.detach(subscriber);
    outbound.abort();
    info!(dropped = connection.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
