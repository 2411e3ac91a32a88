//! WebSocket client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ami_client::{Delivery, EventSink};
use ami_proto::Message;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// A connected WebSocket client.
pub struct ClientConnection {
    /// `client_<uuid>`.
    pub id: String,
    tx: mpsc::Sender<String>,
    /// When this connection was established.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Connection with a fresh id.
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self::with_id(format!("client_{}", uuid::Uuid::now_v7()), tx)
    }

    /// Connection with an explicit id.
    pub fn with_id(id: String, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a JSON frame for the write task.
    pub fn send_json(&self, value: &Value) -> Delivery {
        let Ok(text) = serde_json::to_string(value) else {
            return Delivery::Dropped;
        };
        match self.tx.try_send(text) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(client_id = %self.id, dropped, "outbound queue full");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Messages dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record activity from the client.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Whether the client was heard from since the last check; resets the flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the client was last heard from.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }
}

/// `{"type":"event","data":{...},"timestamp":...}`
pub fn event_frame(event: &Message) -> Value {
    json!({
        "type": "event",
        "data": event,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

/// `{"type":"status","connected":...,"timestamp":...}`
pub fn status_frame(connected: bool) -> Value {
    json!({
        "type": "status",
        "connected": connected,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

impl EventSink for ClientConnection {
    fn deliver(&self, event: &Arc<Message>) -> Delivery {
        self.send_json(&event_frame(event))
    }

    fn connection_changed(&self, connected: bool) -> Delivery {
        self.send_json(&status_frame(connected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::with_id("client_1".into(), tx), rx)
    }

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let (tx, _rx) = mpsc::channel(1);
        let a = ClientConnection::new(tx.clone());
        let b = ClientConnection::new(tx);
        assert!(a.id.starts_with("client_"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn event_is_wrapped() {
        let (conn, mut rx) = make_connection(4);
        let ev = Arc::new(Message::new().with("Event", "Newchannel").with("Channel", "PJSIP/1000-1"));
        assert_eq!(conn.deliver(&ev), Delivery::Delivered);

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "event");
        assert_eq!(frame["data"]["Event"], "Newchannel");
        assert_eq!(frame["data"]["Channel"], "PJSIP/1000-1");
        assert!(frame["timestamp"].is_string());
    }

    #[test]
    fn status_is_wrapped() {
        let (conn, mut rx) = make_connection(4);
        assert_eq!(conn.connection_changed(true), Delivery::Delivered);
        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "status");
        assert_eq!(frame["connected"], true);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (conn, _rx) = make_connection(1);
        assert_eq!(conn.connection_changed(false), Delivery::Delivered);
        assert_eq!(conn.connection_changed(false), Delivery::Dropped);
        assert_eq!(conn.connection_changed(false), Delivery::Dropped);
        assert_eq!(conn.drop_count(), 2);
    }

    #[test]
    fn closed_queue_reports_closed() {
        let (conn, rx) = make_connection(1);
        drop(rx);
        assert_eq!(conn.connection_changed(true), Delivery::Closed);
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn alive_flag_resets_on_check() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
        assert!(conn.last_pong_elapsed() < Duration::from_secs(1));
    }
}
