//! Ordered shutdown of the bridge.
//!
//! The AMI session is logged off first, so WebSocket clients still receive
//! the final `connected: false` status frame. Only then is the token
//! cancelled, which stops the listener, closes every session and ends the
//! reconnect supervisor. Tracked tasks are drained last.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::Bridge;

/// Default time allowed for tracked tasks to finish.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the cancellation token and the background tasks of one server.
pub struct ShutdownCoordinator {
    bridge: Arc<Bridge>,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    /// Coordinator that logs `bridge` off first.
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self {
            bridge,
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Token cancelled once shutdown reaches the server tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the token has been cancelled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for `handle` during [`shutdown`](Self::shutdown).
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Tasks tracked and not yet drained.
    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Log off from AMI, cancel the token, then wait up to `timeout` for
    /// tracked tasks. Returns `false` if some were still running.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!(connected = self.bridge.client().is_connected(), "shutting down bridge");
        self.bridge.disconnect().await;
        self.token.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock());
        info!(task_count = handles.len(), ?timeout, "draining tasks");
        let drained = tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_ok();
        if !drained {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
        drained
    }
}
