//! Reconnect supervisor.
//!
//! Watches the client's state channel. After an unexpected drop to
//! `Disconnected` it re-runs `connect` with the last config that logged in
//! successfully, backing off exponentially with jitter. Explicit
//! disconnects disarm it first, so they are never undone.

use std::sync::Arc;
use std::time::Duration;

use ami_client::{AmiClient, AmiConfig, ConnectionState};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::AMI_RECONNECT_ATTEMPTS_TOTAL;

/// Backoff policy for reconnect attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Whether the supervisor acts at all.
    pub enabled: bool,
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Ceiling for the delay.
    pub max_delay: Duration,
    /// Fraction of the delay randomized in either direction.
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(backoff_delay_ms(
            attempt,
            duration_ms(self.base_delay),
            duration_ms(self.max_delay),
            self.jitter_factor,
            rand::random::<f64>(),
        ))
    }
}

/// Exponential backoff, capped, then scaled by `1 ± jitter_factor`.
///
/// `random` is a value in `[0.0, 1.0)`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_ms(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    ((capped as f64) * jitter).round().max(0.0) as u64
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Re-establishes the AMI connection after unexpected drops.
pub struct ReconnectSupervisor {
    policy: ReconnectPolicy,
    armed: Mutex<Option<AmiConfig>>,
}

impl ReconnectSupervisor {
    /// Disarmed supervisor.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            armed: Mutex::new(None),
        }
    }

    /// The backoff policy.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Remember `config` as the one to restore after a drop.
    pub fn arm(&self, config: AmiConfig) {
        *self.armed.lock() = Some(config);
    }

    /// Forget the remembered config; later drops are left alone.
    pub fn disarm(&self) {
        *self.armed.lock() = None;
    }

    /// Whether a config is remembered.
    pub fn is_armed(&self) -> bool {
        self.armed.lock().is_some()
    }

    fn armed_config(&self) -> Option<AmiConfig> {
        self.armed.lock().clone()
    }

    /// Run until `token` is cancelled. Returns `None` when disabled.
    pub fn spawn(
        self: &Arc<Self>,
        client: AmiClient,
        token: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if !self.policy.enabled {
            debug!("reconnect supervisor disabled");
            return None;
        }
        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.run(client, token).await }))
    }

    async fn run(&self, client: AmiClient, token: CancellationToken) {
        let mut changes = client.state_changes();
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let state = *changes.borrow_and_update();
            if state == ConnectionState::Disconnected && self.is_armed() {
                self.restore(&client, &token).await;
            }
        }
        debug!("reconnect supervisor stopped");
    }

    async fn restore(&self, client: &AmiClient, token: &CancellationToken) {
        let mut attempt = 0u32;
        loop {
            let delay = self.policy.delay(attempt);
            info!(attempt, delay_ms = duration_ms(delay), "AMI reconnect scheduled");
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            if client.is_connected() {
                return;
            }
            let Some(config) = self.armed_config() else {
                debug!("reconnect disarmed while waiting");
                return;
            };
            metrics::counter!(AMI_RECONNECT_ATTEMPTS_TOTAL).increment(1);
            match client.connect(config).await {
                Ok(()) => {
                    info!(attempt, "AMI reconnected");
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "AMI reconnect failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay_ms(0, 1_000, 30_000, 0.0, 0.5), 1_000);
        assert_eq!(backoff_delay_ms(1, 1_000, 30_000, 0.0, 0.5), 2_000);
        assert_eq!(backoff_delay_ms(4, 1_000, 30_000, 0.0, 0.5), 16_000);
        assert_eq!(backoff_delay_ms(5, 1_000, 30_000, 0.0, 0.5), 30_000);
        assert_eq!(backoff_delay_ms(40, 1_000, 30_000, 0.0, 0.5), 30_000);
    }

    #[test]
    fn jitter_stays_within_factor() {
        assert_eq!(backoff_delay_ms(0, 1_000, 30_000, 0.2, 0.0), 800);
        assert_eq!(backoff_delay_ms(0, 1_000, 30_000, 0.2, 0.5), 1_000);
        let high = backoff_delay_ms(0, 1_000, 30_000, 0.2, 0.999_999);
        assert!((1_199..=1_200).contains(&high));
    }

    #[test]
    fn policy_delay_is_bounded() {
        let policy = ReconnectPolicy::default();
        for attempt in 0..10 {
            let d = policy.delay(attempt);
            assert!(d <= Duration::from_millis(36_000), "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn arm_and_disarm() {
        let sup = ReconnectSupervisor::new(ReconnectPolicy::default());
        assert!(!sup.is_armed());
        sup.arm(AmiConfig::new("127.0.0.1", 5038, "admin", "secret"));
        assert!(sup.is_armed());
        sup.disarm();
        assert!(!sup.is_armed());
    }

    #[tokio::test]
    async fn disabled_policy_spawns_nothing() {
        let sup = Arc::new(ReconnectSupervisor::new(ReconnectPolicy::default()));
        assert!(sup
            .spawn(AmiClient::new(), CancellationToken::new())
            .is_none());
    }
}
