//! Request/response façade over the AMI client.

use std::sync::Arc;

use ami_client::{AmiClient, AmiConfig, AmiError, EventSink, ListSpec, SubscriberId};
use ami_proto::{Action, Message, Originate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::metrics::ORIGINATE_TOTAL;
use crate::reconnect::{ReconnectPolicy, ReconnectSupervisor};

/// Snapshot returned by `GET /status`.
#[derive(Clone, Debug, Serialize)]
pub struct BridgeStatus {
    /// Whether the AMI login is live.
    pub connected: bool,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// One PJSIP endpoint as reported by `PJSIPShowEndpoints`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PjsipEndpoint {
    /// `ObjectName`.
    pub object_name: String,
    /// `Aor`, falling back to `ObjectName`, with any `/suffix` removed.
    pub endpoint: String,
    /// `DeviceState`.
    pub status: String,
    /// `Contacts`.
    pub contact: String,
}

impl PjsipEndpoint {
    /// Map an `EndpointList` event.
    pub fn from_event(event: &Message) -> Self {
        let object_name = event.get("ObjectName").unwrap_or_default();
        let aor = event
            .get("Aor")
            .filter(|aor| !aor.is_empty())
            .unwrap_or(object_name);
        Self {
            object_name: object_name.to_owned(),
            endpoint: normalize_endpoint(aor).to_owned(),
            status: event.get("DeviceState").unwrap_or_default().to_owned(),
            contact: event.get("Contacts").unwrap_or_default().to_owned(),
        }
    }
}

/// `"1000/1000"` becomes `"1000"`; anything without `/` is unchanged.
pub fn normalize_endpoint(id: &str) -> &str {
    id.split_once('/').map_or(id, |(head, _)| head)
}

/// Optional overrides for an originate request.
#[derive(Clone, Debug, Default)]
pub struct OriginateOptions {
    /// Dialplan context; `from-internal` when unset.
    pub context: Option<String>,
    /// Caller ID; `AMI Bridge` when unset.
    pub caller_id: Option<String>,
}

/// The façade shared by HTTP handlers and WebSocket sessions.
pub struct Bridge {
    client: AmiClient,
    defaults: AmiConfig,
    supervisor: Arc<ReconnectSupervisor>,
}

impl Bridge {
    /// `defaults` supplies timeouts and event mode for connects started
    /// over HTTP.
    pub fn new(client: AmiClient, defaults: AmiConfig, policy: ReconnectPolicy) -> Self {
        Self {
            client,
            defaults,
            supervisor: Arc::new(ReconnectSupervisor::new(policy)),
        }
    }

    /// The underlying client.
    pub fn client(&self) -> &AmiClient {
        &self.client
    }

    /// The reconnect supervisor.
    pub fn supervisor(&self) -> &Arc<ReconnectSupervisor> {
        &self.supervisor
    }

    /// Config for `host:port` with the given credentials and default
    /// timeouts.
    pub fn config_for(&self, host: &str, port: u16, username: &str, secret: &str) -> AmiConfig {
        AmiConfig {
            host: host.to_owned(),
            port,
            username: username.to_owned(),
            secret: secret.to_owned(),
            ..self.defaults.clone()
        }
    }

    /// Replace any existing connection and log in with `config`.
    pub async fn connect(&self, config: AmiConfig) -> Result<(), AmiError> {
        self.supervisor.disarm();
        self.client.connect(config.clone()).await?;
        self.supervisor.arm(config);
        Ok(())
    }

    /// Close the connection. Idempotent.
    pub async fn disconnect(&self) {
        self.supervisor.disarm();
        self.client.disconnect().await;
    }

    /// Current connection status.
    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            connected: self.client.is_connected(),
            timestamp: Utc::now(),
        }
    }

    /// Place a call from `channel` to `extension`.
    ///
    /// `true` only for a `Response: Success`; errors and timeouts are
    /// logged and reported as `false`.
    pub async fn originate(&self, channel: &str, extension: &str, opts: OriginateOptions) -> bool {
        let mut originate = Originate::new(channel, extension);
        if let Some(context) = opts.context.filter(|c| !c.is_empty()) {
            originate.context = context;
        }
        if let Some(caller_id) = opts.caller_id.filter(|c| !c.is_empty()) {
            originate.caller_id = caller_id;
        }

        let ok = match self.client.send(originate.into()).await {
            Ok(reply) if reply.is_success() => {
                info!(channel, extension, "originate accepted");
                true
            }
            Ok(reply) => {
                warn!(channel, extension, message = reply.text(), "originate rejected");
                false
            }
            Err(e) => {
                warn!(channel, extension, error = %e, "originate failed");
                false
            }
        };
        let outcome = if ok { "success" } else { "failure" };
        metrics::counter!(ORIGINATE_TOTAL, "outcome" => outcome).increment(1);
        ok
    }

    /// Raw response to `Action: Status`, or `None` on any failure.
    pub async fn active_channels(&self) -> Option<Message> {
        match self.client.send(Action::status()).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(error = %e, "status query failed");
                None
            }
        }
    }

    /// Every configured PJSIP endpoint.
    pub async fn pjsip_endpoints(&self) -> Result<Vec<PjsipEndpoint>, AmiError> {
        let items = self
            .client
            .collect_list(Action::pjsip_show_endpoints(), ListSpec::pjsip_endpoints())
            .await?;
        Ok(items.iter().map(PjsipEndpoint::from_event).collect())
    }

    /// Register an event sink; it is first sent the current status.
    pub fn attach(&self, sink: Arc<dyn EventSink>) -> SubscriberId {
        self.client.attach(sink)
    }

    /// Remove an event sink.
    pub fn detach(&self, id: SubscriberId) -> bool {
        self.client.detach(id)
    }

    /// Registered event sinks.
    pub fn subscriber_count(&self) -> usize {
        self.client.fanout().subscriber_count()
    }
}
