//! Settings types. Every struct fills missing fields from its `Default`.

use std::fmt;

use ami_client::config::{
    DEFAULT_ACTION_TIMEOUT_MS, DEFAULT_AMI_PORT, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_LIST_TIMEOUT_MS,
};
use ami_client::AmiConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object (`~/.ami-bridge/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// HTTP/WebSocket listener.
    pub server: ServerSettings,
    /// Upstream AMI host.
    pub ami: AmiSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// HTTP/WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Interval between WebSocket pings.
    pub ping_interval_ms: u64,
    /// Drop a WebSocket client silent for this long.
    pub pong_timeout_ms: u64,
    /// Outbound queue depth per WebSocket client.
    pub client_queue_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 60_000,
            client_queue_size: 256,
        }
    }
}

/// Upstream AMI connection settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AmiSettings {
    /// Connect at start-up instead of waiting for `POST /connect`.
    pub auto_connect: bool,
    /// AMI host.
    pub host: String,
    /// AMI port.
    pub port: u16,
    /// Manager user.
    pub username: String,
    /// Manager secret.
    pub secret: String,
    /// Request unsolicited events at login.
    pub events: bool,
    /// Per-action response timeout in milliseconds.
    pub action_timeout_ms: u64,
    /// List collection timeout in milliseconds.
    pub list_timeout_ms: u64,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Automatic reconnection after an unexpected disconnect.
    pub reconnect: ReconnectSettings,
}

impl Default for AmiSettings {
    fn default() -> Self {
        Self {
            auto_connect: false,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_AMI_PORT,
            username: String::new(),
            secret: String::new(),
            events: true,
            action_timeout_ms: DEFAULT_ACTION_TIMEOUT_MS,
            list_timeout_ms: DEFAULT_LIST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl fmt::Debug for AmiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmiSettings")
            .field("auto_connect", &self.auto_connect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("events", &self.events)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

impl AmiSettings {
    /// Connection config for the AMI client.
    ///
    /// Fails when the host or username is empty or the port is zero.
    pub fn to_config(&self) -> Result<AmiConfig> {
        if self.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("ami.host is empty".into()));
        }
        if self.port == 0 {
            return Err(SettingsError::InvalidValue("ami.port must be non-zero".into()));
        }
        if self.username.trim().is_empty() {
            return Err(SettingsError::InvalidValue("ami.username is empty".into()));
        }
        let mut config = AmiConfig::new(&self.host, self.port, &self.username, &self.secret);
        config.events = self.events;
        config.action_timeout_ms = self.action_timeout_ms;
        config.list_timeout_ms = self.list_timeout_ms;
        config.connect_timeout_ms = self.connect_timeout_ms;
        Ok(config)
    }
}

/// Reconnect supervisor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Reconnect after an unexpected disconnect.
    pub enabled: bool,
    /// First backoff delay.
    pub base_delay_ms: u64,
    /// Backoff ceiling.
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
