//! Connection parameters and connection state.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Standard AMI port.
pub const DEFAULT_AMI_PORT: u16 = 5038;
/// Per-action response timeout.
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 10_000;
/// Fallback timeout for list collection.
pub const DEFAULT_LIST_TIMEOUT_MS: u64 = 10_000;
/// TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Parameters for one AMI connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmiConfig {
    /// AMI host name or address.
    pub host: String,
    /// AMI TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Manager user.
    pub username: String,
    /// Manager secret.
    pub secret: String,
    /// Ask the server to push unsolicited events.
    #[serde(default = "default_events")]
    pub events: bool,
    /// Per-action response timeout in milliseconds.
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    /// Fallback timeout for list collection in milliseconds.
    #[serde(default = "default_list_timeout_ms")]
    pub list_timeout_ms: u64,
    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_AMI_PORT
}
fn default_events() -> bool {
    true
}
fn default_action_timeout_ms() -> u64 {
    DEFAULT_ACTION_TIMEOUT_MS
}
fn default_list_timeout_ms() -> u64 {
    DEFAULT_LIST_TIMEOUT_MS
}
fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

impl AmiConfig {
    /// Config with default timeouts and events enabled.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
            events: true,
            action_timeout_ms: DEFAULT_ACTION_TIMEOUT_MS,
            list_timeout_ms: DEFAULT_LIST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    /// `host:port` for dialling.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-action timeout.
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// List collection timeout.
    pub fn list_timeout(&self) -> Duration {
        Duration::from_millis(self.list_timeout_ms)
    }

    /// TCP connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl fmt::Debug for AmiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmiConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("events", &self.events)
            .field("action_timeout_ms", &self.action_timeout_ms)
            .field("list_timeout_ms", &self.list_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

/// Lifecycle of the AMI connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Login sent, waiting for its response.
    AwaitingLoginResponse,
    /// Logged in; actions may be sent.
    Connected,
}

impl ConnectionState {
    /// Whether actions may be sent.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingLoginResponse => "awaiting_login_response",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
