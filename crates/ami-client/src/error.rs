//! AMI client error types.

use ami_proto::CodecError;
use thiserror::Error;

/// Errors surfaced to callers of the AMI client.
///
/// Protocol anomalies (unparseable lines, unmatched `ActionID`s,
/// unclassified blocks) never appear here; they are logged and absorbed.
#[derive(Debug, Error)]
pub enum AmiError {
    /// The server rejected the login.
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// `Message` text from the server's reply.
        message: String,
    },

    /// No live connection; nothing was sent.
    #[error("not connected to the AMI host")]
    NotConnected,

    /// No response within the action timeout.
    #[error("action {action_id} timed out after {timeout_ms}ms")]
    ActionTimeout {
        /// Correlation identifier of the action.
        action_id: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The socket closed or errored while the action was in flight.
    #[error("connection to the AMI host was lost")]
    ConnectionLost,

    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        /// `host:port` that was dialled.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The server answered with something other than `Response: Success`.
    #[error("action failed ({response}): {message}")]
    ActionFailed {
        /// Value of the `Response` field.
        response: String,
        /// `Message` text from the server.
        message: String,
    },

    /// The inbound stream could not be framed.
    #[error("framing error: {0}")]
    Framing(String),

    /// Socket I/O failed outside of connection establishment.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AmiError {
    /// Machine-readable code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed { .. } => "AUTHENTICATION_FAILED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::ActionTimeout { .. } => "ACTION_TIMEOUT",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::ConnectFailed { .. } => "CONNECT_FAILED",
            Self::ActionFailed { .. } => "ACTION_FAILED",
            Self::Framing(_) => "FRAMING",
            Self::Io(_) => "IO",
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ActionTimeout { .. }
                | Self::ConnectionLost
                | Self::ConnectFailed { .. }
                | Self::NotConnected
                | Self::Io(_)
        )
    }
}

impl From<CodecError> for AmiError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => Self::Io(e),
            other => Self::Framing(other.to_string()),
        }
    }
}

/// Result type for AMI client operations.
pub type Result<T> = std::result::Result<T, AmiError>;
