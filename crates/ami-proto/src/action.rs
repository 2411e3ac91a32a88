//! Outbound action builders.

use crate::message::{Message, ACTION, ACTION_ID};

/// Default dialplan context for originated calls.
pub const DEFAULT_CONTEXT: &str = "from-internal";
/// Default caller ID for originated calls.
pub const DEFAULT_CALLER_ID: &str = "AMI Bridge";
/// Ring timeout sent with `Originate`, in milliseconds.
pub const DEFAULT_ORIGINATE_TIMEOUT_MS: u64 = 30_000;

/// An outbound AMI action without its correlation identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    name: String,
    fields: Message,
}

impl Action {
    /// New action with no extra fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Message::new(),
        }
    }

    /// Add a field.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key, value);
        self
    }

    /// Action name (`Login`, `Originate`, ...).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extra fields, excluding `Action` and `ActionID`.
    pub fn fields(&self) -> &Message {
        &self.fields
    }

    /// Render the wire message: `Action` first, then fields, then `ActionID`.
    ///
    /// A caller-supplied `ActionID` field is overwritten.
    pub fn into_message(self, action_id: &str) -> Message {
        let mut msg = Message::new().with(ACTION, self.name);
        for (k, v) in self.fields.fields() {
            if k != ACTION && k != ACTION_ID {
                msg.insert(k, v);
            }
        }
        msg.insert(ACTION_ID, action_id);
        msg
    }

    /// `Login` with optional event delivery.
    pub fn login(username: &str, secret: &str, events: bool) -> Self {
        Self::new("Login")
            .field("Username", username)
            .field("Secret", secret)
            .field("Events", if events { "on" } else { "off" })
    }

    /// `Logoff`.
    pub fn logoff() -> Self {
        Self::new("Logoff")
    }

    /// `Ping`.
    pub fn ping() -> Self {
        Self::new("Ping")
    }

    /// `Status` (active channels).
    pub fn status() -> Self {
        Self::new("Status")
    }

    /// `PJSIPShowEndpoints` (answered by `EndpointList` events).
    pub fn pjsip_show_endpoints() -> Self {
        Self::new("PJSIPShowEndpoints")
    }
}

/// Parameters for an `Originate` action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Originate {
    /// Channel to dial first, e.g. `PJSIP/1000`.
    pub channel: String,
    /// Extension to connect the answered channel to.
    pub extension: String,
    /// Dialplan context.
    pub context: String,
    /// Caller ID presented on the call.
    pub caller_id: String,
    /// Dialplan priority.
    pub priority: u32,
    /// Ring timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Originate {
    /// Originate with default context, caller ID and timeout.
    pub fn new(channel: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            extension: extension.into(),
            context: DEFAULT_CONTEXT.into(),
            caller_id: DEFAULT_CALLER_ID.into(),
            priority: 1,
            timeout_ms: DEFAULT_ORIGINATE_TIMEOUT_MS,
        }
    }
}

impl From<Originate> for Action {
    fn from(o: Originate) -> Self {
        Action::new("Originate")
            .field("Channel", o.channel)
            .field("Exten", o.extension)
            .field("Context", o.context)
            .field("Priority", o.priority.to_string())
            .field("CallerID", o.caller_id)
            .field("Timeout", o.timeout_ms.to_string())
            .field("Async", "true")
    }
}
