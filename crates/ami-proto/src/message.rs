//! Decoded AMI message.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Field carrying the action name on outbound requests.
pub const ACTION: &str = "Action";
/// Field carrying the correlation identifier.
pub const ACTION_ID: &str = "ActionID";
/// Field present on unsolicited events.
pub const EVENT: &str = "Event";
/// Field present on replies to actions.
pub const RESPONSE: &str = "Response";
/// Human-readable text attached to most responses.
pub const MESSAGE: &str = "Message";

/// Value of the `Response` field for a successful action.
pub const SUCCESS: &str = "Success";

/// Classification of a decoded message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Reply to an action, carrying an `ActionID`.
    Response,
    /// Unsolicited event pushed by the server.
    Event,
    /// Neither of the above (blank blocks, greeting fragments, ...).
    Unclassified,
}

impl MessageKind {
    /// Stable lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Response => "response",
            Self::Event => "event",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered set of `Key: Value` fields.
///
/// Keys are case-sensitive. Inserting an existing key replaces its value
/// in place, so the first-seen order is what serializes and logs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    fields: Vec<(String, String)>,
}

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key, value));
        }
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a field value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the field is present.
    pub fn contains(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(idx).1)
    }

    /// Iterate fields in order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the message has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `ActionID` field.
    pub fn action_id(&self) -> Option<&str> {
        self.get(ACTION_ID)
    }

    /// The `Event` field.
    pub fn event_name(&self) -> Option<&str> {
        self.get(EVENT)
    }

    /// The `Response` field.
    pub fn response(&self) -> Option<&str> {
        self.get(RESPONSE)
    }

    /// The `Message` field, or an empty string.
    pub fn text(&self) -> &str {
        self.get(MESSAGE).unwrap_or_default()
    }

    /// Whether this is a `Response: Success`.
    pub fn is_success(&self) -> bool {
        self.response() == Some(SUCCESS)
    }

    /// Classify the message.
    ///
    /// `Event` wins over `Response`: an event that happens to carry an
    /// `ActionID` is still an event.
    pub fn kind(&self) -> MessageKind {
        if self.contains(EVENT) {
            MessageKind::Event
        } else if self.contains(RESPONSE) && self.contains(ACTION_ID) {
            MessageKind::Response
        } else {
            MessageKind::Unclassified
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Message
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut msg = Self::new();
        for (k, v) in iter {
            msg.insert(k, v);
        }
        msg
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_preserves_order() {
        let msg = Message::new().with("B", "2").with("A", "1").with("C", "3");
        let keys: Vec<_> = msg.fields().map(|(k, _)| k).collect();
        assert_eq!(keys, ["B", "A", "C"]);
    }

    #[test]
    fn insert_replaces_in_place() {
        let msg = Message::new().with("A", "1").with("B", "2").with("A", "9");
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.get("A"), Some("9"));
        assert_eq!(msg.fields().next(), Some(("A", "9")));
    }

    #[test]
    fn keys_are_case_sensitive() {
        let msg = Message::new().with("ActionID", "1");
        assert_eq!(msg.get("actionid"), None);
        assert_eq!(msg.action_id(), Some("1"));
    }

    #[test]
    fn response_with_action_id_is_response() {
        let msg = Message::new().with("Response", "Success").with("ActionID", "4");
        assert_eq!(msg.kind(), MessageKind::Response);
        assert!(msg.is_success());
    }

    #[test]
    fn response_without_action_id_is_unclassified() {
        let msg = Message::new().with("Response", "Success");
        assert_eq!(msg.kind(), MessageKind::Unclassified);
    }

    #[test]
    fn event_wins_over_response() {
        let msg = Message::new()
            .with("Event", "EndpointList")
            .with("Response", "Success")
            .with("ActionID", "7");
        assert_eq!(msg.kind(), MessageKind::Event);
    }

    #[test]
    fn empty_message_is_unclassified() {
        assert_eq!(Message::new().kind(), MessageKind::Unclassified);
    }

    #[test]
    fn error_response_is_not_success() {
        let msg = Message::new()
            .with("Response", "Error")
            .with("ActionID", "1")
            .with("Message", "Authentication failed");
        assert!(!msg.is_success());
        assert_eq!(msg.text(), "Authentication failed");
    }

    #[test]
    fn remove_field() {
        let mut msg = Message::new().with("A", "1").with("B", "2");
        assert_eq!(msg.remove("A").as_deref(), Some("1"));
        assert_eq!(msg.remove("A"), None);
        assert_eq!(msg.len(), 1);
    }

    #[test]
    fn serializes_as_object() {
        let msg = Message::new().with("Event", "Hangup").with("Channel", "PJSIP/1000-0001");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["Event"], "Hangup");
        assert_eq!(json["Channel"], "PJSIP/1000-0001");
    }

    #[test]
    fn collect_from_pairs() {
        let msg: Message = [("Action", "Ping"), ("ActionID", "3")].into_iter().collect();
        assert_eq!(msg.get("Action"), Some("Ping"));
        assert_eq!(msg.action_id(), Some("3"));
    }
}
