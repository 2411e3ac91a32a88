//! Scoped collection of list-style action results.
//!
//! Actions such as `PJSIPShowEndpoints` answer with a `Response: Success`
//! followed by one event per item and a terminating "complete" event, all
//! tagged with the action's `ActionID`.

use ami_proto::Message;

/// Event names bounding a list result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListSpec {
    /// Event carrying one item.
    pub item_event: String,
    /// Event marking the end of the list.
    pub complete_event: String,
}

impl ListSpec {
    /// Custom item/complete event pair.
    pub fn new(item_event: impl Into<String>, complete_event: impl Into<String>) -> Self {
        Self {
            item_event: item_event.into(),
            complete_event: complete_event.into(),
        }
    }

    /// `EndpointList` items terminated by `EndpointListComplete`.
    pub fn pjsip_endpoints() -> Self {
        Self::new("EndpointList", "EndpointListComplete")
    }
}

/// Whether a collector has seen its terminating event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ListProgress {
    Pending,
    Complete,
}

/// Accumulates the items of one list action.
#[derive(Debug)]
pub(crate) struct ListCollector {
    action_id: String,
    spec: ListSpec,
    active: bool,
    items: Vec<Message>,
}

impl ListCollector {
    pub(crate) fn new(action_id: impl Into<String>, spec: ListSpec) -> Self {
        Self {
            action_id: action_id.into(),
            spec,
            active: false,
            items: Vec::new(),
        }
    }

    /// Start accepting items. Called once the Success response is seen.
    pub(crate) fn activate(&mut self) {
        self.active = true;
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Offer an event to the collector.
    pub(crate) fn observe(&mut self, event: &Message) -> ListProgress {
        if !self.active {
            return ListProgress::Pending;
        }
        if event.action_id().is_some_and(|id| id != self.action_id) {
            return ListProgress::Pending;
        }
        match event.event_name() {
            Some(name) if name == self.spec.item_event => {
                self.items.push(event.clone());
                ListProgress::Pending
            }
            Some(name) if name == self.spec.complete_event => ListProgress::Complete,
            _ => ListProgress::Pending,
        }
    }

    pub(crate) fn into_items(self) -> Vec<Message> {
        self.items
    }
}
