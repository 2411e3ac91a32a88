//! Matches inbound responses to in-flight actions.
//!
//! Owned by the connection task; nothing here is shared. Each pending
//! action carries its own timer task which, on expiry, posts an [`Expiry`]
//! back to the owner rather than touching the table itself, so resolution,
//! expiry and teardown are all serialized on one task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ami_proto::{Message, MessageKind};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{AmiError, Result};
use crate::listing::{ListCollector, ListProgress, ListSpec};

pub(crate) type Responder<T> = oneshot::Sender<Result<T>>;

/// Timer notification for an action identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Expiry {
    Action(String),
    List(String),
}

/// What the correlator did with an inbound message.
#[derive(Debug)]
pub(crate) enum Routed {
    /// Unsolicited event for the fan-out.
    Event(Arc<Message>),
    /// A pending action or list was resolved or advanced.
    Resolved,
    /// Response for an identifier nobody is waiting on.
    Unmatched,
    /// Neither a response nor an event.
    Unclassified,
}

struct PendingAction {
    respond_to: Responder<Message>,
    created: Instant,
    timeout: Duration,
    timer: JoinHandle<()>,
}

struct PendingList {
    collector: ListCollector,
    respond_to: Responder<Vec<Message>>,
    timer: JoinHandle<()>,
}

pub(crate) struct Correlator {
    pending: HashMap<String, PendingAction>,
    lists: HashMap<String, PendingList>,
    expiry_tx: mpsc::UnboundedSender<Expiry>,
}

impl Correlator {
    pub(crate) fn new(expiry_tx: mpsc::UnboundedSender<Expiry>) -> Self {
        Self {
            pending: HashMap::new(),
            lists: HashMap::new(),
            expiry_tx,
        }
    }

    /// Number of in-flight actions and list collections.
    pub(crate) fn in_flight(&self) -> usize {
        self.pending.len() + self.lists.len()
    }

    /// Track an action awaiting a single response.
    pub(crate) fn register(
        &mut self,
        action_id: String,
        respond_to: Responder<Message>,
        timeout: Duration,
    ) {
        let timer = self.arm(Expiry::Action(action_id.clone()), timeout);
        let previous = self.pending.insert(
            action_id,
            PendingAction {
                respond_to,
                created: Instant::now(),
                timeout,
                timer,
            },
        );
        debug_assert!(previous.is_none(), "action identifiers are never reused");
    }

    /// Track a list action; resolves on its complete event or on timeout.
    pub(crate) fn register_list(
        &mut self,
        action_id: String,
        spec: ListSpec,
        respond_to: Responder<Vec<Message>>,
        timeout: Duration,
    ) {
        let timer = self.arm(Expiry::List(action_id.clone()), timeout);
        let collector = ListCollector::new(action_id.clone(), spec);
        let _ = self.lists.insert(
            action_id,
            PendingList {
                collector,
                respond_to,
                timer,
            },
        );
    }

    fn arm(&self, expiry: Expiry, timeout: Duration) -> JoinHandle<()> {
        let tx = self.expiry_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(expiry);
        })
    }

    /// Classify and dispatch one inbound message.
    pub(crate) fn route(&mut self, msg: Message) -> Routed {
        match msg.kind() {
            MessageKind::Event => {
                self.feed_lists(&msg);
                Routed::Event(Arc::new(msg))
            }
            MessageKind::Response => self.resolve(msg),
            MessageKind::Unclassified => {
                debug!(fields = msg.len(), "unclassified message");
                Routed::Unclassified
            }
        }
    }

    fn resolve(&mut self, msg: Message) -> Routed {
        let Some(action_id) = msg.action_id().map(str::to_owned) else {
            return Routed::Unclassified;
        };

        if let Some(pending) = self.pending.remove(&action_id) {
            pending.timer.abort();
            debug!(
                action_id = %action_id,
                elapsed_ms = millis(pending.created.elapsed()),
                "action resolved"
            );
            metrics::counter!("ami_actions_resolved_total").increment(1);
            let _ = pending.respond_to.send(Ok(msg));
            return Routed::Resolved;
        }

        if let Some(list) = self.lists.get_mut(&action_id) {
            if msg.is_success() {
                list.collector.activate();
                return Routed::Resolved;
            }
            if let Some(list) = self.lists.remove(&action_id) {
                list.timer.abort();
                let _ = list.respond_to.send(Err(AmiError::ActionFailed {
                    response: msg.response().unwrap_or_default().to_owned(),
                    message: msg.text().to_owned(),
                }));
            }
            return Routed::Resolved;
        }

        warn!(action_id = %action_id, "response for unknown action, dropping");
        Routed::Unmatched
    }

    fn feed_lists(&mut self, event: &Message) {
        if self.lists.is_empty() {
            return;
        }
        let done: Vec<String> = self
            .lists
            .iter_mut()
            .filter_map(|(id, list)| {
                (list.collector.observe(event) == ListProgress::Complete).then(|| id.clone())
            })
            .collect();
        for id in done {
            if let Some(list) = self.lists.remove(&id) {
                list.timer.abort();
                debug!(action_id = %id, items = list.collector.len(), "list complete");
                let _ = list.respond_to.send(Ok(list.collector.into_items()));
            }
        }
    }

    /// Handle a timer firing. Stale expiries are ignored.
    pub(crate) fn expire(&mut self, expiry: Expiry) {
        match expiry {
            Expiry::Action(id) => {
                let Some(pending) = self.pending.remove(&id) else {
                    return;
                };
                let timeout_ms = millis(pending.timeout);
                warn!(action_id = %id, timeout_ms, "action timed out");
                metrics::counter!("ami_action_timeouts_total").increment(1);
                let _ = pending.respond_to.send(Err(AmiError::ActionTimeout {
                    action_id: id,
                    timeout_ms,
                }));
            }
            Expiry::List(id) => {
                let Some(list) = self.lists.remove(&id) else {
                    return;
                };
                warn!(
                    action_id = %id,
                    active = list.collector.is_active(),
                    items = list.collector.len(),
                    "list collection timed out, returning partial result"
                );
                let _ = list.respond_to.send(Ok(list.collector.into_items()));
            }
        }
    }

    /// Reject everything in flight with an error from `err`.
    pub(crate) fn fail_all(&mut self, err: impl Fn() -> AmiError) {
        let count = self.in_flight();
        for (_, pending) in self.pending.drain() {
            pending.timer.abort();
            let _ = pending.respond_to.send(Err(err()));
        }
        for (_, list) in self.lists.drain() {
            list.timer.abort();
            let _ = list.respond_to.send(Err(err()));
        }
        if count > 0 {
            debug!(count, "rejected in-flight actions");
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
