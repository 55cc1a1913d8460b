//! Event subscriptions owned by the dispatch thread.
//!
//! An event source (often a callback registered with a native layer) keeps an
//! [`EventSink`] for as long as it may fire. The registry owns the only strong
//! reference to each subscription slot, so releasing a subscription makes
//! every outstanding sink inert at once and the release happens exactly once.

use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dispatch::WorkItem;
use crate::surface::RaisedEvent;

const REGISTRY_TARGET: &str = "tether_worker::registry";

/// Identifier of one subscription, unique for the worker's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Rebuilds an id received from the host.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Numeric value sent on the wire.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct Slot {
    topic: String,
}

/// Live subscriptions keyed by id.
pub struct SubscriptionRegistry {
    next_id: u64,
    slots: HashMap<SubscriptionId, Arc<Slot>>,
    queue: Sender<WorkItem>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(queue: Sender<WorkItem>) -> Self {
        Self {
            next_id: 1,
            slots: HashMap::new(),
            queue,
        }
    }

    /// Opens a subscription for `topic`.
    pub fn subscribe(&mut self, topic: &str) -> EventSink {
        let id = SubscriptionId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        let slot = Arc::new(Slot {
            topic: topic.to_owned(),
        });
        let sink = EventSink {
            id,
            slot: Arc::downgrade(&slot),
            queue: self.queue.clone(),
        };
        self.slots.insert(id, slot);
        debug!(target: REGISTRY_TARGET, subscription = %id, topic, "subscription opened");
        sink
    }

    /// Releases a subscription.
    ///
    /// Returns `false` when `id` is unknown or already released.
    pub fn release(&mut self, id: SubscriptionId) -> bool {
        let Some(slot) = self.slots.remove(&id) else {
            return false;
        };
        debug!(
            target: REGISTRY_TARGET,
            subscription = %id,
            topic = slot.topic.as_str(),
            "subscription released"
        );
        true
    }

    /// Releases every subscription and returns how many were live.
    pub fn release_all(&mut self) -> usize {
        let released = self.slots.len();
        self.slots.clear();
        released
    }

    /// Returns `true` while `id` has not been released.
    #[must_use]
    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Topic the subscription was opened for.
    #[must_use]
    pub fn topic(&self, id: SubscriptionId) -> Option<&str> {
        self.slots.get(&id).map(|slot| slot.topic.as_str())
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when no subscription is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("live", &self.slots.len())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

/// Handle an event source uses to raise events from any thread.
///
/// Raised events are queued for the dispatch thread, which lets the
/// automation surface apply them before any notification is written.
#[derive(Clone)]
pub struct EventSink {
    id: SubscriptionId,
    slot: Weak<Slot>,
    queue: Sender<WorkItem>,
}

impl EventSink {
    /// Subscription this sink belongs to.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns `true` until the subscription is released.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.slot.strong_count() > 0
    }

    /// Queues an event for the dispatch thread.
    ///
    /// Returns `false` once the subscription is released or the dispatch
    /// loop has stopped; the event source should then stop raising.
    pub fn raise(&self, method: &str, params: Option<Value>) -> bool {
        if !self.is_active() {
            return false;
        }
        let event = RaisedEvent {
            subscription: self.id,
            method: method.to_owned(),
            params,
        };
        self.queue.send(WorkItem::Event(event)).is_ok()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
