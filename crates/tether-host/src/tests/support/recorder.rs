//! Test double for [`LinkObserver`] that records callbacks for assertions.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::error::{DisconnectReason, LinkError};
use crate::observer::LinkObserver;
use crate::state::ConnectionState;

/// Callbacks captured during a scenario.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A state transition.
    State(ConnectionState, ConnectionState),
    /// An application notification.
    Event(String, Option<Value>),
    /// A loss of the worker.
    Lost(DisconnectReason),
    /// Any other link error, rendered.
    Error(String),
}

/// Records observer callbacks in arrival order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<LinkEvent>>,
    event_threads: Mutex<Vec<Option<String>>>,
    changed: Condvar,
}

impl RecordingObserver {
    fn record(&self, event: LinkEvent) {
        self.events
            .lock()
            .expect("recorder mutex poisoned")
            .push(event);
        self.changed.notify_all();
    }

    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<LinkEvent> {
        self.events.lock().expect("recorder mutex poisoned").clone()
    }

    /// Waits until `predicate` holds for the recorded events.
    pub fn wait_until(&self, timeout: Duration, predicate: impl Fn(&[LinkEvent]) -> bool) -> bool {
        let guard = self.events.lock().expect("recorder mutex poisoned");
        let (events, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |events| !predicate(events))
            .expect("recorder mutex poisoned");
        predicate(&events)
    }

    /// Number of transitions into `state`.
    pub fn entries_into(&self, state: ConnectionState) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, LinkEvent::State(_, current) if *current == state))
            .count()
    }

    /// Disconnect reasons observed so far.
    pub fn losses(&self) -> Vec<DisconnectReason> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LinkEvent::Lost(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    /// Names of the threads that delivered application events.
    pub fn event_threads(&self) -> Vec<Option<String>> {
        self.event_threads
            .lock()
            .expect("recorder mutex poisoned")
            .clone()
    }

    /// Application event names observed so far.
    pub fn event_names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LinkEvent::Event(method, _) => Some(method),
                _ => None,
            })
            .collect()
    }
}

impl LinkObserver for RecordingObserver {
    fn state_changed(&self, previous: ConnectionState, current: ConnectionState) {
        self.record(LinkEvent::State(previous, current));
    }

    fn event(&self, method: &str, params: Option<&Value>) {
        self.event_threads
            .lock()
            .expect("recorder mutex poisoned")
            .push(std::thread::current().name().map(str::to_owned));
        self.record(LinkEvent::Event(method.to_owned(), params.cloned()));
    }

    fn link_error(&self, error: &LinkError) {
        match error {
            LinkError::Disconnected { reason } => self.record(LinkEvent::Lost(reason.clone())),
            other => self.record(LinkEvent::Error(other.to_string())),
        }
    }
}
