//! Observers notified of link lifecycle changes and worker events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::error::LinkError;
use crate::state::ConnectionState;

const OBSERVER_TARGET: &str = "tether_host::observer";

/// Receives state transitions, worker events, and link errors.
///
/// Callbacks run on the supervisor's control or reader threads with no
/// internal locks held. Implementations must not block for long; a slow
/// observer delays liveness handling for the whole link.
///
/// No callback may call `Supervisor::start` or `Supervisor::stop`. State
/// and error callbacks run on the control thread, which those calls wait on.
/// Event callbacks run on the worker's stdout reader thread, which the
/// control thread joins while tearing the worker down. Either way the call
/// deadlocks; hand the request to another thread instead.
pub trait LinkObserver: Send + Sync {
    /// Invoked for every state transition, on the control thread.
    fn state_changed(&self, previous: ConnectionState, current: ConnectionState);

    /// Invoked for each application notification emitted by the worker, on
    /// the stdout reader thread.
    ///
    /// Calling `Supervisor::stop` from here never returns: the control thread
    /// waits to join this very thread.
    fn event(&self, method: &str, params: Option<&Value>);

    /// Invoked when the link fails to spawn or loses its worker.
    fn link_error(&self, _error: &LinkError) {}
}

impl<T> LinkObserver for Arc<T>
where
    T: LinkObserver + ?Sized,
{
    fn state_changed(&self, previous: ConnectionState, current: ConnectionState) {
        (**self).state_changed(previous, current);
    }

    fn event(&self, method: &str, params: Option<&Value>) {
        (**self).event(method, params);
    }

    fn link_error(&self, error: &LinkError) {
        (**self).link_error(error);
    }
}

/// Default observer that records link activity using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLinkObserver;

impl StructuredLinkObserver {
    /// Builds a new observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LinkObserver for StructuredLinkObserver {
    fn state_changed(&self, previous: ConnectionState, current: ConnectionState) {
        tracing::info!(
            target: OBSERVER_TARGET,
            event = "state_changed",
            previous = %previous,
            current = %current,
            "link state changed"
        );
    }

    fn event(&self, method: &str, params: Option<&Value>) {
        tracing::debug!(
            target: OBSERVER_TARGET,
            event = "worker_event",
            method,
            params = ?params,
            "worker event received"
        );
    }

    fn link_error(&self, error: &LinkError) {
        tracing::warn!(
            target: OBSERVER_TARGET,
            event = "link_error",
            error = %error,
            "link error"
        );
    }
}

/// Token returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Entry = (ObserverId, Arc<dyn LinkObserver>);

/// Subscriber list shared by the control and reader threads.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<Vec<Entry>>,
}

impl ObserverRegistry {
    fn observers(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self, observer: Arc<dyn LinkObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers().push((id, observer));
        id
    }

    pub(crate) fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers();
        let before = observers.len();
        observers.retain(|(candidate, _)| *candidate != id);
        observers.len() != before
    }

    /// Clones the list so callbacks run without the lock held.
    fn snapshot(&self) -> Vec<Arc<dyn LinkObserver>> {
        self.observers()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    pub(crate) fn notify_state(&self, previous: ConnectionState, current: ConnectionState) {
        for observer in self.snapshot() {
            observer.state_changed(previous, current);
        }
    }

    pub(crate) fn notify_event(&self, method: &str, params: Option<&Value>) {
        for observer in self.snapshot() {
            observer.event(method, params);
        }
    }

    pub(crate) fn notify_error(&self, error: &LinkError) {
        for observer in self.snapshot() {
            observer.link_error(error);
        }
    }
}
