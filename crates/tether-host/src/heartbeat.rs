//! Worker liveness tracking.
//!
//! The reader thread touches a shared [`LivenessHandle`] for every well-formed
//! line it receives; the control thread owns the [`HeartbeatMonitor`] and asks
//! it whether the silence since the last touch exceeds the timeout. Any
//! message counts as a liveness signal, not only `heartbeat` notifications.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Cloneable handle used to report liveness.
#[derive(Debug, Clone)]
pub struct LivenessHandle {
    last_seen: Arc<Mutex<Instant>>,
}

impl LivenessHandle {
    fn new(now: Instant) -> Self {
        Self {
            last_seen: Arc::new(Mutex::new(now)),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Instant> {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a liveness signal now.
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    /// Records a liveness signal at `now`.
    pub fn touch_at(&self, now: Instant) {
        let mut slot = self.slot();
        if now > *slot {
            *slot = now;
        }
    }

    /// Instant of the most recent signal.
    #[must_use]
    pub fn last_seen(&self) -> Instant {
        *self.slot()
    }
}

/// Result of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The monitor is not armed.
    Disarmed,
    /// A signal arrived within the timeout.
    Alive,
    /// The worker has been silent for at least the timeout.
    Expired {
        /// Silence observed at check time.
        silence: Duration,
    },
}

/// Deadline tracker for one worker incarnation.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    liveness: LivenessHandle,
    armed: bool,
}

impl HeartbeatMonitor {
    /// Creates a disarmed monitor.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            liveness: LivenessHandle::new(Instant::now()),
            armed: false,
        }
    }

    /// Handle the reader thread uses to report liveness.
    #[must_use]
    pub fn handle(&self) -> LivenessHandle {
        self.liveness.clone()
    }

    /// Starts enforcing the timeout from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.liveness.touch_at(now);
        self.armed = true;
    }

    /// Stops enforcing the timeout.
    pub const fn disarm(&mut self) {
        self.armed = false;
    }

    /// Returns `true` while the timeout is enforced.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Instant at which the worker will be considered dead.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.armed.then(|| self.liveness.last_seen() + self.timeout)
    }

    /// Checks liveness at `now`.
    #[must_use]
    pub fn check(&self, now: Instant) -> Liveness {
        if !self.armed {
            return Liveness::Disarmed;
        }
        let silence = now.saturating_duration_since(self.liveness.last_seen());
        if silence >= self.timeout {
            Liveness::Expired { silence }
        } else {
            Liveness::Alive
        }
    }
}
