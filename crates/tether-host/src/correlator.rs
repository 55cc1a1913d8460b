//! Matching of worker responses to pending calls.
//!
//! Each outbound request registers a [`PendingCall`] keyed by its id. The call
//! settles exactly once: by a matching response, by its deadline, or by a
//! bulk rejection when the connection is lost. Whichever path removes the
//! entry from the table settles it; every other path finds nothing and
//! becomes a no-op.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tether_protocol::Response;
use tracing::{debug, trace};

use crate::error::LinkError;

const CORRELATOR_TARGET: &str = "tether_host::correlator";

type Outcome = Result<Value, LinkError>;

struct PendingCall {
    method: String,
    created_at: Instant,
    deadline: Instant,
    reply: SyncSender<Outcome>,
}

impl PendingCall {
    fn settle(self, outcome: Outcome) {
        if self.reply.send(outcome).is_err() {
            trace!(
                target: CORRELATOR_TARGET,
                method = %self.method,
                "caller dropped its reply handle"
            );
        }
    }
}

/// Table of in-flight calls awaiting a response.
pub struct CallCorrelator {
    timeout: Duration,
    table: Mutex<HashMap<i64, PendingCall>>,
}

impl CallCorrelator {
    /// Creates an empty correlator applying `timeout` to every call.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            table: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<i64, PendingCall>> {
        self.table
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Per-call deadline applied at registration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers a call and returns the handle its caller waits on.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::DuplicateId`] if `id` is already pending.
    pub fn register(self: &Arc<Self>, id: i64, method: &str) -> Result<PendingReply, LinkError> {
        self.register_at(id, method, Instant::now())
    }

    /// Registers a call created at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::DuplicateId`] if `id` is already pending.
    pub fn register_at(
        self: &Arc<Self>,
        id: i64,
        method: &str,
        now: Instant,
    ) -> Result<PendingReply, LinkError> {
        let deadline = now + self.timeout;
        let (reply, receiver) = mpsc::sync_channel(1);
        {
            let mut table = self.table();
            if table.contains_key(&id) {
                return Err(LinkError::DuplicateId { id });
            }
            table.insert(
                id,
                PendingCall {
                    method: method.to_owned(),
                    created_at: now,
                    deadline,
                    reply,
                },
            );
        }
        Ok(PendingReply {
            id,
            method: method.to_owned(),
            deadline,
            receiver,
            correlator: Arc::clone(self),
        })
    }

    /// Settles the call matching `response.id`.
    ///
    /// Returns `false` for unknown or already settled ids; such responses are
    /// late arrivals and are dropped.
    pub fn handle_response(&self, response: Response) -> bool {
        let mut table = self.table();
        let Some(call) = table.remove(&response.id) else {
            debug!(
                target: CORRELATOR_TARGET,
                id = response.id,
                "dropping response for unknown or settled call"
            );
            return false;
        };
        debug!(
            target: CORRELATOR_TARGET,
            id = response.id,
            method = %call.method,
            elapsed_ms =
                u64::try_from(call.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "call settled"
        );
        // Settling under the lock keeps a racing timeout from observing an
        // empty table before the value is in the channel.
        call.settle(response.into_result().map_err(LinkError::from_rpc));
        true
    }

    /// Settles one call with `error`, returning whether it was pending.
    pub fn fail(&self, id: i64, error: LinkError) -> bool {
        let mut table = self.table();
        let Some(call) = table.remove(&id) else {
            return false;
        };
        call.settle(Err(error));
        true
    }

    /// Rejects every pending call with a clone of `reason`.
    ///
    /// Returns the number of calls rejected; a second invocation with an
    /// empty table rejects nothing.
    pub fn reject_all(&self, reason: &LinkError) -> usize {
        let mut table = self.table();
        let rejected = table.len();
        for (_, call) in table.drain() {
            call.settle(Err(reason.clone()));
        }
        rejected
    }

    /// Times out every call whose deadline is at or before `now`.
    pub fn expire_due(&self, now: Instant) -> usize {
        let mut table = self.table();
        let due: Vec<i64> = table
            .iter()
            .filter(|(_, call)| call.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            if let Some(call) = table.remove(id) {
                let error = LinkError::timeout(*id, &call.method, self.timeout);
                call.settle(Err(error));
            }
        }
        due.len()
    }

    fn expire(&self, id: i64) {
        let mut table = self.table();
        if let Some(call) = table.remove(&id) {
            let error = LinkError::timeout(id, &call.method, self.timeout);
            call.settle(Err(error));
        }
    }

    /// Earliest deadline among pending calls.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.table().values().map(|call| call.deadline).min()
    }

    /// Returns `true` if `id` is still pending.
    #[must_use]
    pub fn contains(&self, id: i64) -> bool {
        self.table().contains_key(&id)
    }

    /// Number of pending calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Returns `true` when no calls are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

/// Caller-side handle for one pending call.
pub struct PendingReply {
    id: i64,
    method: String,
    deadline: Instant,
    receiver: Receiver<Outcome>,
    correlator: Arc<CallCorrelator>,
}

impl PendingReply {
    /// Correlation id of the call.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Method of the call.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Instant after which the call times out.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Blocks until the call settles.
    ///
    /// # Errors
    ///
    /// Returns the worker's application error, a timeout, or the rejection
    /// applied when the connection ended.
    pub fn wait(self) -> Result<Value, LinkError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        match self.receiver.recv_timeout(remaining) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                self.correlator.expire(self.id);
                match self.receiver.try_recv() {
                    Ok(outcome) => outcome,
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => Err(
                        LinkError::timeout(self.id, &self.method, self.correlator.timeout()),
                    ),
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Shutdown),
        }
    }

    /// Returns the outcome if the call has already settled.
    pub fn try_wait(&self) -> Option<Result<Value, LinkError>> {
        self.receiver.try_recv().ok()
    }
}
