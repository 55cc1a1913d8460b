//! Public handle for a supervised worker link.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::control::{Control, ControlLoop, SUPERVISOR_TARGET, Shared};
use crate::correlator::PendingReply;
use crate::error::LinkError;
use crate::observer::{LinkObserver, ObserverId};
use crate::settings::LinkSettings;
use crate::state::ConnectionState;

/// Spawns, monitors, and restarts one worker, multiplexing calls over it.
///
/// The supervisor starts in [`ConnectionState::Disconnected`]; nothing is
/// spawned until [`Supervisor::start`] is called. Dropping the supervisor
/// stops the worker and rejects every pending call with
/// [`LinkError::Shutdown`].
///
/// # Example
///
/// ```ignore
/// use serde_json::json;
/// use tether_host::{LinkSettings, Supervisor, WorkerCommand};
///
/// let supervisor = Supervisor::new(LinkSettings::new(WorkerCommand::new("tether-worker")))?;
/// supervisor.start()?;
/// let result = supervisor.call("dial", Some(json!({"number": "123"})))?;
/// ```
pub struct Supervisor {
    shared: Arc<Shared>,
    control: Sender<Control>,
    thread: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Creates a supervisor and its control thread.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Spawn`] if the control thread cannot be started.
    pub fn new(settings: LinkSettings) -> Result<Self, LinkError> {
        let shared = Arc::new(Shared::new(settings));
        let (control, inbox) = mpsc::channel();
        let control_loop = ControlLoop::new(Arc::clone(&shared), inbox, control.clone());
        let thread = thread::Builder::new()
            .name(String::from("tether-supervisor"))
            .spawn(move || control_loop.run())
            .map_err(|error| LinkError::Spawn {
                message: String::from("failed to start supervisor thread"),
                source: Arc::new(error),
            })?;
        Ok(Self {
            shared,
            control,
            thread: Some(thread),
        })
    }

    /// Settings the supervisor was created with.
    #[must_use]
    pub fn settings(&self) -> &LinkSettings {
        &self.shared.settings
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Blocks until the link reaches `target` or `timeout` elapses.
    ///
    /// Returns `true` if the state equals `target` on return.
    #[must_use]
    pub fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        self.shared.state.wait_for(target, timeout)
    }

    /// Spawns the worker unless one is already starting, running, or
    /// scheduled to restart.
    ///
    /// Returns once the process is spawned, not once it is ready; use
    /// [`Supervisor::wait_for_state`] or an observer to learn of readiness.
    ///
    /// # Errors
    ///
    /// Returns the spawn failure, or [`LinkError::ControlUnavailable`] if the
    /// control thread has exited.
    pub fn start(&self) -> Result<(), LinkError> {
        self.request_start(false)
    }

    /// Clears the restart ledger, then behaves like [`Supervisor::start`].
    ///
    /// # Errors
    ///
    /// See [`Supervisor::start`].
    pub fn start_with_fresh_budget(&self) -> Result<(), LinkError> {
        self.request_start(true)
    }

    fn request_start(&self, fresh_budget: bool) -> Result<(), LinkError> {
        let (reply, outcome) = mpsc::channel();
        self.control
            .send(Control::Start {
                fresh_budget,
                reply,
            })
            .map_err(|_| LinkError::ControlUnavailable)?;
        outcome.recv().map_err(|_| LinkError::ControlUnavailable)?
    }

    /// Asks the worker to exit, kills it if it lingers, and rejects all
    /// pending calls with [`LinkError::Shutdown`].
    ///
    /// Blocks until the worker is gone. Cancels any scheduled restart.
    pub fn stop(&self) {
        let (reply, done) = mpsc::channel();
        if self.control.send(Control::Stop { reply }).is_err() || done.recv().is_err() {
            debug!(target: SUPERVISOR_TARGET, "stop requested after control thread exit");
        }
    }

    /// Sends a request and returns a handle that settles with its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::NotConnected`] unless the link is connected,
    /// [`LinkError::Codec`] if `params` cannot be encoded, or
    /// [`LinkError::Transport`] if the write to the worker fails.
    pub fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<PendingReply, LinkError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(LinkError::NotConnected { state });
        }

        let encoded = self.shared.ids.serialize_request(method, params)?;
        let reply = self.shared.correlator.register(encoded.id, method)?;
        if let Err(write_error) = self.shared.write_line(&encoded.line) {
            self.shared.correlator.fail(encoded.id, write_error.clone());
            return Err(write_error);
        }
        debug!(
            target: SUPERVISOR_TARGET,
            id = encoded.id,
            method,
            "request sent"
        );
        Ok(reply)
    }

    /// Sends a request and blocks until it settles.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Supervisor::send_request`] or
    /// [`PendingReply::wait`].
    pub fn call(&self, method: &str, params: Option<Value>) -> Result<Value, LinkError> {
        self.send_request(method, params)?.wait()
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.shared.correlator.len()
    }

    /// Registers an observer for state changes, events, and errors.
    pub fn subscribe(&self, observer: Arc<dyn LinkObserver>) -> ObserverId {
        self.shared.observers.subscribe(observer)
    }

    /// Removes an observer; returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.shared.observers.unsubscribe(id)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.control.send(Control::Shutdown).is_err() {
            debug!(target: SUPERVISOR_TARGET, "control thread already gone");
        }
        let Some(handle) = self.thread.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(target: SUPERVISOR_TARGET, "control thread panicked");
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .finish_non_exhaustive()
    }
}
