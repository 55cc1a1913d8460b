//! The supervisor's control thread.
//!
//! One thread owns the worker process, the heartbeat monitor, and the restart
//! ledger. Callers, the stdout reader, and timers all reach it through a
//! single channel, so every state transition is made by this thread alone and
//! the state machine never races with itself.

use std::io::Write;
use std::process::{ChildStdin, ExitStatus};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tether_protocol::{IdAllocator, Notification, ProtocolMessage, encode_line};
use tracing::{debug, error, info, warn};

use crate::correlator::CallCorrelator;
use crate::error::{DisconnectReason, LinkError};
use crate::heartbeat::{HeartbeatMonitor, Liveness};
use crate::observer::ObserverRegistry;
use crate::process::{ReaderContext, WorkerProcess, spawn_worker};
use crate::reconnect::ReconnectPolicy;
use crate::settings::LinkSettings;
use crate::state::ConnectionState;

/// Log target for supervisor operations.
pub(crate) const SUPERVISOR_TARGET: &str = "tether_host::supervisor";

/// Upper bound on how long the control thread sleeps between sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Grace given to a worker that was declared lost.
const LOSS_GRACE: Duration = Duration::from_millis(200);

/// Grace given to a worker asked to exit by `stop()`.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Messages accepted by the control thread.
pub(crate) enum Control {
    Start {
        fresh_budget: bool,
        reply: Sender<Result<(), LinkError>>,
    },
    Stop {
        reply: Sender<()>,
    },
    Ready {
        generation: u64,
    },
    WorkerLost {
        generation: u64,
        reason: DisconnectReason,
    },
    Shutdown,
}

/// Connection state with change notification for blocking waiters.
#[derive(Default)]
pub(crate) struct StateCell {
    state: Mutex<ConnectionState>,
    changed: Condvar,
}

impl StateCell {
    fn slot(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.slot()
    }

    fn replace(&self, next: ConnectionState) -> ConnectionState {
        let previous = std::mem::replace(&mut *self.slot(), next);
        self.changed.notify_all();
        previous
    }

    pub(crate) fn wait_for(&self, target: ConnectionState, timeout: Duration) -> bool {
        let (current, _) = self
            .changed
            .wait_timeout_while(self.slot(), timeout, |state| *state != target)
            .unwrap_or_else(PoisonError::into_inner);
        *current == target
    }
}

/// State shared between the public handle and the control thread.
pub(crate) struct Shared {
    pub(crate) settings: LinkSettings,
    pub(crate) state: StateCell,
    pub(crate) correlator: Arc<CallCorrelator>,
    pub(crate) observers: Arc<ObserverRegistry>,
    pub(crate) ids: IdAllocator,
    writer: Mutex<Option<ChildStdin>>,
}

impl Shared {
    pub(crate) fn new(settings: LinkSettings) -> Self {
        let correlator = Arc::new(CallCorrelator::new(settings.request_timeout));
        Self {
            settings,
            state: StateCell::default(),
            correlator,
            observers: Arc::new(ObserverRegistry::default()),
            ids: IdAllocator::new(),
            writer: Mutex::new(None),
        }
    }

    fn writer(&self) -> MutexGuard<'_, Option<ChildStdin>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes one framed line to the worker.
    ///
    /// The writer lock serialises whole lines so concurrent callers never
    /// interleave bytes on the wire.
    pub(crate) fn write_line(&self, line: &str) -> Result<(), LinkError> {
        let mut writer = self.writer();
        let Some(stdin) = writer.as_mut() else {
            return Err(LinkError::NotConnected {
                state: self.state.get(),
            });
        };
        stdin
            .write_all(line.as_bytes())
            .and_then(|()| stdin.flush())
            .map_err(|error| LinkError::transport("failed to write to worker", error))
    }

    fn install_writer(&self, stdin: ChildStdin) {
        *self.writer() = Some(stdin);
    }

    /// Drops the writer, closing the worker's stdin.
    fn close_writer(&self) {
        self.writer().take();
    }
}

pub(crate) struct ControlLoop {
    shared: Arc<Shared>,
    inbox: Receiver<Control>,
    outbox: Sender<Control>,
    generation: u64,
    worker: Option<WorkerProcess>,
    monitor: Option<HeartbeatMonitor>,
    policy: ReconnectPolicy,
    connected_at: Option<Instant>,
    startup_deadline: Option<Instant>,
    restart_at: Option<Instant>,
}

impl ControlLoop {
    pub(crate) fn new(
        shared: Arc<Shared>,
        inbox: Receiver<Control>,
        outbox: Sender<Control>,
    ) -> Self {
        let policy = ReconnectPolicy::new(
            shared.settings.max_restarts,
            shared.settings.restart_window,
        );
        Self {
            shared,
            inbox,
            outbox,
            generation: 0,
            worker: None,
            monitor: None,
            policy,
            connected_at: None,
            startup_deadline: None,
            restart_at: None,
        }
    }

    pub(crate) fn run(mut self) {
        loop {
            let now = Instant::now();
            let wait = self.next_wakeup(now).saturating_duration_since(now);
            match self.inbox.recv_timeout(wait) {
                Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(message) => self.handle(message),
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.tick(Instant::now());
        }
        self.stop();
        debug!(target: SUPERVISOR_TARGET, "control thread exiting");
    }

    fn handle(&mut self, message: Control) {
        match message {
            Control::Start {
                fresh_budget,
                reply,
            } => {
                let outcome = self.start(fresh_budget);
                if reply.send(outcome).is_err() {
                    debug!(target: SUPERVISOR_TARGET, "start caller went away");
                }
            }
            Control::Stop { reply } => {
                self.stop();
                if reply.send(()).is_err() {
                    debug!(target: SUPERVISOR_TARGET, "stop caller went away");
                }
            }
            Control::Ready { generation } => self.on_ready(generation),
            Control::WorkerLost { generation, reason } => {
                if generation == self.generation && self.worker.is_some() {
                    self.lose(&reason);
                } else {
                    debug!(
                        target: SUPERVISOR_TARGET,
                        generation,
                        current = self.generation,
                        "ignoring loss of a replaced worker"
                    );
                }
            }
            Control::Shutdown => {}
        }
    }

    fn next_wakeup(&self, now: Instant) -> Instant {
        [
            self.startup_deadline,
            self.monitor.as_ref().and_then(HeartbeatMonitor::deadline),
            self.restart_at,
            self.shared.correlator.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .fold(now + SWEEP_INTERVAL, Instant::min)
    }

    fn tick(&mut self, now: Instant) {
        let expired = self.shared.correlator.expire_due(now);
        if expired > 0 {
            debug!(target: SUPERVISOR_TARGET, expired, "expired abandoned calls");
        }

        if self.startup_deadline.is_some_and(|deadline| now >= deadline) {
            self.lose(&DisconnectReason::StartupTimeout);
            return;
        }

        let liveness = self
            .monitor
            .as_ref()
            .map_or(Liveness::Disarmed, |monitor| monitor.check(now));
        if let Liveness::Expired { silence } = liveness {
            let silence_ms = u64::try_from(silence.as_millis()).unwrap_or(u64::MAX);
            self.lose(&DisconnectReason::HeartbeatTimeout { silence_ms });
            return;
        }

        if self.restart_at.is_some_and(|at| now >= at) {
            self.restart_at = None;
            info!(
                target: SUPERVISOR_TARGET,
                restarts = self.policy.restart_count(),
                "restarting worker"
            );
            // A failed spawn has already been routed through `lose`.
            if self.spawn().is_err() {
                debug!(target: SUPERVISOR_TARGET, "restart attempt failed to spawn");
            }
        }
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.shared.state.replace(next);
        if previous == next {
            return;
        }
        info!(
            target: SUPERVISOR_TARGET,
            from = %previous,
            to = %next,
            generation = self.generation,
            "link state changed"
        );
        self.shared.observers.notify_state(previous, next);
    }

    fn start(&mut self, fresh_budget: bool) -> Result<(), LinkError> {
        if fresh_budget {
            self.policy.reset();
        }
        let state = self.shared.state.get();
        if state.is_active() {
            debug!(target: SUPERVISOR_TARGET, state = %state, "start ignored; link is active");
            return Ok(());
        }
        self.restart_at = None;
        self.spawn()
    }

    fn spawn(&mut self) -> Result<(), LinkError> {
        self.generation += 1;
        self.transition(ConnectionState::Starting);

        let monitor = HeartbeatMonitor::new(self.shared.settings.heartbeat_timeout);
        let context = ReaderContext {
            generation: self.generation,
            correlator: Arc::clone(&self.shared.correlator),
            observers: Arc::clone(&self.shared.observers),
            liveness: monitor.handle(),
            control: self.outbox.clone(),
        };

        match spawn_worker(&self.shared.settings, context) {
            Ok((worker, stdin)) => {
                self.shared.install_writer(stdin);
                self.worker = Some(worker);
                self.monitor = Some(monitor);
                self.startup_deadline = Some(Instant::now() + self.shared.settings.startup_timeout);
                Ok(())
            }
            Err(spawn_error) => {
                self.lose(&DisconnectReason::SpawnFailed(spawn_error.to_string()));
                Err(spawn_error)
            }
        }
    }

    fn on_ready(&mut self, generation: u64) {
        let state = self.shared.state.get();
        if generation != self.generation || state != ConnectionState::Starting {
            debug!(
                target: SUPERVISOR_TARGET,
                generation,
                state = %state,
                "ignoring stale readiness"
            );
            return;
        }

        let now = Instant::now();
        self.startup_deadline = None;
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.arm(now);
        }
        self.connected_at = Some(now);
        if self.shared.settings.stable_connection.is_zero() {
            self.policy.reset();
        }
        if let Some(worker) = &self.worker {
            info!(target: SUPERVISOR_TARGET, pid = worker.pid(), generation, "worker ready");
        }
        self.transition(ConnectionState::Connected);
    }

    /// Handles the death of the current worker, whatever its cause.
    ///
    /// The writer is closed and the state leaves `Connected` before any call
    /// is rejected.
    fn lose(&mut self, reason: &DisconnectReason) {
        let now = Instant::now();
        let uptime = self
            .connected_at
            .take()
            .map(|at| now.saturating_duration_since(at));
        self.startup_deadline = None;
        self.shared.close_writer();
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.disarm();
        }

        if uptime.is_some_and(|up| up >= self.shared.settings.stable_connection) {
            self.policy.reset();
        }
        let next = if self.policy.can_restart_at(now) {
            self.policy.record_restart_at(now);
            self.restart_at = Some(now + self.shared.settings.restart_backoff);
            ConnectionState::Restarting
        } else {
            error!(
                target: SUPERVISOR_TARGET,
                max_restarts = self.shared.settings.max_restarts,
                window_ms = u64::try_from(self.shared.settings.restart_window.as_millis())
                    .unwrap_or(u64::MAX),
                "restart budget exhausted"
            );
            ConnectionState::Failed
        };
        self.transition(next);

        let link_error = LinkError::Disconnected {
            reason: reason.clone(),
        };
        let rejected = self.shared.correlator.reject_all(&link_error);
        let status = self.teardown(LOSS_GRACE);
        warn!(
            target: SUPERVISOR_TARGET,
            generation = self.generation,
            reason = %reason,
            rejected,
            exit_status = ?status,
            "worker connection lost"
        );
        self.shared.observers.notify_error(&link_error);
    }

    fn teardown(&mut self, grace: Duration) -> Option<ExitStatus> {
        self.monitor = None;
        self.shared.close_writer();
        self.worker
            .take()
            .and_then(|worker| worker.terminate(grace))
    }

    fn stop(&mut self) {
        self.restart_at = None;
        self.startup_deadline = None;
        self.connected_at = None;

        if self.worker.is_some() {
            self.request_exit();
        }
        self.shared.close_writer();
        self.transition(ConnectionState::Disconnected);

        let rejected = self.shared.correlator.reject_all(&LinkError::Shutdown);
        if rejected > 0 {
            debug!(target: SUPERVISOR_TARGET, rejected, "rejected calls on shutdown");
        }
        if self.worker.is_some() {
            let status = self.teardown(SHUTDOWN_GRACE);
            info!(
                target: SUPERVISOR_TARGET,
                generation = self.generation,
                exit_status = ?status,
                "worker stopped"
            );
        }
        self.monitor = None;
    }

    fn request_exit(&self) {
        let sent = encode_line(&ProtocolMessage::from(Notification::exit()))
            .map_err(LinkError::from)
            .and_then(|line| self.shared.write_line(&line));
        if let Err(exit_error) = sent {
            debug!(
                target: SUPERVISOR_TARGET,
                error = %exit_error,
                "could not deliver exit notification"
            );
        }
    }
}
