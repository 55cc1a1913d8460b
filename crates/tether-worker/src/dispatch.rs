//! The single execution context that runs method bodies and marshals events.
//!
//! A reader thread turns input lines into [`WorkItem`]s; the dispatch loop
//! drains them one at a time on the thread that called
//! [`DispatchLoop::run`]. Requests, raised events, and shutdown all travel
//! through the same queue, so a notification produced by an event is written
//! only after every earlier request has been answered.

use std::any::Any;
use std::fmt;
use std::io::{self, BufRead};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tether_protocol::{ProtocolMessage, Request, Response, methods, parse_message};
use tracing::{debug, error, info, trace, warn};

use crate::error::WorkerError;
use crate::output::OutputChannel;
use crate::registry::SubscriptionRegistry;
use crate::surface::{AutomationFailure, AutomationSurface, DispatchContext, RaisedEvent};

const DISPATCH_TARGET: &str = "tether_worker::dispatch";
const READER_TARGET: &str = "tether_worker::reader";

/// Unit of work for the dispatch thread.
#[derive(Debug)]
pub(crate) enum WorkItem {
    Call(Request),
    Event(RaisedEvent),
    Shutdown(ShutdownCause),
}

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The host sent the `exit` notification.
    ExitRequested,
    /// The input stream reached end of file.
    InputClosed,
    /// Reading the input stream failed.
    InputFailed,
}

impl ShutdownCause {
    /// Stable label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExitRequested => "exit_requested",
            Self::InputClosed => "input_closed",
            Self::InputFailed => "input_failed",
        }
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the automation surface and everything that may touch it.
pub struct DispatchLoop<S> {
    surface: S,
    context: DispatchContext,
    inbox: Receiver<WorkItem>,
    queue: Sender<WorkItem>,
    handled: u64,
}

impl<S> DispatchLoop<S>
where
    S: AutomationSurface,
{
    /// Creates a loop that writes responses and notifications to `output`.
    #[must_use]
    pub fn new(surface: S, output: OutputChannel) -> Self {
        let (queue, inbox) = mpsc::channel();
        let registry = SubscriptionRegistry::new(queue.clone());
        Self {
            surface,
            context: DispatchContext::new(output, registry),
            inbox,
            queue,
            handled: 0,
        }
    }

    /// Attaches the automation surface.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Attach`] when the surface fails or panics.
    pub fn attach(&mut self) -> Result<(), WorkerError> {
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| self.surface.attach(&mut self.context)));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(WorkerError::Attach { source }),
            Err(payload) => Err(WorkerError::Attach {
                source: AutomationFailure::internal(format!(
                    "attach panicked: {}",
                    panic_message(&*payload)
                )),
            }),
        }
    }

    /// Starts the thread that feeds this loop from `input`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Thread`] if the thread cannot be spawned.
    pub fn spawn_reader<R>(&self, input: R) -> Result<JoinHandle<()>, WorkerError>
    where
        R: BufRead + Send + 'static,
    {
        let queue = self.queue.clone();
        thread::Builder::new()
            .name(String::from("tether-reader"))
            .spawn(move || pump_input(input, &queue))
            .map_err(|error| WorkerError::thread("reader", error))
    }

    /// Drains the work queue until shutdown, then releases subscriptions and
    /// detaches the surface.
    ///
    /// # Errors
    ///
    /// Returns the output failure that made the link unusable.
    pub fn run(mut self) -> Result<ShutdownCause, WorkerError> {
        let outcome = self.drain();
        let released = self.context.subscriptions_mut().release_all();
        self.surface.detach();
        match &outcome {
            Ok(cause) => info!(
                target: DISPATCH_TARGET,
                cause = cause.as_str(),
                handled = self.handled,
                released,
                "dispatch loop stopped"
            ),
            Err(failure) => error!(
                target: DISPATCH_TARGET,
                error = %failure,
                handled = self.handled,
                released,
                "dispatch loop aborted"
            ),
        }
        outcome
    }

    fn drain(&mut self) -> Result<ShutdownCause, WorkerError> {
        loop {
            let Ok(item) = self.inbox.recv() else {
                return Ok(ShutdownCause::InputClosed);
            };
            match item {
                WorkItem::Call(request) => self.dispatch_call(request)?,
                WorkItem::Event(event) => self.dispatch_event(event)?,
                WorkItem::Shutdown(cause) => return Ok(cause),
            }
        }
    }

    fn dispatch_call(&mut self, request: Request) -> Result<(), WorkerError> {
        let Request { id, method, params } = request;
        self.handled = self.handled.saturating_add(1);
        debug!(target: DISPATCH_TARGET, id, method = method.as_str(), "dispatching request");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.surface.invoke(&method, params, &mut self.context)
        }));
        let response = match outcome {
            Ok(Ok(result)) => Response::success(id, result),
            Ok(Err(failure)) => {
                debug!(
                    target: DISPATCH_TARGET,
                    id,
                    method = method.as_str(),
                    error = %failure,
                    "method failed"
                );
                Response::failure(id, failure.into_rpc_error())
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(
                    target: DISPATCH_TARGET,
                    id,
                    method = method.as_str(),
                    panic = message,
                    "method panicked"
                );
                let failure =
                    AutomationFailure::internal(format!("method '{method}' panicked: {message}"));
                Response::failure(id, failure.into_rpc_error())
            }
        };
        self.context.output().send(response)
    }

    fn dispatch_event(&mut self, event: RaisedEvent) -> Result<(), WorkerError> {
        let subscription = event.subscription;
        if !self.context.subscriptions().is_active(subscription) {
            trace!(
                target: DISPATCH_TARGET,
                subscription = %subscription,
                "event from released subscription dropped"
            );
            return Ok(());
        }

        let prepared = panic::catch_unwind(AssertUnwindSafe(|| self.surface.prepare_event(event)));
        match prepared {
            Ok(Some(notification)) => self.context.output().send(notification),
            Ok(None) => {
                trace!(target: DISPATCH_TARGET, subscription = %subscription, "event suppressed");
                Ok(())
            }
            Err(payload) => {
                error!(
                    target: DISPATCH_TARGET,
                    subscription = %subscription,
                    panic = panic_message(&*payload),
                    "event preparation panicked"
                );
                Ok(())
            }
        }
    }
}

impl<S> fmt::Debug for DispatchLoop<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchLoop")
            .field("context", &self.context)
            .field("handled", &self.handled)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    let literal: Option<&str> = payload.downcast_ref::<&str>().copied();
    literal
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn pump_input<R>(input: R, queue: &Sender<WorkItem>)
where
    R: BufRead,
{
    let cause = forward_requests(input, queue);
    debug!(target: READER_TARGET, cause = cause.as_str(), "input reader stopping");
    if queue.send(WorkItem::Shutdown(cause)).is_err() {
        debug!(target: READER_TARGET, "dispatch loop gone before shutdown was queued");
    }
}

/// Forwards requests until the input ends or the host asks the worker to
/// exit. Malformed lines are discarded.
fn forward_requests<R>(mut input: R, queue: &Sender<WorkItem>) -> ShutdownCause
where
    R: BufRead,
{
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match input.read_until(b'\n', &mut buffer) {
            Ok(0) => return ShutdownCause::InputClosed,
            Ok(_) => {}
            Err(failure) if failure.kind() == io::ErrorKind::Interrupted => continue,
            Err(failure) => {
                warn!(target: READER_TARGET, error = %failure, "failed to read input");
                return ShutdownCause::InputFailed;
            }
        }

        let line = String::from_utf8_lossy(&buffer);
        match parse_message(&line) {
            Some(ProtocolMessage::Request(request)) => {
                if queue.send(WorkItem::Call(request)).is_err() {
                    return ShutdownCause::InputClosed;
                }
            }
            Some(ProtocolMessage::Notification(notification))
                if notification.method == methods::EXIT =>
            {
                return ShutdownCause::ExitRequested;
            }
            Some(other) => {
                debug!(target: READER_TARGET, message = ?other, "unexpected message ignored");
            }
            None => {
                debug!(target: READER_TARGET, line = line.trim_end(), "malformed line discarded");
            }
        }
    }
}
