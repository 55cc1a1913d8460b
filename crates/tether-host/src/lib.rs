//! Parent side of the tether bridge: a supervisor for one worker process.
//!
//! The [`Supervisor`] spawns the worker, speaks line-delimited JSON-RPC over
//! its standard streams, and keeps the link alive:
//!
//! - Outbound calls are correlated with responses by id in a
//!   [`CallCorrelator`]; any number of callers may wait concurrently.
//! - A [`HeartbeatMonitor`] declares the worker dead when it falls silent for
//!   longer than the heartbeat timeout.
//! - A [`ReconnectPolicy`] bounds restarts within a sliding window; once the
//!   budget is spent the link enters [`ConnectionState::Failed`].
//! - [`LinkObserver`]s receive state transitions, application events, and
//!   link errors. Transport notifications (`ready`, `heartbeat`) are consumed
//!   internally.
//!
//! Every lifecycle decision is made on a single control thread, so the state
//! machine has one writer. Worker standard error is forwarded to `tracing`
//! under [`WORKER_STDERR_TARGET`].

mod control;
mod correlator;
mod error;
mod heartbeat;
mod observer;
mod process;
mod reconnect;
mod settings;
mod state;
mod supervisor;

pub use correlator::{CallCorrelator, PendingReply};
pub use error::{DisconnectReason, LinkError};
pub use heartbeat::{HeartbeatMonitor, Liveness, LivenessHandle};
pub use observer::{LinkObserver, ObserverId, StructuredLinkObserver};
pub use process::WORKER_STDERR_TARGET;
pub use reconnect::ReconnectPolicy;
pub use settings::{LinkSettings, WorkerCommand};
pub use state::ConnectionState;
pub use supervisor::Supervisor;

#[cfg(test)]
mod tests;
