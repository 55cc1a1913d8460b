//! Worker side of the tether bridge.
//!
//! A worker wraps an automation layer that must only be driven from one
//! thread. [`serve`] runs it behind a line-delimited JSON-RPC link on the
//! process's standard streams:
//!
//! - A reader thread parses input lines and queues requests. Malformed lines
//!   are discarded; end of input or the `exit` notification stops the worker.
//! - The [`DispatchLoop`] drains that queue on a single thread and hands each
//!   request to the [`AutomationSurface`], writing exactly one response per
//!   request. A panicking method body becomes an internal error response.
//! - Event sources raise events through an [`EventSink`] from any thread. The
//!   events join the same queue, so the surface applies them on the dispatch
//!   thread before their notifications are written.
//! - A [`HeartbeatEmitter`] writes `heartbeat` notifications on its own timer,
//!   so the host keeps hearing from a worker whose method body hangs.
//!
//! Diagnostics go to stderr through [`telemetry`]; stdout carries protocol
//! lines only.

mod bootstrap;
mod dispatch;
mod error;
mod heartbeat;
mod loopback;
mod output;
mod registry;
mod runtime;
mod surface;
pub mod telemetry;

pub use bootstrap::{BootstrapError, ConfigLoader, SystemConfigLoader, run_with};
pub use dispatch::{DispatchLoop, ShutdownCause};
pub use error::WorkerError;
pub use heartbeat::HeartbeatEmitter;
pub use loopback::LoopbackSurface;
pub use output::OutputChannel;
pub use registry::{EventSink, SubscriptionId, SubscriptionRegistry};
pub use runtime::{WorkerOptions, serve};
pub use surface::{
    AutomationFailure, AutomationSurface, DispatchContext, RaisedEvent, decode_params,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
