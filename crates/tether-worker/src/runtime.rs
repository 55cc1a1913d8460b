//! Wires the dispatch loop, input reader, and heartbeat into a running worker.

use std::io::{BufRead, Write};
use std::process;
use std::time::Duration;

use tether_config::{Config, DEFAULT_HEARTBEAT_INTERVAL_MS};
use tether_protocol::Notification;
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchLoop, ShutdownCause};
use crate::error::WorkerError;
use crate::heartbeat::HeartbeatEmitter;
use crate::output::OutputChannel;
use crate::surface::AutomationSurface;

const RUNTIME_TARGET: &str = "tether_worker::runtime";

/// Settings for one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    heartbeat_interval: Duration,
    version: String,
}

impl WorkerOptions {
    /// Options with the default heartbeat interval and this crate's version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            version: String::from(env!("CARGO_PKG_VERSION")),
        }
    }

    /// Options taking the heartbeat interval from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new().with_heartbeat_interval(config.heartbeat_interval())
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the version announced in the `ready` notification.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Interval between heartbeats.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Version announced in the `ready` notification.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves requests from `input` until the host closes it or asks the worker
/// to exit.
///
/// The surface attaches first; only then is `ready` written, followed by
/// heartbeats on their own thread and responses from the dispatch loop,
/// which runs on the calling thread.
///
/// # Errors
///
/// Returns [`WorkerError`] if the surface fails to attach, a runtime thread
/// cannot start, or the output stream breaks.
pub fn serve<S, R, W>(
    surface: S,
    input: R,
    output: W,
    options: &WorkerOptions,
) -> Result<ShutdownCause, WorkerError>
where
    S: AutomationSurface,
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let channel = OutputChannel::new(output);
    let mut dispatch = DispatchLoop::new(surface, channel.clone());
    dispatch.attach()?;

    let pid = process::id();
    channel.send(Notification::ready(pid, options.version()))?;
    info!(
        target: RUNTIME_TARGET,
        pid,
        version = options.version(),
        heartbeat_interval_ms = u64::try_from(options.heartbeat_interval().as_millis())
            .unwrap_or(u64::MAX),
        "worker ready"
    );

    let heartbeat = HeartbeatEmitter::spawn(channel, options.heartbeat_interval())?;
    let reader = dispatch.spawn_reader(input)?;
    let outcome = dispatch.run();
    let beats = heartbeat.stop();

    // The reader stays blocked on input until the host closes it.
    if reader.is_finished() && reader.join().is_err() {
        warn!(target: RUNTIME_TARGET, "input reader panicked");
    }
    debug!(target: RUNTIME_TARGET, beats, "worker stopped");
    outcome
}
