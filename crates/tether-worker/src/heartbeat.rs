//! Periodic heartbeat notifications.
//!
//! The emitter writes straight to the shared output on its own thread, so a
//! method body that hangs the dispatch thread does not silence it. Only a
//! dead or wedged process stops the heartbeat.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tether_protocol::Notification;
use tracing::{debug, trace, warn};

use crate::error::WorkerError;
use crate::output::OutputChannel;

const HEARTBEAT_TARGET: &str = "tether_worker::heartbeat";

/// Running heartbeat thread.
#[derive(Debug)]
pub struct HeartbeatEmitter {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<u64>>,
}

impl HeartbeatEmitter {
    /// Starts emitting `heartbeat` notifications every `interval`.
    ///
    /// The first heartbeat follows one full interval after the call.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Thread`] if the thread cannot be spawned.
    pub fn spawn(output: OutputChannel, interval: Duration) -> Result<Self, WorkerError> {
        let (stop, signal) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(String::from("tether-heartbeat"))
            .spawn(move || emit(&output, interval, &signal))
            .map_err(|error| WorkerError::thread("heartbeat", error))?;
        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// Stops the thread and returns how many heartbeats it sent.
    #[must_use]
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        drop(self.stop.take());
        let Some(thread) = self.thread.take() else {
            return 0;
        };
        thread.join().unwrap_or_else(|_| {
            warn!(target: HEARTBEAT_TARGET, "heartbeat thread panicked");
            0
        })
    }
}

impl Drop for HeartbeatEmitter {
    fn drop(&mut self) {
        let sent = self.shutdown();
        trace!(target: HEARTBEAT_TARGET, sent, "heartbeat emitter dropped");
    }
}

fn emit(output: &OutputChannel, interval: Duration, signal: &Receiver<()>) -> u64 {
    let mut sequence: u64 = 0;
    loop {
        match signal.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        sequence = sequence.wrapping_add(1);
        if let Err(error) = output.send(Notification::heartbeat(sequence)) {
            warn!(target: HEARTBEAT_TARGET, error = %error, "heartbeat write failed");
            break;
        }
        trace!(target: HEARTBEAT_TARGET, sequence, "heartbeat sent");
    }
    debug!(target: HEARTBEAT_TARGET, sent = sequence, "heartbeat stopped");
    sequence
}
