//! Spawning, reading, and tearing down one worker incarnation.
//!
//! Each spawn gets a generation number. The stdout reader thread tags every
//! control message with it so the supervisor can discard signals from a
//! worker it has already replaced.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tether_config::HEARTBEAT_INTERVAL_ENV;
use tether_protocol::{ProtocolMessage, methods, parse_message};
use tracing::{debug, info, trace, warn};

use crate::control::Control;
use crate::correlator::CallCorrelator;
use crate::error::{DisconnectReason, LinkError};
use crate::heartbeat::LivenessHandle;
use crate::observer::ObserverRegistry;
use crate::settings::LinkSettings;

/// Log target for process management.
pub(crate) const PROCESS_TARGET: &str = "tether_host::process";

/// Log target carrying the worker's forwarded standard error.
pub const WORKER_STDERR_TARGET: &str = "tether_host::worker_stderr";

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything the stdout reader needs to route inbound messages.
pub(crate) struct ReaderContext {
    pub(crate) generation: u64,
    pub(crate) correlator: Arc<CallCorrelator>,
    pub(crate) observers: Arc<ObserverRegistry>,
    pub(crate) liveness: LivenessHandle,
    pub(crate) control: Sender<Control>,
}

impl ReaderContext {
    fn route_line(&self, line: &str) {
        let Some(message) = parse_message(line) else {
            if !line.trim().is_empty() {
                debug!(
                    target: PROCESS_TARGET,
                    generation = self.generation,
                    line = %line.trim_end(),
                    "discarding non-protocol output"
                );
            }
            return;
        };
        self.liveness.touch();

        match message {
            ProtocolMessage::Response(response) => {
                self.correlator.handle_response(response);
            }
            ProtocolMessage::Notification(notification) => match notification.method.as_str() {
                methods::READY => self.send(Control::Ready {
                    generation: self.generation,
                }),
                methods::HEARTBEAT => {
                    trace!(target: PROCESS_TARGET, generation = self.generation, "heartbeat");
                }
                methods::EXIT => {}
                method => {
                    self.observers
                        .notify_event(method, notification.params.as_ref());
                }
            },
            ProtocolMessage::Request(request) => {
                debug!(
                    target: PROCESS_TARGET,
                    id = request.id,
                    method = %request.method,
                    "ignoring worker-initiated request"
                );
            }
        }
    }

    fn run(self, stdout: impl Read) {
        let mut reader = BufReader::new(stdout);
        let mut buffer = Vec::new();
        let reason = loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break DisconnectReason::StreamClosed,
                Ok(_) => self.route_line(&String::from_utf8_lossy(&buffer)),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => break DisconnectReason::StreamError(error.to_string()),
            }
        };
        debug!(
            target: PROCESS_TARGET,
            generation = self.generation,
            reason = %reason,
            "worker output ended"
        );
        self.send(Control::WorkerLost {
            generation: self.generation,
            reason,
        });
    }

    fn send(&self, message: Control) {
        if self.control.send(message).is_err() {
            debug!(
                target: PROCESS_TARGET,
                generation = self.generation,
                "supervisor gone; dropping control message"
            );
        }
    }
}

/// A running worker and the threads draining its output.
pub(crate) struct WorkerProcess {
    child: Child,
    pid: u32,
    stdout_reader: Option<JoinHandle<()>>,
    stderr_reader: Option<JoinHandle<()>>,
}

fn capture_failure(what: &str) -> LinkError {
    LinkError::Spawn {
        message: format!("failed to capture {what}"),
        source: Arc::new(io::Error::other(format!("no {what}"))),
    }
}

fn spawn_thread<F>(name: String, body: F) -> Result<JoinHandle<()>, LinkError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(body)
        .map_err(|error| LinkError::Spawn {
            message: String::from("failed to start reader thread"),
            source: Arc::new(error),
        })
}

fn forward_stderr(stderr: impl Read, pid: u32, generation: u64) {
    let mut reader = BufReader::new(stderr);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                info!(
                    target: WORKER_STDERR_TARGET,
                    pid,
                    generation,
                    line = %line.trim_end(),
                    "worker stderr"
                );
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
}

/// Launches the worker and starts its reader threads.
///
/// The returned stdin is handed to the supervisor's writer; dropping it
/// closes the worker's input.
pub(crate) fn spawn_worker(
    settings: &LinkSettings,
    context: ReaderContext,
) -> Result<(WorkerProcess, ChildStdin), LinkError> {
    let worker = &settings.command;
    let interval_ms = settings.heartbeat_interval.as_millis().to_string();
    debug!(
        target: PROCESS_TARGET,
        command = %worker.program.display(),
        args = ?worker.args,
        generation = context.generation,
        "spawning worker process"
    );

    let mut command = Command::new(&worker.program);
    command
        .args(&worker.args)
        .env(HEARTBEAT_INTERVAL_ENV, &interval_ms)
        .envs(worker.env.iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &worker.working_dir {
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .map_err(|error| LinkError::from_spawn(&worker.program.display().to_string(), error))?;
    let pid = child.id();
    let generation = context.generation;

    let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
    let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
        kill_quietly(&mut child);
        return Err(capture_failure("worker stdio"));
    };

    let stdout_reader = match spawn_thread(format!("tether-reader-{generation}"), move || {
        context.run(stdout);
    }) {
        Ok(handle) => handle,
        Err(error) => {
            kill_quietly(&mut child);
            return Err(error);
        }
    };
    // Without the stderr drain the worker still runs; its diagnostics are lost.
    let stderr_reader = spawn_thread(format!("tether-stderr-{generation}"), move || {
        forward_stderr(stderr, pid, generation);
    })
    .inspect_err(|error| {
        warn!(target: PROCESS_TARGET, pid, error = %error, "stderr forwarding unavailable");
    })
    .ok();

    info!(target: PROCESS_TARGET, pid, generation, "worker process spawned");
    Ok((
        WorkerProcess {
            child,
            pid,
            stdout_reader: Some(stdout_reader),
            stderr_reader,
        },
        stdin,
    ))
}

fn kill_quietly(child: &mut Child) {
    if let Err(error) = child.kill().and_then(|()| child.wait().map(drop)) {
        debug!(target: PROCESS_TARGET, error = %error, "failed to reap worker");
    }
}

impl WorkerProcess {
    /// Operating system process id.
    pub(crate) const fn pid(&self) -> u32 {
        self.pid
    }

    /// Waits up to `grace` for the worker to exit, then kills it.
    ///
    /// Callers close the worker's stdin first so a well-behaved worker can
    /// drain and exit on its own.
    pub(crate) fn terminate(mut self, grace: Duration) -> Option<ExitStatus> {
        let status = self.wait_with_grace(grace);
        self.join_readers();
        status
    }

    fn wait_with_grace(&mut self, grace: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(target: PROCESS_TARGET, pid = self.pid, ?status, "worker exited");
                    return Some(status);
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => break,
                Err(error) => {
                    warn!(
                        target: PROCESS_TARGET,
                        pid = self.pid,
                        error = %error,
                        "failed to check worker status"
                    );
                    break;
                }
            }
        }

        warn!(
            target: PROCESS_TARGET,
            pid = self.pid,
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "worker did not exit within grace period, killing"
        );
        if let Err(error) = self.child.kill() {
            debug!(target: PROCESS_TARGET, pid = self.pid, error = %error, "kill failed");
        }
        self.child.wait().ok()
    }

    fn join_readers(&mut self) {
        for handle in [self.stdout_reader.take(), self.stderr_reader.take()]
            .into_iter()
            .flatten()
        {
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                warn!(target: PROCESS_TARGET, pid = self.pid, "reader thread panicked");
            }
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            kill_quietly(&mut self.child);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::correlator::CallCorrelator;
    use crate::heartbeat::HeartbeatMonitor;

    struct Routing {
        context: ReaderContext,
        control: mpsc::Receiver<Control>,
        correlator: Arc<CallCorrelator>,
        monitor: HeartbeatMonitor,
    }

    #[fixture]
    fn routing() -> Routing {
        let (sender, control) = mpsc::channel();
        let correlator = Arc::new(CallCorrelator::new(Duration::from_secs(5)));
        let monitor = HeartbeatMonitor::new(Duration::from_secs(5));
        let context = ReaderContext {
            generation: 7,
            correlator: Arc::clone(&correlator),
            observers: Arc::new(ObserverRegistry::default()),
            liveness: monitor.handle(),
            control: sender,
        };
        Routing {
            context,
            control,
            correlator,
            monitor,
        }
    }

    #[rstest]
    fn ready_is_forwarded_with_generation(routing: Routing) {
        routing
            .context
            .route_line(r#"{"jsonrpc":"2.0","method":"ready","params":{"pid":1}}"#);

        assert!(matches!(
            routing.control.try_recv(),
            Ok(Control::Ready { generation: 7 })
        ));
    }

    #[rstest]
    fn responses_reach_the_correlator(routing: Routing) {
        let reply = routing.correlator.register(3, "dial").expect("register");

        routing
            .context
            .route_line("{\"jsonrpc\":\"2.0\",\"id\":3,\"result\":true}\n");

        assert_eq!(reply.wait().expect("settled"), json!(true));
    }

    #[rstest]
    fn garbage_is_discarded_without_touching_liveness(routing: Routing) {
        let before = routing.monitor.handle().last_seen();

        routing.context.route_line("Segmentation fault (core dumped)\n");
        routing.context.route_line("{\"jsonrpc\":\"1.0\",\"method\":\"x\"}");

        assert_eq!(routing.monitor.handle().last_seen(), before);
        assert!(routing.control.try_recv().is_err());
    }

    #[rstest]
    fn reader_reports_end_of_stream(routing: Routing) {
        let input: &[u8] = b"{\"jsonrpc\":\"2.0\",\"method\":\"heartbeat\",\"params\":{\"seq\":1}}\n";

        routing.context.run(input);

        match routing.control.try_recv() {
            Ok(Control::WorkerLost { generation, reason }) => {
                assert_eq!(generation, 7);
                assert_eq!(reason, DisconnectReason::StreamClosed);
            }
            _ => panic!("expected a worker-lost message"),
        }
    }

    #[rstest]
    fn invalid_utf8_is_tolerated(routing: Routing) {
        let input: &[u8] = b"\xff\xfe\n{\"jsonrpc\":\"2.0\",\"method\":\"ready\"}\n";

        routing.context.run(input);

        assert!(matches!(
            routing.control.try_recv(),
            Ok(Control::Ready { generation: 7 })
        ));
    }
}
