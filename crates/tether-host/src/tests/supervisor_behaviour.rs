//! Behavioural tests covering worker supervision against scripted workers.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::Value;

use crate::correlator::PendingReply;
use crate::error::{DisconnectReason, LinkError};
use crate::settings::LinkSettings;
use crate::state::ConnectionState;
use crate::supervisor::Supervisor;
use crate::tests::support::{FakeWorker, LinkEvent, RecordingObserver};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

type StepResult = Result<(), String>;

struct SupervisorWorld {
    settings: Option<LinkSettings>,
    supervisor: Option<Supervisor>,
    observer: Arc<RecordingObserver>,
    start_outcome: Option<Result<(), LinkError>>,
    pending: Vec<PendingReply>,
    outcomes: HashMap<String, Result<Value, LinkError>>,
    settled_in: HashMap<String, ConnectionState>,
}

impl SupervisorWorld {
    fn new() -> Self {
        Self {
            settings: None,
            supervisor: None,
            observer: Arc::new(RecordingObserver::default()),
            start_outcome: None,
            pending: Vec::new(),
            outcomes: HashMap::new(),
            settled_in: HashMap::new(),
        }
    }

    fn use_worker(&mut self, worker: FakeWorker) {
        self.settings = Some(worker.settings());
    }

    fn adjust(&mut self, edit: impl FnOnce(LinkSettings) -> LinkSettings) -> StepResult {
        let settings = self
            .settings
            .take()
            .ok_or_else(|| String::from("no worker was chosen"))?;
        self.settings = Some(edit(settings));
        Ok(())
    }

    /// Builds the supervisor on first use so configuration steps can run
    /// before it exists.
    fn supervisor(&mut self) -> Result<&Supervisor, String> {
        if self.supervisor.is_none() {
            let settings = self
                .settings
                .clone()
                .ok_or_else(|| String::from("no worker was chosen"))?;
            let supervisor = Supervisor::new(settings).map_err(|error| error.to_string())?;
            supervisor.subscribe(self.observer.clone());
            self.supervisor = Some(supervisor);
        }
        self.supervisor
            .as_ref()
            .ok_or_else(|| String::from("supervisor missing"))
    }

    fn outcome(&self, method: &str) -> Result<&Result<Value, LinkError>, String> {
        self.outcomes
            .get(method)
            .ok_or_else(|| format!("no outcome recorded for {method}"))
    }
}

fn parse_state(name: &str) -> Result<ConnectionState, String> {
    [
        ConnectionState::Disconnected,
        ConnectionState::Starting,
        ConnectionState::Connected,
        ConnectionState::Restarting,
        ConnectionState::Failed,
    ]
    .into_iter()
    .find(|state| state.as_str() == name)
    .ok_or_else(|| format!("unknown state '{name}'"))
}

#[fixture]
fn world() -> RefCell<SupervisorWorld> {
    RefCell::new(SupervisorWorld::new())
}

// ---------------------------------------------------------------------------
// Given steps
// ---------------------------------------------------------------------------

#[given("a responsive worker")]
fn given_responsive(world: &RefCell<SupervisorWorld>) {
    world.borrow_mut().use_worker(FakeWorker::Responsive);
}

#[given("a worker that exits on its first request")]
fn given_exits_on_request(world: &RefCell<SupervisorWorld>) {
    world.borrow_mut().use_worker(FakeWorker::ExitsOnRequest);
}

#[given("a worker that falls silent after a few heartbeats")]
fn given_falls_silent(world: &RefCell<SupervisorWorld>) {
    world.borrow_mut().use_worker(FakeWorker::FallsSilent);
}

#[given("a worker that exits right after reporting ready")]
fn given_exits_after_ready(world: &RefCell<SupervisorWorld>) {
    world.borrow_mut().use_worker(FakeWorker::ExitsAfterReady);
}

#[given("a worker that reports its heartbeat interval")]
fn given_reports_interval(world: &RefCell<SupervisorWorld>) {
    world.borrow_mut().use_worker(FakeWorker::ReportsInterval);
}

#[given("a worker that never reports ready")]
fn given_never_ready(world: &RefCell<SupervisorWorld>) {
    world.borrow_mut().use_worker(FakeWorker::NeverReady);
}

#[given("a missing worker executable")]
fn given_missing(world: &RefCell<SupervisorWorld>) {
    world.borrow_mut().use_worker(FakeWorker::Missing);
}

#[given("a request timeout of {millis} milliseconds")]
fn given_request_timeout(world: &RefCell<SupervisorWorld>, millis: u64) -> StepResult {
    world
        .borrow_mut()
        .adjust(|settings| settings.with_request_timeout(Duration::from_millis(millis)))
}

#[given("a heartbeat interval of {millis} milliseconds")]
fn given_heartbeat_interval(world: &RefCell<SupervisorWorld>, millis: u64) -> StepResult {
    world.borrow_mut().adjust(|settings| {
        let timeout = settings.heartbeat_timeout;
        settings.with_heartbeat(Duration::from_millis(millis), timeout)
    })
}

#[given("a heartbeat timeout of {millis} milliseconds")]
fn given_heartbeat_timeout(world: &RefCell<SupervisorWorld>, millis: u64) -> StepResult {
    world.borrow_mut().adjust(|settings| {
        let interval = settings.heartbeat_interval;
        settings.with_heartbeat(interval, Duration::from_millis(millis))
    })
}

#[given("a startup timeout of {millis} milliseconds")]
fn given_startup_timeout(world: &RefCell<SupervisorWorld>, millis: u64) -> StepResult {
    world
        .borrow_mut()
        .adjust(|settings| settings.with_startup_timeout(Duration::from_millis(millis)))
}

#[given("a restart backoff of {millis} milliseconds")]
fn given_restart_backoff(world: &RefCell<SupervisorWorld>, millis: u64) -> StepResult {
    world
        .borrow_mut()
        .adjust(|settings| settings.with_restart_backoff(Duration::from_millis(millis)))
}

#[given("a restart budget of {count}")]
fn given_restart_budget(world: &RefCell<SupervisorWorld>, count: u32) -> StepResult {
    world.borrow_mut().adjust(|settings| {
        let window = settings.restart_window;
        settings.with_restart_budget(count, window)
    })
}

// ---------------------------------------------------------------------------
// When steps
// ---------------------------------------------------------------------------

#[when("the supervisor starts")]
fn when_supervisor_starts(world: &RefCell<SupervisorWorld>) -> StepResult {
    let mut state = world.borrow_mut();
    let outcome = state.supervisor()?.start();
    state.start_outcome = Some(outcome);
    Ok(())
}

#[when("the supervisor starts with a fresh budget")]
fn when_supervisor_starts_fresh(world: &RefCell<SupervisorWorld>) -> StepResult {
    let mut state = world.borrow_mut();
    let outcome = state.supervisor()?.start_with_fresh_budget();
    state.start_outcome = Some(outcome);
    Ok(())
}

#[when("the supervisor is stopped")]
fn when_supervisor_stopped(world: &RefCell<SupervisorWorld>) -> StepResult {
    world.borrow_mut().supervisor()?.stop();
    Ok(())
}

#[when("the client calls {method}")]
fn when_client_calls(world: &RefCell<SupervisorWorld>, method: String) -> StepResult {
    let mut state = world.borrow_mut();
    let outcome = state.supervisor()?.call(&method, None);
    state.outcomes.insert(method, outcome);
    Ok(())
}

#[when("the client sends {method} without waiting")]
fn when_client_sends(world: &RefCell<SupervisorWorld>, method: String) -> StepResult {
    let mut state = world.borrow_mut();
    let reply = state
        .supervisor()?
        .send_request(&method, None)
        .map_err(|error| format!("send_request({method}) failed: {error}"))?;
    state.pending.push(reply);
    Ok(())
}

#[when("the pending calls settle")]
fn when_pending_settle(world: &RefCell<SupervisorWorld>) -> StepResult {
    let mut state = world.borrow_mut();
    let pending = std::mem::take(&mut state.pending);
    for reply in pending {
        let method = reply.method().to_owned();
        let outcome = reply.wait();
        let current = state.supervisor()?.state();
        state.settled_in.insert(method.clone(), current);
        state.outcomes.insert(method, outcome);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Then steps
// ---------------------------------------------------------------------------

#[then("the link state becomes {name}")]
fn then_state_becomes(world: &RefCell<SupervisorWorld>, name: String) -> StepResult {
    let target = parse_state(&name)?;
    let mut state = world.borrow_mut();
    let supervisor = state.supervisor()?;
    if supervisor.wait_for_state(target, WAIT_TIMEOUT) {
        Ok(())
    } else {
        Err(format!(
            "expected state {target}, found {}",
            supervisor.state()
        ))
    }
}

#[then("the link state remains {name} for {millis} milliseconds")]
fn then_state_remains(world: &RefCell<SupervisorWorld>, name: String, millis: u64) -> StepResult {
    let target = parse_state(&name)?;
    std::thread::sleep(Duration::from_millis(millis));
    let mut state = world.borrow_mut();
    let current = state.supervisor()?.state();
    if current == target {
        Ok(())
    } else {
        Err(format!("expected state {target} to hold, found {current}"))
    }
}

#[then("the {name} state was entered once")]
fn then_entered_once(world: &RefCell<SupervisorWorld>, name: String) -> StepResult {
    let target = parse_state(&name)?;
    let observer = Arc::clone(&world.borrow().observer);
    match observer.entries_into(target) {
        1 => Ok(()),
        entries => Err(format!(
            "expected one entry into {target}, saw {entries}: {:?}",
            observer.events()
        )),
    }
}

#[then("the start succeeded")]
fn then_start_succeeded(world: &RefCell<SupervisorWorld>) -> StepResult {
    match world.borrow().start_outcome.as_ref() {
        Some(Ok(())) => Ok(()),
        other => Err(format!("expected start to succeed, got {other:?}")),
    }
}

#[then("the link had already left connected when {method} settled")]
fn then_left_connected(world: &RefCell<SupervisorWorld>, method: String) -> StepResult {
    match world.borrow().settled_in.get(&method) {
        Some(ConnectionState::Connected) => Err(format!("{method} settled while still connected")),
        Some(_) => Ok(()),
        None => Err(format!("{method} never settled")),
    }
}

#[then("the call to {method} succeeds with {text}")]
fn then_call_succeeds(world: &RefCell<SupervisorWorld>, method: String, text: String) -> StepResult {
    match world.borrow().outcome(&method)? {
        Ok(Value::String(result)) if *result == text => Ok(()),
        other => Err(format!("unexpected outcome for {method}: {other:?}")),
    }
}

#[then("the call to {method} times out")]
fn then_call_times_out(world: &RefCell<SupervisorWorld>, method: String) -> StepResult {
    match world.borrow().outcome(&method)? {
        Err(LinkError::Timeout { method: expired, .. }) if *expired == method => Ok(()),
        other => Err(format!("expected a timeout for {method}, got {other:?}")),
    }
}

#[then("the call to {method} fails with application code {code}")]
fn then_call_application_error(
    world: &RefCell<SupervisorWorld>,
    method: String,
    code: i64,
) -> StepResult {
    match world.borrow().outcome(&method)? {
        Err(LinkError::Application { code: actual, .. }) if *actual == code => Ok(()),
        other => Err(format!("expected application code {code}, got {other:?}")),
    }
}

#[then("the call to {method} fails with a shutdown error")]
fn then_call_shutdown(world: &RefCell<SupervisorWorld>, method: String) -> StepResult {
    match world.borrow().outcome(&method)? {
        Err(LinkError::Shutdown) => Ok(()),
        other => Err(format!("expected a shutdown error, got {other:?}")),
    }
}

#[then("the call to {method} fails with a disconnection")]
fn then_call_disconnected(world: &RefCell<SupervisorWorld>, method: String) -> StepResult {
    match world.borrow().outcome(&method)? {
        Err(error) if error.is_disconnect() => Ok(()),
        other => Err(format!("expected a disconnection, got {other:?}")),
    }
}

#[then("the call to {method} is rejected as not connected")]
fn then_call_not_connected(world: &RefCell<SupervisorWorld>, method: String) -> StepResult {
    match world.borrow().outcome(&method)? {
        Err(LinkError::NotConnected {
            state: ConnectionState::Disconnected,
        }) => Ok(()),
        other => Err(format!("expected a not-connected error, got {other:?}")),
    }
}

#[then("the observer received the event {method}")]
fn then_event_received(world: &RefCell<SupervisorWorld>, method: String) -> StepResult {
    let observer = Arc::clone(&world.borrow().observer);
    let seen = observer.wait_until(WAIT_TIMEOUT, |events| {
        events
            .iter()
            .any(|event| matches!(event, LinkEvent::Event(name, Some(_)) if *name == method))
    });
    if seen {
        Ok(())
    } else {
        Err(format!("event {method} never arrived: {:?}", observer.events()))
    }
}

#[then("events were delivered on the worker reader thread")]
fn then_events_on_reader(world: &RefCell<SupervisorWorld>) -> StepResult {
    let threads = world.borrow().observer.event_threads();
    let on_reader = |name: &Option<String>| {
        name.as_deref()
            .is_some_and(|thread| thread.starts_with("tether-reader-"))
    };
    if !threads.is_empty() && threads.iter().all(on_reader) {
        Ok(())
    } else {
        Err(format!("events arrived on unexpected threads: {threads:?}"))
    }
}

#[then("no transport notifications reached the observer")]
fn then_no_transport_events(world: &RefCell<SupervisorWorld>) -> StepResult {
    let names = world.borrow().observer.event_names();
    if names.iter().any(|name| name == "ready" || name == "heartbeat") {
        return Err(format!("transport notifications leaked: {names:?}"));
    }
    Ok(())
}

#[then("the number of restart transitions is {count}")]
fn then_restart_count(world: &RefCell<SupervisorWorld>, count: usize) -> StepResult {
    let observed = world
        .borrow()
        .observer
        .entries_into(ConnectionState::Restarting);
    if observed == count {
        Ok(())
    } else {
        Err(format!("expected {count} restarts, observed {observed}"))
    }
}

#[then("the observer saw a heartbeat timeout")]
fn then_heartbeat_timeout(world: &RefCell<SupervisorWorld>) -> StepResult {
    let losses = world.borrow().observer.losses();
    match losses.as_slice() {
        [DisconnectReason::HeartbeatTimeout { .. }] => Ok(()),
        other => Err(format!("expected one heartbeat timeout, saw {other:?}")),
    }
}

#[then("the observer saw a startup timeout")]
fn then_startup_timeout(world: &RefCell<SupervisorWorld>) -> StepResult {
    let losses = world.borrow().observer.losses();
    if losses.contains(&DisconnectReason::StartupTimeout) {
        Ok(())
    } else {
        Err(format!("expected a startup timeout, saw {losses:?}"))
    }
}

#[then("starting failed because the executable is missing")]
fn then_start_missing(world: &RefCell<SupervisorWorld>) -> StepResult {
    match world.borrow().start_outcome.as_ref() {
        Some(Err(LinkError::BinaryNotFound { .. })) => Ok(()),
        other => Err(format!("expected a missing executable, got {other:?}")),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "A responsive worker connects and answers calls"
)]
fn responsive_worker(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "Calls before the link is connected are rejected"
)]
fn calls_before_connect(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "Worker errors reach the caller"
)]
fn worker_errors(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "Application events reach observers and transport notifications do not"
)]
fn application_events(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "A timed-out call does not disturb an independent call"
)]
fn timeout_isolation(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "Stopping rejects in-flight calls with a shutdown error"
)]
fn stop_rejects_pending(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "A crashing worker rejects pending calls and schedules a restart"
)]
fn crash_rejects_pending(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "Heartbeat silence triggers exactly one restart"
)]
fn heartbeat_silence(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "Exhausting the restart budget fails the link"
)]
fn budget_exhaustion(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "A fresh budget recovers a failed link"
)]
fn fresh_budget(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "A worker that never reports ready is abandoned"
)]
fn startup_timeout(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "A missing executable fails to spawn"
)]
fn missing_executable(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "Stopping during a scheduled restart cancels it"
)]
fn stop_cancels_restart(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "Starting a connected link again spawns nothing"
)]
fn start_while_connected(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "Starting a link that is still starting spawns nothing"
)]
fn start_while_starting(#[from(world)] _: RefCell<SupervisorWorld>) {}

#[scenario(
    path = "tests/features/supervisor.feature",
    name = "The worker inherits the configured heartbeat interval"
)]
fn worker_inherits_interval(#[from(world)] _: RefCell<SupervisorWorld>) {}
