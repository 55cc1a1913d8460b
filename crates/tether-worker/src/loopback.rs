//! Built-in automation surface for diagnostics and end-to-end tests.
//!
//! | Method        | Params                                   | Result                          |
//! |---------------|------------------------------------------|---------------------------------|
//! | `ping`        | none                                     | `"pong"`                        |
//! | `echo`        | any                                      | the params, or `null`           |
//! | `sleep`       | `{ms}`                                   | `{sleptMs}` after blocking      |
//! | `raise`       | `{event, payload?}`                      | `null`, after the notification  |
//! | `fail`        | `{message?, data?}`                      | automation error                |
//! | `panic`       | `{message?}`                             | internal error                  |
//! | `crash`       | `{code?}`                                | the process exits               |
//! | `subscribe`   | `{topic, intervalMs?, count?}`           | `{subscription}`                |
//! | `unsubscribe` | `{subscription}`                         | `{released}`                    |
//! | `status`      | none                                     | `{subscriptions, eventsDelivered}` |

use std::process;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tether_protocol::Notification;
use tracing::{debug, warn};

use crate::registry::{EventSink, SubscriptionId};
use crate::surface::{
    AutomationFailure, AutomationSurface, DispatchContext, RaisedEvent, decode_params,
};

const LOOPBACK_TARGET: &str = "tether_worker::loopback";

const DEFAULT_EVENT_INTERVAL_MS: u64 = 100;
const DEFAULT_CRASH_CODE: i32 = 3;

#[derive(Debug, Deserialize)]
struct SleepParams {
    ms: u64,
}

#[derive(Debug, Deserialize)]
struct RaiseParams {
    event: String,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FailParams {
    #[serde(default = "default_failure_message")]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PanicParams {
    #[serde(default = "default_panic_message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CrashParams {
    #[serde(default = "default_crash_code")]
    code: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeParams {
    topic: String,
    #[serde(default = "default_event_interval")]
    interval_ms: u64,
    #[serde(default)]
    count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UnsubscribeParams {
    subscription: SubscriptionId,
}

fn default_failure_message() -> String {
    String::from("requested failure")
}

fn default_panic_message() -> String {
    String::from("requested panic")
}

const fn default_crash_code() -> i32 {
    DEFAULT_CRASH_CODE
}

const fn default_event_interval() -> u64 {
    DEFAULT_EVENT_INTERVAL_MS
}

/// Surface that answers from memory and raises synthetic events.
#[derive(Debug, Default)]
pub struct LoopbackSurface {
    events_delivered: u64,
}

impl LoopbackSurface {
    /// Creates the surface.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            events_delivered: 0,
        }
    }

    /// Number of raised events turned into notifications.
    #[must_use]
    pub const fn events_delivered(&self) -> u64 {
        self.events_delivered
    }
}

impl AutomationSurface for LoopbackSurface {
    fn invoke(
        &mut self,
        method: &str,
        params: Option<Value>,
        context: &mut DispatchContext,
    ) -> Result<Value, AutomationFailure> {
        match method {
            "ping" => Ok(json!("pong")),
            "echo" => Ok(params.unwrap_or(Value::Null)),
            "sleep" => {
                let SleepParams { ms } = decode_params(params)?;
                thread::sleep(Duration::from_millis(ms));
                Ok(json!({ "sleptMs": ms }))
            }
            "raise" => {
                let RaiseParams { event, payload } = decode_params(params)?;
                context.notify(&event, payload)?;
                Ok(Value::Null)
            }
            "fail" => {
                let FailParams { message, data } = decode_params(params)?;
                Err(AutomationFailure::Automation { message, data })
            }
            "panic" => {
                let PanicParams { message } = decode_params(params)?;
                abandon_method(&message)
            }
            "crash" => {
                let CrashParams { code } = decode_params(params)?;
                warn!(target: LOOPBACK_TARGET, code, "crash requested");
                process::exit(code)
            }
            "subscribe" => {
                let SubscribeParams {
                    topic,
                    interval_ms,
                    count,
                } = decode_params(params)?;
                let sink = context.subscribe(&topic);
                let subscription = sink.id();
                start_event_source(sink, topic, Duration::from_millis(interval_ms), count)?;
                Ok(json!({ "subscription": subscription }))
            }
            "unsubscribe" => {
                let UnsubscribeParams { subscription } = decode_params(params)?;
                Ok(json!({ "released": context.unsubscribe(subscription) }))
            }
            "status" => Ok(json!({
                "subscriptions": context.subscriptions().len(),
                "eventsDelivered": self.events_delivered,
            })),
            other => Err(AutomationFailure::unknown_method(other)),
        }
    }

    fn prepare_event(&mut self, event: RaisedEvent) -> Option<Notification> {
        self.events_delivered = self.events_delivered.saturating_add(1);
        Some(event.into_notification())
    }
}

fn abandon_method(message: &str) -> ! {
    panic!("{message}")
}

/// Raises `topic` events from a separate thread until the subscription is
/// released, the dispatch loop stops, or `count` events have been raised.
fn start_event_source(
    sink: EventSink,
    topic: String,
    interval: Duration,
    count: Option<u64>,
) -> Result<(), AutomationFailure> {
    thread::Builder::new()
        .name(format!("tether-source-{}", sink.id()))
        .spawn(move || {
            let mut sequence: u64 = 0;
            while count.is_none_or(|limit| sequence < limit) {
                thread::sleep(interval);
                sequence = sequence.saturating_add(1);
                let params = json!({ "subscription": sink.id(), "seq": sequence });
                if !sink.raise(&topic, Some(params)) {
                    break;
                }
            }
            debug!(
                target: LOOPBACK_TARGET,
                subscription = %sink.id(),
                raised = sequence,
                "event source stopped"
            );
        })
        .map(drop)
        .map_err(|error| {
            AutomationFailure::internal(format!("failed to start event source: {error}"))
        })
}
