//! The seam between the dispatch loop and the wrapped automation layer.
//!
//! The dispatch loop knows nothing about what methods do. It hands each
//! request to an [`AutomationSurface`], which answers with a JSON value or an
//! [`AutomationFailure`], and it lets the surface shape asynchronous events
//! before they are written as notifications.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tether_protocol::{ErrorCode, Notification, RpcError};
use thiserror::Error;

use crate::error::WorkerError;
use crate::output::OutputChannel;
use crate::registry::{EventSink, SubscriptionId, SubscriptionRegistry};

/// The automation layer driven by the dispatch loop.
///
/// Every method runs on the dispatch thread, one at a time, so
/// implementations may hold handles that are unsafe to share across threads.
pub trait AutomationSurface {
    /// Connects to the automation layer before the worker reports ready.
    ///
    /// # Errors
    ///
    /// A failure aborts startup; the worker exits without sending `ready`.
    fn attach(&mut self, _context: &mut DispatchContext) -> Result<(), AutomationFailure> {
        Ok(())
    }

    /// Runs one method to completion.
    ///
    /// # Errors
    ///
    /// The failure is sent back to the host as an error response.
    fn invoke(
        &mut self,
        method: &str,
        params: Option<Value>,
        context: &mut DispatchContext,
    ) -> Result<Value, AutomationFailure>;

    /// Applies an event raised through an [`EventSink`] and returns the
    /// notification describing it, or `None` to suppress it.
    fn prepare_event(&mut self, event: RaisedEvent) -> Option<Notification> {
        Some(event.into_notification())
    }

    /// Releases the automation layer after the dispatch loop stops.
    fn detach(&mut self) {}
}

/// Structured failure returned by a method body.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AutomationFailure {
    /// The surface does not implement the method.
    #[error("method not found: {method}")]
    UnknownMethod {
        /// Requested method name.
        method: String,
    },
    /// The parameters did not match what the method expects.
    #[error("invalid params: {message}")]
    InvalidParams {
        /// Description of the mismatch.
        message: String,
    },
    /// The automation layer reported a failure.
    #[error("{message}")]
    Automation {
        /// Human-readable failure.
        message: String,
        /// Optional structured detail.
        data: Option<Value>,
    },
    /// The worker itself failed while running the method.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable failure.
        message: String,
    },
}

impl AutomationFailure {
    /// Failure for a method the surface does not know.
    #[must_use]
    pub fn unknown_method(method: &str) -> Self {
        Self::UnknownMethod {
            method: method.to_owned(),
        }
    }

    /// Failure for malformed parameters.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Failure originating in the automation layer.
    #[must_use]
    pub fn automation(message: impl Into<String>) -> Self {
        Self::Automation {
            message: message.into(),
            data: None,
        }
    }

    /// Failure inside the worker.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attaches structured detail to an automation failure.
    ///
    /// Other variants carry no data and are returned unchanged.
    #[must_use]
    pub fn with_data(self, detail: Value) -> Self {
        match self {
            Self::Automation { message, .. } => Self::Automation {
                message,
                data: Some(detail),
            },
            other => other,
        }
    }

    /// Wire code reported for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownMethod { .. } => ErrorCode::MethodNotFound,
            Self::InvalidParams { .. } => ErrorCode::InvalidParams,
            Self::Automation { .. } => ErrorCode::AutomationError,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Converts the failure into the error object sent to the host.
    #[must_use]
    pub fn into_rpc_error(self) -> RpcError {
        let code = self.code();
        let message = self.to_string();
        match self {
            Self::Automation { data: Some(detail), .. } => RpcError::new(code, message).with_data(detail),
            _ => RpcError::new(code, message),
        }
    }
}

impl From<WorkerError> for AutomationFailure {
    fn from(error: WorkerError) -> Self {
        Self::internal(error.to_string())
    }
}

/// Decodes method parameters into `T`.
///
/// Absent params decode as an empty object so structs whose fields all have
/// defaults accept a bare call.
///
/// # Errors
///
/// Returns [`AutomationFailure::InvalidParams`] when decoding fails.
pub fn decode_params<T>(params: Option<Value>) -> Result<T, AutomationFailure>
where
    T: DeserializeOwned,
{
    let value = params.unwrap_or_else(|| Value::Object(Map::new()));
    serde_json::from_value(value)
        .map_err(|error| AutomationFailure::invalid_params(error.to_string()))
}

/// An event raised through an [`EventSink`], waiting on the dispatch thread.
#[derive(Debug, Clone, PartialEq)]
pub struct RaisedEvent {
    /// Subscription that raised the event.
    pub subscription: SubscriptionId,
    /// Notification method name.
    pub method: String,
    /// Optional payload.
    pub params: Option<Value>,
}

impl RaisedEvent {
    /// Builds the notification that reports this event unchanged.
    #[must_use]
    pub fn into_notification(self) -> Notification {
        Notification::new(self.method, self.params)
    }
}

/// Worker facilities available to a surface while it runs on the dispatch
/// thread.
#[derive(Debug)]
pub struct DispatchContext {
    output: OutputChannel,
    registry: SubscriptionRegistry,
}

impl DispatchContext {
    pub(crate) const fn new(output: OutputChannel, registry: SubscriptionRegistry) -> Self {
        Self { output, registry }
    }

    /// Writes a notification immediately.
    ///
    /// Notifications sent while a method runs reach the host before that
    /// method's response.
    ///
    /// # Errors
    ///
    /// Returns the output failure; the dispatch loop will hit the same
    /// failure when it writes the response.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), WorkerError> {
        self.output.send(Notification::new(method, params))
    }

    /// Opens a subscription and returns the sink its event source raises
    /// through.
    pub fn subscribe(&mut self, topic: &str) -> EventSink {
        self.registry.subscribe(topic)
    }

    /// Releases a subscription; returns `false` if it was already released.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.registry.release(id)
    }

    /// Live subscriptions.
    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub(crate) const fn subscriptions_mut(&mut self) -> &mut SubscriptionRegistry {
        &mut self.registry
    }

    pub(crate) const fn output(&self) -> &OutputChannel {
        &self.output
    }
}
