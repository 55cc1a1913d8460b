//! JSON-RPC 2.0 message shapes exchanged over the worker's standard streams.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};

use crate::codes::ErrorCode;

/// Protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names reserved for transport plumbing.
pub mod methods {
    /// Periodic liveness signal sent by the worker.
    pub const HEARTBEAT: &str = "heartbeat";
    /// Sent once by the worker when its dispatch loop accepts requests.
    pub const READY: &str = "ready";
    /// Sent by the host to ask the worker to drain and exit.
    pub const EXIT: &str = "exit";

    /// Returns `true` for notifications that never reach application listeners.
    #[must_use]
    pub fn is_transport(method: &str) -> bool {
        matches!(method, HEARTBEAT | READY | EXIT)
    }
}

/// A call that expects exactly one [`Response`] carrying the same id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Strictly positive correlation id.
    pub id: i64,
    /// The method to invoke.
    pub method: String,
    /// Optional parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Creates a request with an explicit id.
    #[must_use]
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// A fire-and-forget message without an id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Event or command name.
    pub method: String,
    /// Optional payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Creates a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Builds the periodic heartbeat notification.
    #[must_use]
    pub fn heartbeat(sequence: u64) -> Self {
        Self::new(methods::HEARTBEAT, Some(json!({ "seq": sequence })))
    }

    /// Builds the readiness notification announcing the worker's pid.
    #[must_use]
    pub fn ready(pid: u32, version: &str) -> Self {
        Self::new(
            methods::READY,
            Some(json!({ "pid": pid, "version": version })),
        )
    }

    /// Builds the graceful shutdown notification.
    #[must_use]
    pub fn exit() -> Self {
        Self::new(methods::EXIT, None)
    }

    /// Returns `true` when this notification is transport plumbing.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        methods::is_transport(&self.method)
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Creates an error object from a known code.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Returns the known code, if the numeric value is one.
    #[must_use]
    pub fn known_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

/// Exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// The call succeeded; `null` is a valid result.
    Result(Value),
    /// The call failed at the application level.
    Error(RpcError),
}

/// Reply to a [`Request`], matched purely by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request being answered.
    pub id: i64,
    /// Result or error.
    pub outcome: ResponseOutcome,
}

impl Response {
    /// Builds a successful response.
    #[must_use]
    pub fn success(id: i64, result: Value) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Result(result),
        }
    }

    /// Builds an error response.
    #[must_use]
    pub fn failure(id: i64, error: RpcError) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Error(error),
        }
    }

    /// Converts the outcome into a standard `Result`.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.outcome {
            ResponseOutcome::Result(value) => Ok(value),
            ResponseOutcome::Error(error) => Err(error),
        }
    }
}

impl Serialize for Response {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Response", 2)?;
        state.serialize_field("id", &self.id)?;
        match &self.outcome {
            ResponseOutcome::Result(value) => state.serialize_field("result", value)?,
            ResponseOutcome::Error(error) => state.serialize_field("error", error)?,
        }
        state.end()
    }
}

/// Any message that can appear on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    /// A call expecting a response.
    Request(Request),
    /// A reply to an earlier call.
    Response(Response),
    /// An id-less event or command.
    Notification(Notification),
}

impl From<Request> for ProtocolMessage {
    fn from(value: Request) -> Self {
        Self::Request(value)
    }
}

impl From<Response> for ProtocolMessage {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

impl From<Notification> for ProtocolMessage {
    fn from(value: Notification) -> Self {
        Self::Notification(value)
    }
}
