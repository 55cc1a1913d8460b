//! Line framing, id allocation, and tolerant parsing.
//!
//! Framing is a single newline per message. `serde_json` escapes control
//! characters inside strings, so a newline in the payload never reaches the
//! wire raw and can never be mistaken for a frame boundary.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::message::{
    JSONRPC_VERSION, Notification, ProtocolMessage, Request, Response, ResponseOutcome, RpcError,
};

/// Errors raised while encoding a message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The message or its parameters could not be serialised.
    #[error("failed to encode protocol message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Monotonic request id source owned by one session.
///
/// Ids start at 1 and are never reset for the allocator's lifetime, so an id
/// cannot be reused while a call carrying it is still outstanding.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicI64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Creates an allocator whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Hands out the next id.
    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Allocates an id and encodes a request line for it.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the parameters cannot be serialised.
    pub fn serialize_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<EncodedRequest, CodecError> {
        let request = Request::new(self.next_id(), method, params);
        let line = encode_line(&ProtocolMessage::Request(request.clone()))?;
        Ok(EncodedRequest {
            id: request.id,
            line,
        })
    }
}

/// A request ready to be written to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRequest {
    /// Correlation id assigned to the request.
    pub id: i64,
    /// Newline-terminated wire line.
    pub line: String,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    jsonrpc: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

fn encode_body<T: Serialize>(body: &T) -> Result<String, CodecError> {
    let mut line = serde_json::to_string(&Envelope {
        jsonrpc: JSONRPC_VERSION,
        body,
    })?;
    line.push('\n');
    Ok(line)
}

/// Encodes a message as a single newline-terminated line.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialisation fails.
pub fn encode_line(message: &ProtocolMessage) -> Result<String, CodecError> {
    match message {
        ProtocolMessage::Request(request) => encode_body(request),
        ProtocolMessage::Response(response) => encode_body(response),
        ProtocolMessage::Notification(notification) => encode_body(notification),
    }
}

/// Structural kinds recognised by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Carries both a numeric `id` and a `method`.
    Request,
    /// Carries a numeric `id` and no `method`.
    Response,
    /// Carries a `method` and no `id`.
    Notification,
}

fn has_numeric_id(object: &Map<String, Value>) -> bool {
    object.get("id").and_then(Value::as_i64).is_some()
}

fn has_method(object: &Map<String, Value>) -> bool {
    object.get("method").is_some_and(Value::is_string)
}

/// Returns `true` iff the object has a numeric `id` and no `method`.
#[must_use]
pub fn is_response(object: &Map<String, Value>) -> bool {
    has_numeric_id(object) && !object.contains_key("method")
}

/// Returns `true` iff the object has a `method` and no `id`.
#[must_use]
pub fn is_notification(object: &Map<String, Value>) -> bool {
    has_method(object) && !object.contains_key("id")
}

/// Classifies a decoded JSON object, or `None` when it fits no shape.
#[must_use]
pub fn classify(object: &Map<String, Value>) -> Option<MessageKind> {
    if is_response(object) {
        Some(MessageKind::Response)
    } else if is_notification(object) {
        Some(MessageKind::Notification)
    } else if has_numeric_id(object) && has_method(object) {
        Some(MessageKind::Request)
    } else {
        None
    }
}

/// Parses one wire line.
///
/// Blank lines, invalid JSON, a missing or wrong `jsonrpc` tag, and objects
/// that fit no message shape all yield `None`; callers discard them.
#[must_use]
pub fn parse_message(line: &str) -> Option<ProtocolMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: Value = serde_json::from_str(trimmed).ok()?;
    let object = value.as_object()?;
    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return None;
    }

    match classify(object)? {
        MessageKind::Request => decode_request(object).map(ProtocolMessage::Request),
        MessageKind::Response => decode_response(object).map(ProtocolMessage::Response),
        MessageKind::Notification => {
            decode_notification(object).map(ProtocolMessage::Notification)
        }
    }
}

fn params_of(object: &Map<String, Value>) -> Option<Value> {
    object.get("params").filter(|value| !value.is_null()).cloned()
}

fn decode_request(object: &Map<String, Value>) -> Option<Request> {
    let id = object.get("id").and_then(Value::as_i64)?;
    if id <= 0 {
        return None;
    }
    let method = object.get("method").and_then(Value::as_str)?;
    Some(Request::new(id, method, params_of(object)))
}

fn decode_response(object: &Map<String, Value>) -> Option<Response> {
    let id = object.get("id").and_then(Value::as_i64)?;
    let outcome = match (object.get("result"), object.get("error")) {
        (Some(result), None) => ResponseOutcome::Result(result.clone()),
        (None, Some(error)) => {
            ResponseOutcome::Error(serde_json::from_value::<RpcError>(error.clone()).ok()?)
        }
        _ => return None,
    };
    Some(Response { id, outcome })
}

fn decode_notification(object: &Map<String, Value>) -> Option<Notification> {
    let method = object.get("method").and_then(Value::as_str)?;
    Some(Notification::new(method, params_of(object)))
}
