//! Errors surfaced by the supervised link.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tether_protocol::{CodecError, RpcError};
use thiserror::Error;

use crate::state::ConnectionState;

/// Why a worker connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The worker process exited; `code` is `None` when killed by a signal.
    ProcessExited {
        /// Exit code, when one was reported.
        code: Option<i32>,
    },
    /// The worker closed its standard output.
    StreamClosed,
    /// Reading from or writing to the worker failed.
    StreamError(String),
    /// No liveness signal arrived within the heartbeat timeout.
    HeartbeatTimeout {
        /// Observed silence in milliseconds.
        silence_ms: u64,
    },
    /// The worker did not report readiness in time.
    StartupTimeout,
    /// The worker could not be spawned.
    SpawnFailed(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessExited { code: Some(code) } => write!(f, "process exited with code {code}"),
            Self::ProcessExited { code: None } => f.write_str("process terminated by signal"),
            Self::StreamClosed => f.write_str("output stream closed"),
            Self::StreamError(message) => write!(f, "stream error: {message}"),
            Self::HeartbeatTimeout { silence_ms } => {
                write!(f, "no heartbeat for {silence_ms}ms")
            }
            Self::StartupTimeout => f.write_str("worker did not report readiness in time"),
            Self::SpawnFailed(message) => write!(f, "spawn failed: {message}"),
        }
    }
}

/// Errors raised by the supervisor and delivered to callers.
///
/// I/O sources are shared behind [`Arc`] so a single failure can be cloned
/// into every pending call it rejects.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// The worker executable was not found.
    #[error("worker executable not found: {command}")]
    BinaryNotFound {
        /// The command that was not found.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The worker process could not be spawned.
    #[error("failed to spawn worker process: {message}")]
    Spawn {
        /// Description of the spawn failure.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Writing to the worker failed.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// The underlying I/O error, if any.
        #[source]
        source: Option<Arc<io::Error>>,
    },

    /// A request was not answered before its deadline.
    #[error("request {id} ('{method}') timed out after {timeout_ms}ms")]
    Timeout {
        /// Correlation id of the expired call.
        id: i64,
        /// Method of the expired call.
        method: String,
        /// The configured request timeout.
        timeout_ms: u64,
    },

    /// The worker connection was lost while the call was pending.
    #[error("worker disconnected: {reason}")]
    Disconnected {
        /// Why the connection ended.
        reason: DisconnectReason,
    },

    /// The link was stopped deliberately.
    #[error("link was shut down")]
    Shutdown,

    /// The worker answered with a JSON-RPC error.
    #[error("worker returned error: {message} (code: {code})")]
    Application {
        /// The JSON-RPC error code.
        code: i64,
        /// The error message from the worker.
        message: String,
        /// Optional structured data.
        data: Option<Value>,
    },

    /// A request was issued while the link was not connected.
    #[error("worker is not connected (state: {state})")]
    NotConnected {
        /// The state at the time of the call.
        state: ConnectionState,
    },

    /// A call with the same id is already pending.
    #[error("request id {id} is already pending")]
    DuplicateId {
        /// The conflicting id.
        id: i64,
    },

    /// The request could not be encoded.
    #[error("failed to encode request: {0}")]
    Codec(Arc<CodecError>),

    /// The supervisor's control thread has exited.
    #[error("supervisor control thread is unavailable")]
    ControlUnavailable,
}

impl LinkError {
    /// Creates an application error from a JSON-RPC error object.
    #[must_use]
    pub fn from_rpc(error: RpcError) -> Self {
        Self::Application {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }

    /// Classifies a spawn failure, singling out missing executables.
    #[must_use]
    pub fn from_spawn(command: &str, error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::NotFound {
            Self::BinaryNotFound {
                command: command.to_owned(),
                source: Arc::new(error),
            }
        } else {
            Self::Spawn {
                message: format!("{command}: {error}"),
                source: Arc::new(error),
            }
        }
    }

    /// Creates a transport error from an I/O failure.
    #[must_use]
    pub fn transport(message: impl Into<String>, error: io::Error) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Arc::new(error)),
        }
    }

    pub(crate) fn timeout(id: i64, method: &str, timeout: Duration) -> Self {
        Self::Timeout {
            id,
            method: method.to_owned(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns `true` for request deadline expiry.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` when the worker answered with an error.
    #[must_use]
    pub const fn is_application(&self) -> bool {
        matches!(self, Self::Application { .. })
    }

    /// Returns `true` for loss of the worker connection.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

impl From<CodecError> for LinkError {
    fn from(error: CodecError) -> Self {
        Self::Codec(Arc::new(error))
    }
}
