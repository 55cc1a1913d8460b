//! JSON-RPC error codes understood by both ends of the bridge.

use std::fmt;

/// Error codes carried in the `error.code` field of a response.
///
/// The first five values are the JSON-RPC 2.0 reserved codes. The
/// [`ErrorCode::AutomationError`] code sits in the implementation-defined
/// server range and marks failures raised by the wrapped automation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The worker received a line that was not valid JSON.
    ParseError,
    /// The message was JSON but not a valid request object.
    InvalidRequest,
    /// The automation surface does not expose the requested method.
    MethodNotFound,
    /// The method exists but rejected its parameters.
    InvalidParams,
    /// The worker failed while executing the method body.
    InternalError,
    /// The wrapped automation layer reported a failure.
    AutomationError,
}

impl ErrorCode {
    /// Numeric value placed on the wire.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::AutomationError => -32000,
        }
    }

    /// Maps a wire value back to a known code.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            -32700 => Some(Self::ParseError),
            -32600 => Some(Self::InvalidRequest),
            -32601 => Some(Self::MethodNotFound),
            -32602 => Some(Self::InvalidParams),
            -32603 => Some(Self::InternalError),
            -32000 => Some(Self::AutomationError),
            _ => None,
        }
    }

    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "parse_error",
            Self::InvalidRequest => "invalid_request",
            Self::MethodNotFound => "method_not_found",
            Self::InvalidParams => "invalid_params",
            Self::InternalError => "internal_error",
            Self::AutomationError => "automation_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
