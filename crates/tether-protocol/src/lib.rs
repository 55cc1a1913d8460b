//! Line-delimited JSON-RPC 2.0 codec shared by the tether host and worker.
//!
//! Every message travels as one UTF-8 JSON object per line. The codec owns
//! three concerns:
//!
//! - [`message`]: the typed wire shapes ([`Request`], [`Response`],
//!   [`Notification`]) and the [`ProtocolMessage`] union over them.
//! - [`codec`]: id allocation, line encoding, and the tolerant parser that
//!   turns stray or malformed bytes into `None` instead of an error.
//! - [`codes`]: the standard and domain-specific error codes.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use tether_protocol::{IdAllocator, ProtocolMessage, parse_message};
//!
//! let ids = IdAllocator::new();
//! let encoded = ids
//!     .serialize_request("dial", Some(json!({"number": "123"})))
//!     .expect("request encodes");
//!
//! match parse_message(&encoded.line) {
//!     Some(ProtocolMessage::Request(request)) => assert_eq!(request.method, "dial"),
//!     other => panic!("unexpected message: {other:?}"),
//! }
//! ```

pub mod codec;
pub mod codes;
pub mod message;

pub use codec::{
    CodecError, EncodedRequest, IdAllocator, MessageKind, classify, encode_line, is_notification,
    is_response, parse_message,
};
pub use codes::ErrorCode;
pub use message::{
    JSONRPC_VERSION, Notification, ProtocolMessage, Request, Response, ResponseOutcome, RpcError,
    methods,
};
