//! Error types for the transport and protocol layers.
//!
//! Two families live here. [`TransportError`] covers HTTP-level failures:
//! socket I/O, malformed request heads, illegal response-state transitions.
//! [`ErrorData`] is the JSON-RPC 2.0 error object that travels on the wire;
//! protocol failures never tear down a connection, they become an
//! [`ErrorData`] inside a response.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const PARSE_ERROR: Self = Self(-32700);
    pub const INVALID_REQUEST: Self = Self(-32600);
    pub const METHOD_NOT_FOUND: Self = Self(-32601);
    pub const INVALID_PARAMS: Self = Self(-32602);
    pub const INTERNAL_ERROR: Self = Self(-32603);

    /// Server has not completed the `initialize` handshake.
    pub const NOT_INITIALIZED: Self = Self(-32000);
    /// A second `initialize` arrived on an already-initialized connection.
    pub const ALREADY_INITIALIZED: Self = Self(-32001);
    pub const UNSUPPORTED_PROTOCOL_VERSION: Self = Self(-32002);
    pub const TOOL_NOT_FOUND: Self = Self(-32003);
    pub const TOOL_EXECUTION_FAILED: Self = Self(-32004);
    /// The request was cancelled or timed out before completion.
    pub const REQUEST_CANCELLED: Self = Self(-32800);
}

/// The error object carried by a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: ErrorCode,
    pub message: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorData {
    pub fn new(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        data: Option<Value>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn parse_error(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message, None)
    }

    pub fn invalid_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::INVALID_REQUEST, message, None)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
            None,
        )
    }

    pub fn invalid_params(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message, None)
    }

    pub fn internal_error(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, message, None)
    }

    pub fn not_initialized() -> Self {
        Self::new(
            ErrorCode::NOT_INITIALIZED,
            "Server not initialized",
            None,
        )
    }

    pub fn already_initialized() -> Self {
        Self::new(
            ErrorCode::ALREADY_INITIALIZED,
            "Server already initialized",
            None,
        )
    }

    pub fn unsupported_protocol_version(requested: &str) -> Self {
        Self::new(
            ErrorCode::UNSUPPORTED_PROTOCOL_VERSION,
            format!("Unsupported protocol version: {requested}"),
            None,
        )
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(
            ErrorCode::TOOL_NOT_FOUND,
            format!("Tool not found: {name}"),
            None,
        )
    }

    pub fn tool_execution_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::TOOL_EXECUTION_FAILED, message, None)
    }

    pub fn cancelled(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::REQUEST_CANCELLED, reason, None)
    }
}

impl std::fmt::Display for ErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.0, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({data})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorData {}

/// HTTP-level failure raised by the connection, body stream, exchange, or
/// server loop.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URI too long: {length} bytes exceeds limit of {limit}")]
    UriTooLong { length: usize, limit: usize },

    #[error("malformed request head: {0}")]
    MalformedRequestHead(String),

    #[error("request body of {length} bytes exceeds limit of {limit}")]
    BodyTooLarge { length: u64, limit: u64 },

    #[error("{operation} is not legal once response headers are sent")]
    HeadersAlreadySent { operation: &'static str },

    #[error("response stream already ended")]
    StreamEnded,

    #[error("connection closed by peer")]
    ConnectionClosed,
}

impl TransportError {
    /// Whether this error is the ordinary end of a kept-alive connection
    /// rather than something worth logging.
    ///
    /// Matched by message text so that wrapped I/O errors from any layer
    /// classify the same way: `EOF`, `closed`, `invalid descriptor`, and
    /// `not associated with a socket` all count as a clean client close.
    pub fn is_clean_close(&self) -> bool {
        match self {
            TransportError::ConnectionClosed => true,
            TransportError::Io(err) => {
                let text = err.to_string();
                text.contains("EOF")
                    || text.contains("closed")
                    || text.contains("invalid descriptor")
                    || text.contains("not associated with a socket")
                    || matches!(
                        err.kind(),
                        std::io::ErrorKind::UnexpectedEof
                            | std::io::ErrorKind::ConnectionReset
                            | std::io::ErrorKind::BrokenPipe
                    )
            }
            _ => false,
        }
    }
}
