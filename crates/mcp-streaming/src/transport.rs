//! The HTTP/1.1 transport engine.
//!
//! Layered bottom-up: [`Connection`] wraps an accepted socket with an
//! ownership flag and a single teardown path; [`BodyStream`] frames message
//! bodies (identity, chunked, or SSE records); [`HttpExchange`] binds one
//! request/response pair to a connection and drives the response state
//! machine; [`StreamingServer`] accepts connections and runs the per-worker
//! keep-alive loop.

pub mod body;
pub mod connection;
pub mod exchange;
pub mod server;

pub use body::{BodyStream, SseEvent};
pub use connection::Connection;
pub use exchange::{HttpExchange, ResponseFraming, ResponseState};
pub use server::{HttpHandler, StreamingServer, StreamingServerConfig};

/// Session header defined by the MCP streamable HTTP transport.
pub const HEADER_SESSION_ID: &str = "Mcp-Session-Id";
/// Standard SSE resumption header.
pub const HEADER_LAST_EVENT_ID: &str = "Last-Event-ID";

pub const JSON_MIME_TYPE: &str = "application/json";
pub const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";
