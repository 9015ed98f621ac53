//! Streamable HTTP server engine for the Model Context Protocol.
//!
//! The crate is layered bottom-up:
//!
//! * [`transport`] — the HTTP/1.1 engine: ownership-tracked connections,
//!   body framing (identity, chunked, SSE), the per-request exchange state
//!   machine, and the accept/keep-alive server loop.
//! * [`model`] — the JSON-RPC 2.0 codec and MCP data types.
//! * [`session`] — header-carried sessions with replayable, bounded SSE
//!   event buffers.
//! * [`timeout`] — per-request deadlines, progress-based extension, and
//!   cancellation tokens.
//! * [`tools`] — the tool registry: schema validation, concurrency caps,
//!   and timeout-supervised execution.
//! * [`dispatcher`] — the MCP state machine (`initialize` →
//!   `initialized` → ready) and method routing.
//! * [`handler`] — HTTP glue: endpoint paths, CORS, origin validation,
//!   JSON-vs-SSE response mode selection, and `Last-Event-ID` replay.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mcp_streaming::{
//!     Implementation, McpDispatcher, McpHandlerConfig, McpHttpHandler, SessionManager,
//!     StreamingServer, StreamingServerConfig, TimeoutManager, ToolRegistry,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> std::io::Result<()> {
//! let dispatcher = Arc::new(McpDispatcher::new(
//!     Implementation::new("my-server", "1.0.0"),
//!     Arc::new(ToolRegistry::default()),
//!     Arc::new(SessionManager::default()),
//!     Arc::new(TimeoutManager::default()),
//! ));
//! let handler = Arc::new(McpHttpHandler::new(
//!     Arc::clone(&dispatcher),
//!     McpHandlerConfig::default(),
//! ));
//! let server = StreamingServer::bind(StreamingServerConfig::default()).await?;
//! server.serve(handler, CancellationToken::new()).await
//! # }
//! ```

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod model;
pub mod session;
pub mod timeout;
pub mod tools;
pub mod transport;

pub use dispatcher::{ConnectionState, DispatchOutcome, McpConnection, McpDispatcher};
pub use error::{ErrorCode, ErrorData, TransportError};
pub use handler::{McpHandlerConfig, McpHttpHandler};
pub use model::{
    CallToolResult, Capabilities, Content, Implementation, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ParameterKind, ParameterSpec, RequestId, ToolDefinition,
    PROTOCOL_VERSION,
};
pub use session::{SessionManager, SessionManagerConfig};
pub use timeout::{TimeoutConfig, TimeoutManager};
pub use tools::{
    ExecutionContext, ToolArguments, ToolError, ToolExecutor, ToolRegistry, ToolRegistryConfig,
};
pub use transport::{HttpHandler, StreamingServer, StreamingServerConfig};
