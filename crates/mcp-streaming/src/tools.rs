//! Tool registration and execution.
//!
//! Tools implement [`ToolExecutor`] (or are registered as plain async
//! closures via [`ToolRegistry::register_fn`](registry::ToolRegistry::register_fn)).
//! The registry owns the definitions, validates arguments against each
//! tool's parameter schema, enforces the concurrency cap, and runs
//! executors under a timeout watchdog.
//!
//! Tool failures are in-band: every rejection and execution error becomes
//! a [`CallToolResult`] with `isError: true`, never a JSON-RPC error.

pub mod args;
pub mod registry;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

pub use args::ToolArguments;
pub use registry::{ToolRegistry, ToolRegistryConfig, ToolRegistryError};

use crate::model::{CallToolResult, ToolDefinition};

/// Why an executor failed.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    Execution(String),
    #[error("execution cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        ToolError::Execution(message.into())
    }
}

/// Per-execution context handed to the executor.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Unique ID of this execution, also used in execution records.
    pub execution_id: String,
    /// Fired when the request is cancelled or times out; long-running
    /// tools should poll or select on it.
    pub cancellation: CancellationToken,
}

/// A tool the registry can run.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(
        &self,
        args: ToolArguments,
        ctx: ExecutionContext,
    ) -> Result<CallToolResult, ToolError>;
}

/// Stored handler for closure-registered tools.
pub type ToolHandlerFn = Box<
    dyn Fn(ToolArguments, ExecutionContext) -> BoxFuture<'static, Result<CallToolResult, ToolError>>
        + Send
        + Sync,
>;

pub(crate) struct FnExecutor {
    definition: ToolDefinition,
    handler: ToolHandlerFn,
}

impl FnExecutor {
    pub(crate) fn new(definition: ToolDefinition, handler: ToolHandlerFn) -> Self {
        Self {
            definition,
            handler,
        }
    }
}

#[async_trait]
impl ToolExecutor for FnExecutor {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(
        &self,
        args: ToolArguments,
        ctx: ExecutionContext,
    ) -> Result<CallToolResult, ToolError> {
        (self.handler)(args, ctx).await
    }
}
