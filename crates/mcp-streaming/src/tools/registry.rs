//! The tool registry: ownership of definitions, argument validation,
//! concurrency capping, and timeout-supervised execution.
//!
//! With `preemptive_timeout` enabled the watchdog aborts the executor
//! future at the deadline and also honors the caller's cancellation token,
//! so a stuck tool cannot hold its slot. With it disabled the executor
//! runs to completion and the overrun is flagged afterwards; either way
//! the caller sees the same in-band timeout result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use serde_json::Value;

use super::{ExecutionContext, FnExecutor, ToolArguments, ToolError, ToolExecutor, ToolHandlerFn};
use crate::model::{CallToolResult, ToolDefinition};

pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ToolRegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),
}

#[derive(Debug, Clone)]
pub struct ToolRegistryConfig {
    pub max_execution_time: Duration,
    pub max_concurrent_executions: usize,
    /// Validate arguments against the tool schema before executing.
    pub safety_checks_enabled: bool,
    /// Abort executors at the deadline instead of flagging the overrun
    /// after they finish.
    pub preemptive_timeout: bool,
}

impl Default for ToolRegistryConfig {
    fn default() -> Self {
        Self {
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            safety_checks_enabled: true,
            preemptive_timeout: false,
        }
    }
}

struct RegisteredTool {
    definition: ToolDefinition,
    executor: Arc<dyn ToolExecutor>,
}

#[derive(Debug, Clone)]
struct ActiveExecution {
    tool_name: String,
    started: Instant,
    timeout: Duration,
}

pub struct ToolRegistry {
    config: ToolRegistryConfig,
    enabled: AtomicBool,
    tools: RwLock<HashMap<String, RegisteredTool>>,
    /// Execution records; a sync lock so the drop guard can clean up even
    /// when an execution future is dropped mid-await.
    active: Mutex<HashMap<String, ActiveExecution>>,
}

/// Removes the execution record when the execution ends or its future is
/// dropped.
struct ExecutionGuard<'a> {
    active: &'a Mutex<HashMap<String, ActiveExecution>>,
    execution_id: String,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.execution_id);
        }
    }
}

impl ToolRegistry {
    pub fn new(config: ToolRegistryConfig) -> Self {
        Self {
            config,
            enabled: AtomicBool::new(true),
            tools: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ToolRegistryConfig {
        &self.config
    }

    /// Disable or re-enable the whole registry.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Register an executor under its definition's name. Fails if the name
    /// is taken.
    pub async fn register_tool(
        &self,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<(), ToolRegistryError> {
        let definition = executor.definition();
        let mut tools = self.tools.write().await;
        if tools.contains_key(&definition.name) {
            return Err(ToolRegistryError::DuplicateTool(definition.name));
        }
        tracing::debug!(tool = %definition.name, "tool registered");
        tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                executor,
            },
        );
        Ok(())
    }

    /// Register a plain async closure as a tool.
    pub async fn register_fn(
        &self,
        definition: ToolDefinition,
        handler: ToolHandlerFn,
    ) -> Result<(), ToolRegistryError> {
        self.register_tool(Arc::new(FnExecutor::new(definition, handler)))
            .await
    }

    /// Flip one tool's enabled flag. Returns false for unknown names.
    pub async fn set_tool_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut tools = self.tools.write().await;
        match tools.get_mut(name) {
            Some(tool) => {
                tool.definition.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Definitions of all enabled tools, in name order.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut list: Vec<ToolDefinition> = tools
            .values()
            .filter(|t| t.definition.enabled)
            .map(|t| t.definition.clone())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn active_execution_count(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }

    /// Execute a tool by name. Every failure mode is an in-band result
    /// with `isError: true`.
    pub async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
        cancellation: CancellationToken,
    ) -> CallToolResult {
        if !self.enabled.load(Ordering::SeqCst) {
            return CallToolResult::error("Tool registry is disabled");
        }

        let (definition, executor) = {
            let tools = self.tools.read().await;
            match tools.get(name) {
                Some(tool) => (tool.definition.clone(), Arc::clone(&tool.executor)),
                None => return CallToolResult::error(format!("Tool not found: {name}")),
            }
        };
        if !definition.enabled {
            return CallToolResult::error(format!("Tool is disabled: {name}"));
        }

        let arguments = apply_defaults(&definition, arguments);
        if self.config.safety_checks_enabled {
            match definition.validate_arguments(&arguments) {
                Ok(warnings) => {
                    for warning in warnings {
                        tracing::warn!(tool = %name, %warning, "argument warning");
                    }
                }
                Err(message) => {
                    return CallToolResult::error(format!("Invalid arguments: {message}"));
                }
            }
        }

        let execution_id = Uuid::new_v4().to_string();
        let timeout = self.config.max_execution_time;
        {
            let Ok(mut active) = self.active.lock() else {
                return CallToolResult::error("Tool registry is unavailable");
            };
            if active.len() >= self.config.max_concurrent_executions {
                return CallToolResult::error(format!(
                    "Maximum concurrent executions reached ({})",
                    self.config.max_concurrent_executions
                ));
            }
            active.insert(
                execution_id.clone(),
                ActiveExecution {
                    tool_name: name.to_string(),
                    started: Instant::now(),
                    timeout,
                },
            );
        }
        let _guard = ExecutionGuard {
            active: &self.active,
            execution_id: execution_id.clone(),
        };
        tracing::debug!(tool = %name, %execution_id, "tool execution started");

        let args = ToolArguments::from_value(&arguments);
        let ctx = ExecutionContext {
            execution_id: execution_id.clone(),
            cancellation: cancellation.clone(),
        };
        let started = Instant::now();
        let outcome = if self.config.preemptive_timeout {
            tokio::select! {
                result = executor.execute(args, ctx) => Some(result),
                _ = tokio::time::sleep(timeout) => None,
                _ = cancellation.cancelled() => Some(Err(ToolError::Cancelled)),
            }
        } else {
            Some(executor.execute(args, ctx).await)
        };
        let elapsed = started.elapsed();
        drop(_guard);

        let result = match outcome {
            None => {
                tracing::warn!(tool = %name, %execution_id, ?elapsed, "tool execution aborted at deadline");
                CallToolResult::error(format!(
                    "Tool execution timed out after {}ms",
                    timeout.as_millis()
                ))
            }
            Some(result) if elapsed >= timeout => {
                // Inline mode ran past the deadline; the overrun is flagged
                // even though the executor finished.
                let _ = result;
                tracing::warn!(tool = %name, %execution_id, ?elapsed, "tool execution overran deadline");
                CallToolResult::error(format!(
                    "Tool execution timed out after {}ms",
                    timeout.as_millis()
                ))
            }
            Some(Ok(result)) => result,
            Some(Err(ToolError::Cancelled)) => {
                tracing::debug!(tool = %name, %execution_id, "tool execution cancelled");
                CallToolResult::error("Tool execution cancelled")
            }
            Some(Err(ToolError::Execution(message))) => {
                CallToolResult::error(format!("Tool execution failed: {message}"))
            }
        };
        tracing::debug!(tool = %name, %execution_id, is_error = result.is_error(), "tool execution finished");
        result
    }

    /// Executions that have outlived their deadline. Inline mode lets them
    /// run to completion; this surfaces them for logging in the meantime.
    pub fn overdue_executions(&self) -> Vec<String> {
        let now = Instant::now();
        let Ok(active) = self.active.lock() else {
            return Vec::new();
        };
        active
            .values()
            .filter(|e| now.duration_since(e.started) >= e.timeout)
            .map(|e| e.tool_name.clone())
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(ToolRegistryConfig::default())
    }
}

/// Fill in schema defaults for parameters the caller omitted.
fn apply_defaults(definition: &ToolDefinition, arguments: Value) -> Value {
    let mut object = match arguments {
        Value::Object(object) => object,
        Value::Null => serde_json::Map::new(),
        other => return other,
    };
    for (name, spec) in &definition.parameters {
        if let Some(default) = &spec.default {
            object
                .entry(name.clone())
                .or_insert_with(|| default.clone());
        }
    }
    Value::Object(object)
}
