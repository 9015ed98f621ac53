//! MCP method routing and the per-connection protocol state machine.
//!
//! A connection record is created by `initialize` and promoted to `ready`
//! by the `initialized` notification; before that, every request other
//! than `initialize` is refused with `-32000`. Records are keyed by the
//! session the client carries in `Mcp-Session-Id`, so the handshake
//! survives TCP reconnects.
//!
//! `tools/call` runs under the timeout manager: the request is tracked
//! with a cancellation token, and an explicit `notifications/cancelled` or
//! a watchdog expiry preempts the call and answers `-32800`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ErrorData;
use crate::model::{
    CallToolRequestParam, CancelledNotificationParam, Capabilities, Implementation,
    InitializeRequestParam, InitializeResult, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ProgressNotificationParam, RequestId, PROTOCOL_VERSION,
};
use crate::session::SessionManager;
use crate::timeout::TimeoutManager;
use crate::tools::ToolRegistry;

/// Lifecycle of one MCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Initializing,
    Initialized,
    Ready,
    Error,
}

/// Connection record created by `initialize`.
#[derive(Debug, Clone)]
pub struct McpConnection {
    pub connection_id: String,
    pub state: ConnectionState,
    pub protocol_version: String,
    pub client_info: Implementation,
    pub negotiated_capabilities: Capabilities,
}

/// What the HTTP layer should do with a dispatched message.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// The response to send; `None` for notifications and client
    /// responses, which are acknowledged at the HTTP level only.
    pub response: Option<JsonRpcResponse>,
    /// Session created while handling the message (`initialize` only);
    /// the HTTP layer echoes it in `Mcp-Session-Id`.
    pub new_session_id: Option<String>,
}

impl DispatchOutcome {
    fn response(response: JsonRpcResponse) -> Self {
        Self {
            response: Some(response),
            new_session_id: None,
        }
    }

    fn silent() -> Self {
        Self {
            response: None,
            new_session_id: None,
        }
    }
}

/// Routes JSON-RPC messages to the protocol handlers and the tool
/// registry.
pub struct McpDispatcher {
    server_info: Implementation,
    capabilities: Capabilities,
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionManager>,
    timeouts: Arc<TimeoutManager>,
    /// session_id → connection record.
    connections: RwLock<HashMap<String, McpConnection>>,
    /// request_id → session_id for requests currently executing, so the
    /// watchdog can notify the right stream on expiry.
    inflight: RwLock<HashMap<RequestId, String>>,
}

impl McpDispatcher {
    pub fn new(
        server_info: Implementation,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionManager>,
        timeouts: Arc<TimeoutManager>,
    ) -> Self {
        Self {
            server_info,
            capabilities: Capabilities::server_default(),
            registry,
            sessions,
            timeouts,
            connections: RwLock::new(HashMap::new()),
            inflight: RwLock::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn timeouts(&self) -> &Arc<TimeoutManager> {
        &self.timeouts
    }

    pub async fn connection_state(&self, session_id: &str) -> Option<ConnectionState> {
        self.connections
            .read()
            .await
            .get(session_id)
            .map(|c| c.state)
    }

    /// Dispatch one message. `session_id` is the value of the
    /// `Mcp-Session-Id` header, if the client sent one.
    pub async fn handle_message(
        &self,
        message: JsonRpcMessage,
        session_id: Option<&str>,
    ) -> DispatchOutcome {
        if let Some(session_id) = session_id {
            self.sessions.update_activity(session_id).await;
        }
        match message {
            JsonRpcMessage::Request(request) => self.handle_request(request, session_id).await,
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification, session_id).await;
                DispatchOutcome::silent()
            }
            JsonRpcMessage::Response(response) => {
                tracing::debug!(id = %response.id, "ignoring client response");
                DispatchOutcome::silent()
            }
        }
    }

    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        session_id: Option<&str>,
    ) -> DispatchOutcome {
        tracing::debug!(id = %request.id, method = %request.method, "request");
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request, session_id).await,
            "tools/list" => match self.require_ready(session_id).await {
                Ok(()) => self.handle_list_tools(request).await,
                Err(error) => {
                    DispatchOutcome::response(JsonRpcResponse::error(request.id, error))
                }
            },
            "tools/call" => match self.require_ready(session_id).await {
                Ok(()) => self.handle_call_tool(request, session_id).await,
                Err(error) => {
                    DispatchOutcome::response(JsonRpcResponse::error(request.id, error))
                }
            },
            method
                if method.starts_with("resources/") || method.starts_with("prompts/") =>
            {
                DispatchOutcome::response(JsonRpcResponse::error(
                    request.id,
                    ErrorData::new(
                        crate::error::ErrorCode::METHOD_NOT_FOUND,
                        format!("Method not implemented: {method}"),
                        None,
                    ),
                ))
            }
            method => DispatchOutcome::response(JsonRpcResponse::error(
                request.id,
                ErrorData::method_not_found(method),
            )),
        }
    }

    /// Requests other than `initialize` are legal only once the handshake
    /// finished.
    async fn require_ready(&self, session_id: Option<&str>) -> Result<(), ErrorData> {
        let Some(session_id) = session_id else {
            return Err(ErrorData::not_initialized());
        };
        match self.connection_state(session_id).await {
            Some(ConnectionState::Ready) => Ok(()),
            _ => Err(ErrorData::not_initialized()),
        }
    }

    async fn handle_initialize(
        &self,
        request: JsonRpcRequest,
        session_id: Option<&str>,
    ) -> DispatchOutcome {
        // Strict: a connection that already initialized must not do it
        // again.
        if let Some(session_id) = session_id {
            if self.connections.read().await.contains_key(session_id) {
                return DispatchOutcome::response(JsonRpcResponse::error(
                    request.id,
                    ErrorData::already_initialized(),
                ));
            }
        }

        let params: InitializeRequestParam =
            match serde_json::from_value(request.params.unwrap_or(Value::Null)) {
                Ok(params) => params,
                Err(error) => {
                    return DispatchOutcome::response(JsonRpcResponse::error(
                        request.id,
                        ErrorData::invalid_params(format!("invalid initialize params: {error}")),
                    ));
                }
            };

        if params.protocol_version != PROTOCOL_VERSION {
            return DispatchOutcome::response(JsonRpcResponse::error(
                request.id,
                ErrorData::unsupported_protocol_version(&params.protocol_version),
            ));
        }

        let negotiated = self.capabilities.negotiate(&params.capabilities);
        let connection_id = Uuid::new_v4().to_string();

        // Reuse the carried session when the client brought a live one;
        // register a fresh session otherwise.
        let session_id = match session_id {
            Some(existing) if self.sessions.has_session(existing).await => existing.to_string(),
            _ => {
                let client_info = serde_json::to_value(&params.client_info).ok();
                self.sessions.create_session(&connection_id, client_info).await
            }
        };

        let connection = McpConnection {
            connection_id,
            state: ConnectionState::Initialized,
            protocol_version: params.protocol_version.clone(),
            client_info: params.client_info.clone(),
            negotiated_capabilities: negotiated,
        };
        self.connections
            .write()
            .await
            .insert(session_id.clone(), connection);
        tracing::info!(
            %session_id,
            client = %params.client_info.name,
            "connection initialized"
        );

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
        };
        // InitializeResult serialization cannot fail.
        let result = serde_json::to_value(result).unwrap_or_default();
        DispatchOutcome {
            response: Some(JsonRpcResponse::success(request.id, result)),
            new_session_id: Some(session_id),
        }
    }

    async fn handle_list_tools(&self, request: JsonRpcRequest) -> DispatchOutcome {
        let tools: Vec<Value> = self
            .registry
            .list_tools()
            .await
            .iter()
            .map(|t| t.listing())
            .collect();
        DispatchOutcome::response(JsonRpcResponse::success(
            request.id,
            json!({ "tools": tools }),
        ))
    }

    async fn handle_call_tool(
        &self,
        request: JsonRpcRequest,
        session_id: Option<&str>,
    ) -> DispatchOutcome {
        let params: CallToolRequestParam =
            match serde_json::from_value(request.params.unwrap_or(Value::Null)) {
                Ok(params) => params,
                Err(error) => {
                    return DispatchOutcome::response(JsonRpcResponse::error(
                        request.id,
                        ErrorData::invalid_params(format!("invalid tools/call params: {error}")),
                    ));
                }
            };

        let token = self
            .timeouts
            .add_request(request.id.clone(), &request.method, None)
            .await;
        if let Some(session_id) = session_id {
            self.inflight
                .write()
                .await
                .insert(request.id.clone(), session_id.to_string());
        }

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(id = %request.id, tool = %params.name, "call preempted");
                JsonRpcResponse::error(
                    request.id.clone(),
                    ErrorData::cancelled("Request cancelled"),
                )
            }
            result = self.registry.execute_tool(
                &params.name,
                params.arguments,
                token.clone(),
            ) => {
                // Tool failures stay in-band; this is a success response
                // even when the result carries isError.
                match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(request.id.clone(), value),
                    Err(error) => JsonRpcResponse::error(
                        request.id.clone(),
                        ErrorData::tool_execution_failed(format!(
                            "failed to encode tool result: {error}"
                        )),
                    ),
                }
            }
        };

        self.timeouts.complete_request(&request.id).await;
        self.inflight.write().await.remove(&request.id);
        DispatchOutcome::response(response)
    }

    async fn handle_notification(
        &self,
        notification: JsonRpcNotification,
        session_id: Option<&str>,
    ) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => {
                let Some(session_id) = session_id else {
                    tracing::debug!("initialized notification without session");
                    return;
                };
                let mut connections = self.connections.write().await;
                match connections.get_mut(session_id) {
                    Some(connection)
                        if connection.state == ConnectionState::Initialized =>
                    {
                        connection.state = ConnectionState::Ready;
                        tracing::info!(%session_id, "connection ready");
                    }
                    _ => {
                        tracing::debug!(%session_id, "unexpected initialized notification");
                    }
                }
            }
            "notifications/progress" => {
                let params: Option<ProgressNotificationParam> = notification
                    .params
                    .and_then(|p| serde_json::from_value(p).ok());
                if let Some(params) = params {
                    let reset = self.timeouts.update_progress(&params.progress_token).await;
                    tracing::debug!(
                        token = %params.progress_token,
                        progress = params.progress,
                        reset,
                        "progress"
                    );
                }
            }
            "notifications/cancelled" => {
                let params: Option<CancelledNotificationParam> = notification
                    .params
                    .and_then(|p| serde_json::from_value(p).ok());
                if let Some(params) = params {
                    self.cancel_request(&params.request_id, "cancelled").await;
                }
            }
            method => {
                tracing::debug!(%method, "ignoring notification");
            }
        }
    }

    /// Cancel a pending request and tell the session's stream about it.
    async fn cancel_request(&self, request_id: &RequestId, reason: &str) {
        // Snapshot the owning session before firing the token; the call
        // task drops its inflight entry as soon as it wakes.
        let session_id = self.inflight.read().await.get(request_id).cloned();
        if !self.timeouts.cancel_request(request_id).await {
            tracing::debug!(id = %request_id, "cancel for unknown request");
            return;
        }
        tracing::info!(id = %request_id, reason, "request cancelled");
        if let Some(session_id) = session_id {
            self.notify_cancelled(&session_id, request_id, reason).await;
        }
    }

    async fn notify_cancelled(&self, session_id: &str, request_id: &RequestId, reason: &str) {
        let notification = JsonRpcNotification::new("notifications/cancelled").with_params(json!({
            "requestId": request_id.as_str(),
            "reason": reason,
        }));
        let data = JsonRpcMessage::Notification(notification).encode();
        if let Err(error) = self
            .sessions
            .publish_event(session_id, Some("message".to_string()), data)
            .await
        {
            tracing::warn!(%session_id, %error, "failed to publish cancellation");
        }
    }

    /// One background maintenance pass: expire pending requests (emitting
    /// `notifications/cancelled` with reason `timeout`), sweep idle
    /// sessions, drop stale cancelled entries, and log overdue inline
    /// executions.
    pub async fn run_maintenance(&self) {
        let inflight = self.inflight.read().await.clone();
        let expired = self.timeouts.check_expired_requests().await;
        for request_id in expired {
            tracing::info!(id = %request_id, "request expired");
            if let Some(session_id) = inflight.get(&request_id) {
                self.notify_cancelled(session_id, &request_id, "timeout").await;
            }
        }
        self.sessions.cleanup_expired_sessions().await;
        self.timeouts.cleanup_completed_requests().await;
        for tool in self.registry.overdue_executions() {
            tracing::warn!(%tool, "execution past its deadline");
        }
    }

    /// Run [`run_maintenance`](Self::run_maintenance) on an interval until
    /// the token is cancelled.
    pub async fn maintenance_loop(
        &self,
        period: std::time::Duration,
        ct: tokio_util::sync::CancellationToken,
    ) {
        let mut timer = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ct.cancelled() => break,
                _ = timer.tick() => self.run_maintenance().await,
            }
        }
    }
}
