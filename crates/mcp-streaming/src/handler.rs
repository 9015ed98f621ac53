//! HTTP-level glue between the streaming server and the MCP dispatcher.
//!
//! Routes the endpoint paths (`POST /mcp`, `GET /sse`, `GET /health`,
//! `OPTIONS`, `DELETE /mcp`), enforces the required headers, validates
//! origins, and picks the delivery mode per request: a single JSON body
//! with `Content-Length`, or an SSE stream when the body is a batch or the
//! `Accept` header lists `text/event-stream` ahead of `application/json`.
//!
//! `GET` streams replay buffered session events after `Last-Event-ID`,
//! then follow the live session channel, emitting `:ping` comments while
//! idle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::dispatcher::McpDispatcher;
use crate::error::{ErrorData, TransportError};
use crate::model::JsonRpcMessage;
use crate::session::SseEventRecord;
use crate::transport::body::SseEvent;
use crate::transport::exchange::HttpExchange;
use crate::transport::server::HttpHandler;
use crate::transport::{
    EVENT_STREAM_MIME_TYPE, HEADER_LAST_EVENT_ID, HEADER_SESSION_ID, JSON_MIME_TYPE,
};

#[derive(Debug, Clone)]
pub struct McpHandlerConfig {
    /// Check the `Origin` header when present.
    pub validate_origin: bool,
    /// Accepted origins; empty means localhost and 127.0.0.1 only.
    pub allowed_origins: Vec<String>,
    /// Interval for `:ping` comments on idle SSE streams.
    pub sse_keep_alive: Option<Duration>,
    pub max_body_size: u64,
    /// Reported by `GET /health`.
    pub service_name: String,
}

impl Default for McpHandlerConfig {
    fn default() -> Self {
        Self {
            validate_origin: true,
            allowed_origins: Vec::new(),
            sse_keep_alive: Some(Duration::from_secs(15)),
            max_body_size: 4 * 1024 * 1024,
            service_name: "mcp-streaming".to_string(),
        }
    }
}

/// The request handler wired into [`StreamingServer`](crate::transport::StreamingServer).
pub struct McpHttpHandler {
    dispatcher: Arc<McpDispatcher>,
    config: McpHandlerConfig,
}

#[async_trait]
impl<S> HttpHandler<S> for McpHttpHandler
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn handle(&self, exchange: &mut HttpExchange<'_, S>) -> Result<(), TransportError> {
        let origin = exchange.header("origin").map(str::to_string);
        apply_cors(exchange, origin.as_deref())?;

        if *exchange.method() == Method::OPTIONS {
            return respond_empty(exchange, StatusCode::NO_CONTENT).await;
        }

        if self.config.validate_origin {
            if let Some(origin) = origin.as_deref() {
                if !self.origin_allowed(origin) {
                    tracing::warn!(%origin, "origin denied");
                    return respond_json(
                        exchange,
                        StatusCode::FORBIDDEN,
                        &json!({"error": "Origin not allowed"}).to_string(),
                    )
                    .await;
                }
            }
        }

        let method = exchange.method().clone();
        let path = exchange.path().to_string();
        match (method, path.as_str()) {
            (Method::GET, "/health") => self.handle_health(exchange).await,
            (Method::POST, "/mcp" | "/") => self.handle_post(exchange).await,
            (Method::GET, "/mcp" | "/sse") => self.handle_stream(exchange).await,
            (Method::DELETE, "/mcp" | "/") => self.handle_delete(exchange).await,
            (_, "/mcp" | "/" | "/sse" | "/health") => {
                respond_empty(exchange, StatusCode::METHOD_NOT_ALLOWED).await
            }
            _ => {
                respond_json(
                    exchange,
                    StatusCode::NOT_FOUND,
                    &json!({"error": "Not found"}).to_string(),
                )
                .await
            }
        }
    }
}

impl McpHttpHandler {
    pub fn new(dispatcher: Arc<McpDispatcher>, config: McpHandlerConfig) -> Self {
        Self { dispatcher, config }
    }

    pub fn dispatcher(&self) -> &Arc<McpDispatcher> {
        &self.dispatcher
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        if !self.config.allowed_origins.is_empty() {
            return self.config.allowed_origins.iter().any(|o| o == origin);
        }
        let Some(rest) = origin
            .strip_prefix("http://")
            .or_else(|| origin.strip_prefix("https://"))
        else {
            return false;
        };
        let host = rest.split([':', '/']).next().unwrap_or("");
        host == "localhost" || host == "127.0.0.1"
    }

    async fn handle_health<S>(
        &self,
        exchange: &mut HttpExchange<'_, S>,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let body = json!({
            "status": "healthy",
            "service": self.config.service_name,
        })
        .to_string();
        respond_json(exchange, StatusCode::OK, &body).await
    }

    async fn handle_post<S>(
        &self,
        exchange: &mut HttpExchange<'_, S>,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let content_type_ok = exchange
            .header("content-type")
            .map(|v| v.to_ascii_lowercase().starts_with(JSON_MIME_TYPE))
            .unwrap_or(false);
        if !content_type_ok {
            return respond_json(
                exchange,
                StatusCode::BAD_REQUEST,
                &json!({"error": "Content-Type must be application/json"}).to_string(),
            )
            .await;
        }

        // A missing Accept header is permissible; a present one must admit
        // both response modes.
        let accept = exchange.header("accept").map(str::to_string);
        if let Some(accept) = accept.as_deref() {
            if !accept_allows_both(accept) {
                return respond_json(
                    exchange,
                    StatusCode::NOT_ACCEPTABLE,
                    &json!({
                        "error":
                            "Accept must include application/json and text/event-stream"
                    })
                    .to_string(),
                )
                .await;
            }
        }

        let session_header = exchange.header(HEADER_SESSION_ID).map(str::to_string);
        let body = match exchange.read_body_to_end(self.config.max_body_size).await {
            Ok(body) => body,
            Err(TransportError::BodyTooLarge { .. }) => {
                return respond_empty(exchange, StatusCode::PAYLOAD_TOO_LARGE).await;
            }
            Err(error) => return Err(error),
        };

        let first_byte = body
            .iter()
            .copied()
            .find(|b| !b.is_ascii_whitespace());
        if first_byte == Some(b'[') {
            return self
                .handle_batch(exchange, &body, session_header.as_deref())
                .await;
        }
        let wants_sse = accept.as_deref().map(accept_prefers_sse).unwrap_or(false);

        let message = match JsonRpcMessage::parse(&body) {
            Ok(message) => message,
            Err(error) => {
                if let Some(session_id) = &session_header {
                    exchange.add_header(HEADER_SESSION_ID, session_id)?;
                }
                return respond_json(exchange, StatusCode::OK, &null_id_error(&error).to_string())
                    .await;
            }
        };

        let outcome = self
            .dispatcher
            .handle_message(message, session_header.as_deref())
            .await;
        let session_echo = outcome.new_session_id.or(session_header);

        let Some(response) = outcome.response else {
            // Notifications and client responses are acknowledged without
            // a body.
            if let Some(session_id) = &session_echo {
                exchange.add_header(HEADER_SESSION_ID, session_id)?;
            }
            return respond_empty(exchange, StatusCode::ACCEPTED).await;
        };

        let encoded = JsonRpcMessage::Response(response).encode();
        if let Some(session_id) = &session_echo {
            exchange.add_header(HEADER_SESSION_ID, session_id)?;
        }
        if wants_sse {
            let record = match &session_echo {
                Some(session_id) => self
                    .dispatcher
                    .sessions()
                    .record_event(session_id, Some("message".to_string()), encoded.clone())
                    .await
                    .ok(),
                None => None,
            };
            let mut event = SseEvent::new(encoded).event_type("message");
            if let Some(record) = record {
                event = event.id(record.id.to_string());
            }
            exchange.write_sse_event(&event).await?;
            exchange.end_stream().await
        } else {
            respond_json(exchange, StatusCode::OK, &encoded).await
        }
    }

    /// A batch always answers over SSE; the whole batch response array is
    /// the first `message` event.
    async fn handle_batch<S>(
        &self,
        exchange: &mut HttpExchange<'_, S>,
        body: &[u8],
        session_header: Option<&str>,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let members = match JsonRpcMessage::parse_batch(body) {
            Ok(members) => members,
            Err(error) => {
                return respond_json(exchange, StatusCode::OK, &null_id_error(&error).to_string())
                    .await;
            }
        };

        let mut session_echo = session_header.map(str::to_string);
        let mut responses: Vec<Value> = Vec::new();
        for member in members {
            match member {
                Err(error) => responses.push(null_id_error(&error)),
                Ok(message) => {
                    let outcome = self
                        .dispatcher
                        .handle_message(message, session_echo.as_deref())
                        .await;
                    if let Some(session_id) = outcome.new_session_id {
                        session_echo = Some(session_id);
                    }
                    if let Some(response) = outcome.response {
                        responses
                            .push(serde_json::to_value(&response).unwrap_or_default());
                    }
                }
            }
        }

        if let Some(session_id) = &session_echo {
            exchange.add_header(HEADER_SESSION_ID, session_id)?;
        }
        let data = Value::Array(responses).to_string();
        let record = match &session_echo {
            Some(session_id) => self
                .dispatcher
                .sessions()
                .record_event(session_id, Some("message".to_string()), data.clone())
                .await
                .ok(),
            None => None,
        };
        let mut event = SseEvent::new(data).event_type("message");
        if let Some(record) = record {
            event = event.id(record.id.to_string());
        }
        exchange.write_sse_event(&event).await?;
        exchange.end_stream().await
    }

    /// Long-lived SSE stream for server-initiated messages, with
    /// `Last-Event-ID` replay.
    async fn handle_stream<S>(
        &self,
        exchange: &mut HttpExchange<'_, S>,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if let Some(accept) = exchange.header("accept") {
            if !(accept.contains(EVENT_STREAM_MIME_TYPE) || accept.contains("*/*")) {
                return respond_json(
                    exchange,
                    StatusCode::NOT_ACCEPTABLE,
                    &json!({"error": "Accept must include text/event-stream"}).to_string(),
                )
                .await;
            }
        }

        let sessions = Arc::clone(self.dispatcher.sessions());
        let session_header = exchange.header(HEADER_SESSION_ID).map(str::to_string);
        let last_event_id = exchange
            .header(HEADER_LAST_EVENT_ID)
            .and_then(parse_last_event_id);

        let session_id = match session_header {
            Some(session_id) if sessions.has_session(&session_id).await => session_id,
            _ => {
                let connection_id = Uuid::new_v4().to_string();
                sessions.create_session(&connection_id, None).await
            }
        };
        sessions.update_activity(&session_id).await;
        tracing::debug!(%session_id, ?last_event_id, "sse stream opened");

        let Ok(mut events) = sessions.subscribe(&session_id).await else {
            return respond_empty(exchange, StatusCode::INTERNAL_SERVER_ERROR).await;
        };
        exchange.add_header(HEADER_SESSION_ID, &session_id)?;
        exchange.start_sse_stream().await?;

        let mut last_written = 0u64;
        if let Some(last_event_id) = last_event_id {
            let replay = sessions
                .events_after(&session_id, last_event_id)
                .await
                .unwrap_or_default();
            for record in replay {
                write_record(exchange, &record).await?;
                last_written = record.id;
            }
            if let Ok(record) = sessions
                .record_event(
                    &session_id,
                    Some("reconnect".to_string()),
                    json!({"sessionId": session_id}).to_string(),
                )
                .await
            {
                write_record(exchange, &record).await?;
                last_written = record.id;
            }
        } else if let Ok(record) = sessions
            .record_event(
                &session_id,
                Some("connected".to_string()),
                json!({"sessionId": session_id}).to_string(),
            )
            .await
        {
            write_record(exchange, &record).await?;
            last_written = record.id;
        }

        let mut keep_alive = self
            .config
            .sse_keep_alive
            .map(|period| tokio::time::interval_at(tokio::time::Instant::now() + period, period));
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(record) => {
                        if record.id > last_written {
                            write_record(exchange, &record).await?;
                            last_written = record.id;
                        }
                    }
                    // Subscriber replaced or session terminated.
                    None => break,
                },
                _ = maybe_tick(&mut keep_alive) => {
                    exchange.write_sse_comment("ping").await?;
                }
            }
        }
        tracing::debug!(%session_id, "sse stream closed");
        exchange.end_stream().await
    }

    async fn handle_delete<S>(
        &self,
        exchange: &mut HttpExchange<'_, S>,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match exchange.header(HEADER_SESSION_ID).map(str::to_string) {
            Some(session_id) => {
                self.dispatcher.sessions().terminate_session(&session_id).await;
                respond_empty(exchange, StatusCode::NO_CONTENT).await
            }
            None => {
                respond_json(
                    exchange,
                    StatusCode::BAD_REQUEST,
                    &json!({"error": "Mcp-Session-Id header required"}).to_string(),
                )
                .await
            }
        }
    }
}

fn apply_cors<S>(
    exchange: &mut HttpExchange<'_, S>,
    origin: Option<&str>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    exchange.add_header("Access-Control-Allow-Origin", origin.unwrap_or("*"))?;
    exchange.add_header("Access-Control-Allow-Methods", "POST, OPTIONS")?;
    exchange.add_header(
        "Access-Control-Allow-Headers",
        "Content-Type, Authorization, Mcp-Session-Id",
    )?;
    exchange.add_header("Access-Control-Max-Age", "86400")?;
    exchange.add_header("Cache-Control", "no-cache, no-store, must-revalidate")?;
    Ok(())
}

/// Both response modes must be acceptable, via explicit types or
/// wildcards.
fn accept_allows_both(accept: &str) -> bool {
    let accept = accept.to_ascii_lowercase();
    let wildcard = accept.contains("*/*");
    (wildcard || accept.contains(JSON_MIME_TYPE))
        && (wildcard || accept.contains(EVENT_STREAM_MIME_TYPE))
}

/// SSE is preferred when `text/event-stream` is listed ahead of
/// `application/json`.
fn accept_prefers_sse(accept: &str) -> bool {
    let accept = accept.to_ascii_lowercase();
    match (
        accept.find(EVENT_STREAM_MIME_TYPE),
        accept.find(JSON_MIME_TYPE),
    ) {
        (Some(sse), Some(json)) => sse < json,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Accept both a bare number and the `<session_id>-<n>` form.
fn parse_last_event_id(value: &str) -> Option<u64> {
    let value = value.trim();
    value
        .parse()
        .ok()
        .or_else(|| value.rsplit('-').next()?.parse().ok())
}

fn null_id_error(error: &ErrorData) -> Value {
    json!({"jsonrpc": "2.0", "id": null, "error": error})
}

async fn write_record<S>(
    exchange: &mut HttpExchange<'_, S>,
    record: &SseEventRecord,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut event = SseEvent::new(record.data.clone()).id(record.id.to_string());
    if let Some(event_type) = &record.event_type {
        event = event.event_type(event_type.clone());
    }
    exchange.write_sse_event(&event).await
}

async fn maybe_tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn respond_empty<S>(
    exchange: &mut HttpExchange<'_, S>,
    status: StatusCode,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    exchange.set_status(status)?;
    exchange.add_header("Content-Length", "0")?;
    exchange.end_stream().await
}

async fn respond_json<S>(
    exchange: &mut HttpExchange<'_, S>,
    status: StatusCode,
    body: &str,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    exchange.set_status(status)?;
    exchange.add_header("Content-Type", JSON_MIME_TYPE)?;
    exchange.add_header("Content-Length", body.len().to_string())?;
    exchange.write_chunk(body.as_bytes()).await?;
    exchange.end_stream().await
}
