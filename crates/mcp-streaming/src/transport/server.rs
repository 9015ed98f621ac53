//! Accept loop and per-connection keep-alive loop.
//!
//! One worker task per accepted connection; workers share nothing and
//! process requests strictly sequentially. Finished workers are reaped
//! from the [`JoinSet`] before each accept. A [`Semaphore`] bounds the
//! number of live connections.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::connection::Connection;
use super::exchange::{HttpExchange, ResponseFraming, ResponseState};
use crate::error::TransportError;

/// Upper bound on a request head; a head that grows past this is rejected.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Request handler invoked once per exchange.
#[async_trait]
pub trait HttpHandler<S>: Send + Sync
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn handle(&self, exchange: &mut HttpExchange<'_, S>) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct StreamingServerConfig {
    /// Service name used in logs and the health response.
    pub name: String,
    pub address: SocketAddr,
    pub max_concurrent_connections: usize,
    /// 0 means unlimited requests per connection.
    pub max_requests_per_connection: usize,
    pub max_request_body_size: u64,
    pub max_request_uri_length: usize,
    /// When false every response closes the connection.
    pub tcp_keep_alive: bool,
}

impl Default for StreamingServerConfig {
    fn default() -> Self {
        Self {
            name: "mcp-streaming".to_string(),
            address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_concurrent_connections: 100,
            max_requests_per_connection: 0,
            max_request_body_size: 4 * 1024 * 1024,
            max_request_uri_length: 8 * 1024,
            tcp_keep_alive: true,
        }
    }
}

/// The HTTP/1.1 accept loop.
pub struct StreamingServer {
    config: StreamingServerConfig,
    listener: TcpListener,
}

impl StreamingServer {
    pub async fn bind(config: StreamingServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.address).await?;
        tracing::info!(
            name = %config.name,
            address = %listener.local_addr()?,
            "server listening"
        );
        Ok(Self { config, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &StreamingServerConfig {
        &self.config
    }

    /// Run until the token is cancelled. Each accepted socket is wrapped in
    /// a [`Connection`] and moved into its worker task.
    pub async fn serve<H>(self, handler: Arc<H>, ct: CancellationToken) -> io::Result<()>
    where
        H: HttpHandler<TcpStream> + 'static,
    {
        let limit = Arc::new(Semaphore::new(self.config.max_concurrent_connections.max(1)));
        let mut workers: JoinSet<()> = JoinSet::new();
        let local_addr = self.listener.local_addr().ok();

        loop {
            // Reap finished workers before each accept.
            while workers.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = ct.cancelled() => break,
                permit = Arc::clone(&limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let (stream, peer) = tokio::select! {
                _ = ct.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(error) => {
                        tracing::warn!(%error, "accept failed");
                        continue;
                    }
                },
            };
            tracing::debug!(%peer, "connection accepted");

            let handler = Arc::clone(&handler);
            let config = self.config.clone();
            workers.spawn(async move {
                let _permit = permit;
                let conn = Connection::from_tcp(stream);
                run_connection(conn, handler, config, local_addr).await;
            });
        }

        tracing::info!(name = %self.config.name, "server shutting down");
        workers.shutdown().await;
        Ok(())
    }
}

/// Per-connection keep-alive loop.
///
/// Reads request heads until the CRLFCRLF terminator, builds an exchange,
/// hands it to the handler, then either loops or closes depending on
/// `Connection: close`, the per-connection request cap, and whether the
/// response was an SSE stream (whose end is the connection's end).
pub async fn run_connection<S, H>(
    mut conn: Connection<S>,
    handler: Arc<H>,
    config: StreamingServerConfig,
    local_addr: Option<SocketAddr>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: HttpHandler<S>,
{
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut served: usize = 0;

    loop {
        // Read until the head terminator appears; EOF means the client is
        // done with this connection.
        loop {
            if find_head_end(&buffer).is_some() {
                break;
            }
            if buffer.len() > MAX_HEAD_SIZE {
                let _ = write_bare_response(
                    &mut conn,
                    StatusCode::BAD_REQUEST,
                    "request head too large",
                )
                .await;
                let _ = conn.teardown().await;
                return;
            }
            let mut scratch = [0u8; 4 * 1024];
            match conn.read(&mut scratch).await {
                Ok(0) => {
                    let _ = conn.teardown().await;
                    return;
                }
                Ok(n) => buffer.extend_from_slice(&scratch[..n]),
                Err(error) => {
                    if !error.is_clean_close() {
                        tracing::warn!(%error, "read failed");
                    }
                    let _ = conn.teardown().await;
                    return;
                }
            }
        }

        let initial = buffer.split().freeze();
        let mut exchange = match HttpExchange::new(
            &mut conn,
            &initial,
            local_addr,
            config.max_request_uri_length,
        ) {
            Ok(exchange) => exchange,
            Err(error @ TransportError::UriTooLong { .. }) => {
                tracing::debug!(%error, "rejecting request");
                let _ = write_bare_response(
                    &mut conn,
                    StatusCode::URI_TOO_LONG,
                    "URI too long",
                )
                .await;
                let _ = conn.teardown().await;
                return;
            }
            Err(error) => {
                tracing::debug!(%error, "rejecting request");
                let _ = write_bare_response(
                    &mut conn,
                    StatusCode::BAD_REQUEST,
                    "malformed request",
                )
                .await;
                let _ = conn.teardown().await;
                return;
            }
        };

        if exchange.content_length().unwrap_or(0) > config.max_request_body_size {
            let _ = exchange.set_status(StatusCode::PAYLOAD_TOO_LARGE);
            let _ = exchange.add_header("Content-Length", "0");
            let _ = exchange.add_header("Connection", "close");
            let _ = exchange.end_stream().await;
            let _ = exchange.teardown().await;
            return;
        }

        let client_wants_close = exchange
            .header("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false);

        if let Err(error) = handler.handle(&mut exchange).await {
            if !error.is_clean_close() {
                tracing::warn!(%error, "handler failed");
                if exchange.response_state() == ResponseState::Pending {
                    let _ = exchange.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                    let _ = exchange.add_header("Content-Length", "0");
                }
                let _ = exchange.end_stream().await;
            }
            let _ = exchange.teardown().await;
            return;
        }

        let was_sse = exchange.framing() == ResponseFraming::Sse
            && exchange.response_state() != ResponseState::Pending;
        let _ = exchange.end_stream().await;

        // Drain whatever part of the request body the handler left unread,
        // so the next head starts at a message boundary.
        while !exchange.body_complete() {
            match exchange.read_body_chunk().await {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(_) => {}
                Err(_) => {
                    let _ = exchange.teardown().await;
                    return;
                }
            }
        }

        let leftover = exchange.take_leftover();
        drop(exchange);
        served += 1;

        let close = client_wants_close
            || was_sse
            || !config.tcp_keep_alive
            || (config.max_requests_per_connection > 0
                && served >= config.max_requests_per_connection);
        if close {
            let _ = conn.teardown().await;
            return;
        }
        buffer = BytesMut::from(&leftover[..]);
    }
}

async fn write_bare_response<S>(
    conn: &mut Connection<S>,
    status: StatusCode,
    body: &str,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reason = status.canonical_reason().unwrap_or("Unknown");
    let text = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.as_u16(),
        reason,
        body.len(),
        body
    );
    conn.write_all(text.as_bytes()).await
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}
