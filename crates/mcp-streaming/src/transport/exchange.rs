//! One HTTP request/response pair bound to a kept-alive connection.
//!
//! An exchange is constructed from the initial read buffer, which must
//! contain the complete header block (terminated by CRLFCRLF) and may
//! contain body bytes that arrived with it. Body bytes beyond the declared
//! `Content-Length` belong to the next pipelined request and are handed
//! back to the server loop via [`HttpExchange::take_leftover`].
//!
//! The response side is a state machine: `pending → headers_sent →
//! streaming → ended`. Status and headers freeze once sent; writes after
//! `end_stream` are errors.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};

use super::body::{BodyStream, SseEvent, DEFAULT_BUFFER_SIZE};
use super::connection::Connection;
use super::EVENT_STREAM_MIME_TYPE;
use crate::error::TransportError;

/// Where the response currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Pending,
    HeadersSent,
    Streaming,
    Ended,
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFraming {
    ContentLength,
    Chunked,
    Sse,
}

#[derive(Debug)]
pub struct HttpExchange<'c, S> {
    conn: &'c mut Connection<S>,

    // Request side, frozen at construction.
    method: Method,
    uri: String,
    protocol: String,
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    content_length: Option<u64>,
    buffered_body: Bytes,
    leftover: Bytes,
    read_body: BodyStream,
    local_addr: Option<SocketAddr>,

    // Response side.
    status: StatusCode,
    response_headers: Vec<(String, String)>,
    state: ResponseState,
    framing: ResponseFraming,
    write_body: BodyStream,
}

impl<'c, S> HttpExchange<'c, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Parse the request head out of `initial` and bind the exchange to the
    /// connection. `initial` must contain the full header block.
    pub fn new(
        conn: &'c mut Connection<S>,
        initial: &[u8],
        local_addr: Option<SocketAddr>,
        max_uri_length: usize,
    ) -> Result<Self, TransportError> {
        let head_end = find_head_end(initial).ok_or_else(|| {
            TransportError::MalformedRequestHead("missing header terminator".to_string())
        })?;
        let head = &initial[..head_end];
        let trailing = &initial[head_end + 4..];

        let head_text = std::str::from_utf8(head).map_err(|_| {
            TransportError::MalformedRequestHead("request head is not valid UTF-8".to_string())
        })?;
        let mut lines = head_text.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let (method, uri, protocol) = match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(uri), Some(protocol)) => (method, uri, protocol),
            _ => {
                return Err(TransportError::MalformedRequestHead(format!(
                    "invalid request line: {request_line:?}"
                )))
            }
        };
        if uri.len() > max_uri_length {
            return Err(TransportError::UriTooLong {
                length: uri.len(),
                limit: max_uri_length,
            });
        }
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| {
            TransportError::MalformedRequestHead(format!("invalid method: {method:?}"))
        })?;

        let mut headers = HeaderMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                TransportError::MalformedRequestHead(format!("invalid header line: {line:?}"))
            })?;
            let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| {
                TransportError::MalformedRequestHead(format!("invalid header name: {name:?}"))
            })?;
            let value = HeaderValue::from_str(value.trim()).map_err(|_| {
                TransportError::MalformedRequestHead(format!(
                    "invalid value for header {name}"
                ))
            })?;
            headers.append(name, value);
        }

        let mut cookies = HashMap::new();
        for value in headers.get_all(COOKIE) {
            if let Ok(value) = value.to_str() {
                for pair in value.split(';') {
                    if let Some((name, value)) = pair.split_once('=') {
                        cookies.insert(name.trim().to_string(), value.trim().to_string());
                    }
                }
            }
        }

        let content_length = match headers.get(CONTENT_LENGTH) {
            Some(value) => {
                let parsed = value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .ok_or_else(|| {
                        TransportError::MalformedRequestHead(
                            "invalid Content-Length".to_string(),
                        )
                    })?;
                Some(parsed)
            }
            None => None,
        };

        // Split body bytes that arrived with the head from bytes that
        // belong to the next request on this connection.
        let (buffered_body, leftover) = match content_length {
            Some(length) => {
                let take = (length as usize).min(trailing.len());
                (
                    Bytes::copy_from_slice(&trailing[..take]),
                    Bytes::copy_from_slice(&trailing[take..]),
                )
            }
            None => (Bytes::copy_from_slice(trailing), Bytes::new()),
        };

        let protocol = protocol.to_string();
        Ok(Self {
            conn,
            method,
            uri: uri.to_string(),
            protocol,
            headers,
            cookies,
            content_length,
            buffered_body,
            leftover,
            read_body: BodyStream::new(content_length, false, DEFAULT_BUFFER_SIZE),
            local_addr,
            status: StatusCode::OK,
            response_headers: Vec::new(),
            state: ResponseState::Pending,
            framing: ResponseFraming::ContentLength,
            write_body: BodyStream::new(None, false, DEFAULT_BUFFER_SIZE),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The request path without the query string.
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or(&self.uri)
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A request header value as text, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn response_state(&self) -> ResponseState {
        self.state
    }

    pub fn framing(&self) -> ResponseFraming {
        self.framing
    }

    /// Bytes that arrived after this request's body; the start of the next
    /// request head on a kept-alive connection.
    pub fn take_leftover(&mut self) -> Bytes {
        std::mem::take(&mut self.leftover)
    }

    /// Read the next request body chunk: drains bytes buffered at
    /// construction first, then the socket, respecting `Content-Length`.
    pub async fn read_body_chunk(&mut self) -> Result<Bytes, TransportError> {
        if !self.buffered_body.is_empty() {
            let take = self.buffered_body.len().min(DEFAULT_BUFFER_SIZE);
            let chunk = self.buffered_body.split_to(take);
            self.read_body.note_buffered(chunk.len() as u64);
            return Ok(chunk);
        }
        self.read_body.read_chunk(self.conn).await
    }

    pub fn body_complete(&self) -> bool {
        self.buffered_body.is_empty() && self.read_body.is_read_complete()
    }

    /// Collect the whole request body, failing once it exceeds `limit`.
    pub async fn read_body_to_end(&mut self, limit: u64) -> Result<Bytes, TransportError> {
        if let Some(length) = self.content_length {
            if length > limit {
                return Err(TransportError::BodyTooLarge { length, limit });
            }
        }
        let mut out = BytesMut::new();
        loop {
            let chunk = self.read_body_chunk().await?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
            if out.len() as u64 > limit {
                return Err(TransportError::BodyTooLarge {
                    length: out.len() as u64,
                    limit,
                });
            }
        }
        Ok(out.freeze())
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), TransportError> {
        if self.state != ResponseState::Pending {
            return Err(TransportError::HeadersAlreadySent {
                operation: "set_status",
            });
        }
        self.status = status;
        Ok(())
    }

    pub fn add_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), TransportError> {
        if self.state != ResponseState::Pending {
            return Err(TransportError::HeadersAlreadySent {
                operation: "add_header",
            });
        }
        self.response_headers.push((name.into(), value.into()));
        Ok(())
    }

    /// Replace any existing occurrence of `name`, then add it.
    fn set_header(&mut self, name: &str, value: &str) {
        self.response_headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.response_headers.push((name.to_string(), value.to_string()));
    }

    fn has_header(&self, name: &str) -> bool {
        self.response_headers
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Write the status line and headers. Idempotent: the second and later
    /// calls do nothing. Picks chunked framing when no `Content-Length`
    /// header was added and the response is not an SSE stream.
    pub async fn send_headers(&mut self) -> Result<(), TransportError> {
        if self.state != ResponseState::Pending {
            return Ok(());
        }
        if self.framing != ResponseFraming::Sse {
            if self.has_header("content-length") {
                self.framing = ResponseFraming::ContentLength;
            } else {
                self.framing = ResponseFraming::Chunked;
                self.set_header("Transfer-Encoding", "chunked");
            }
        }
        self.write_body = BodyStream::new(
            None,
            self.framing == ResponseFraming::Chunked,
            DEFAULT_BUFFER_SIZE,
        );

        let reason = self.status.canonical_reason().unwrap_or("Unknown");
        let mut head = String::with_capacity(128);
        head.push_str(&format!(
            "{} {} {}\r\n",
            self.protocol,
            self.status.as_u16(),
            reason
        ));
        for (name, value) in &self.response_headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        self.conn.write_all(head.as_bytes()).await?;
        self.state = ResponseState::HeadersSent;
        Ok(())
    }

    /// Write one response body chunk, sending headers first if needed.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self.state {
            ResponseState::Ended => return Err(TransportError::StreamEnded),
            ResponseState::Pending => self.send_headers().await?,
            _ => {}
        }
        self.write_body.write_chunk(self.conn, data).await?;
        self.state = ResponseState::Streaming;
        Ok(())
    }

    /// Switch the response to an SSE stream and send headers.
    ///
    /// Forces `Content-Type: text/event-stream`, `Cache-Control: no-cache`
    /// and `Connection: keep-alive`; SSE bodies are never chunk-framed.
    pub async fn start_sse_stream(&mut self) -> Result<(), TransportError> {
        if self.state != ResponseState::Pending {
            return if self.framing == ResponseFraming::Sse {
                Ok(())
            } else {
                Err(TransportError::HeadersAlreadySent {
                    operation: "start_sse_stream",
                })
            };
        }
        self.framing = ResponseFraming::Sse;
        self.set_header("Content-Type", EVENT_STREAM_MIME_TYPE);
        self.set_header("Cache-Control", "no-cache");
        self.set_header("Connection", "keep-alive");
        self.send_headers().await
    }

    /// Write one SSE record, starting the stream first if needed.
    pub async fn write_sse_event(&mut self, event: &SseEvent) -> Result<(), TransportError> {
        match self.state {
            ResponseState::Ended => return Err(TransportError::StreamEnded),
            ResponseState::Pending => self.start_sse_stream().await?,
            _ => {}
        }
        self.write_body.write_sse_event(self.conn, event).await?;
        self.state = ResponseState::Streaming;
        Ok(())
    }

    /// Write an SSE keep-alive comment line.
    pub async fn write_sse_comment(&mut self, comment: &str) -> Result<(), TransportError> {
        match self.state {
            ResponseState::Ended => return Err(TransportError::StreamEnded),
            ResponseState::Pending => self.start_sse_stream().await?,
            _ => {}
        }
        self.write_body.write_sse_comment(self.conn, comment).await?;
        self.state = ResponseState::Streaming;
        Ok(())
    }

    /// Finish the response. Emits the terminal chunk for chunked framing;
    /// further writes fail with [`TransportError::StreamEnded`].
    pub async fn end_stream(&mut self) -> Result<(), TransportError> {
        if self.state == ResponseState::Ended {
            return Ok(());
        }
        if self.state == ResponseState::Pending {
            self.send_headers().await?;
        }
        self.write_body.end_stream(self.conn).await?;
        self.state = ResponseState::Ended;
        Ok(())
    }

    pub async fn teardown(&mut self) -> Result<(), TransportError> {
        self.conn.teardown().await
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}
