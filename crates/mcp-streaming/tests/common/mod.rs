//! Shared helpers: a test server with demo tools, and a raw-TCP HTTP/SSE
//! client that speaks exactly what goes over the wire.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mcp_streaming::{
    CallToolResult, ExecutionContext, Implementation, McpDispatcher, McpHandlerConfig,
    McpHttpHandler, ParameterSpec, SessionManager, StreamingServer, StreamingServerConfig,
    TimeoutManager, ToolArguments, ToolDefinition, ToolError, ToolExecutor, ToolRegistry,
    ToolRegistryConfig, PROTOCOL_VERSION,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

pub struct EchoTool;

#[async_trait::async_trait]
impl ToolExecutor for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("echo", "Echoes back the input message")
            .parameter("message", ParameterSpec::string("text to echo").required())
    }

    async fn execute(
        &self,
        args: ToolArguments,
        _ctx: ExecutionContext,
    ) -> Result<CallToolResult, ToolError> {
        let message = args
            .get_string("message")
            .ok_or_else(|| ToolError::execution("message missing"))?;
        Ok(CallToolResult::text(format!("Echo: {message}")))
    }
}

pub struct SleeperTool;

#[async_trait::async_trait]
impl ToolExecutor for SleeperTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("sleeper", "Sleeps for the requested time").parameter(
            "millis",
            ParameterSpec::number("how long to sleep, in milliseconds")
                .default_value(serde_json::json!(5000)),
        )
    }

    async fn execute(
        &self,
        args: ToolArguments,
        _ctx: ExecutionContext,
    ) -> Result<CallToolResult, ToolError> {
        let millis = args.get_int("millis").unwrap_or(5000) as u64;
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(CallToolResult::text("woke up"))
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub ct: CancellationToken,
    pub dispatcher: Arc<McpDispatcher>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

pub async fn spawn_server(
    registry_config: ToolRegistryConfig,
    handler_config: McpHandlerConfig,
) -> anyhow::Result<TestServer> {
    init_tracing();
    let registry = Arc::new(ToolRegistry::new(registry_config));
    registry.register_tool(Arc::new(EchoTool)).await?;
    registry.register_tool(Arc::new(SleeperTool)).await?;

    let dispatcher = Arc::new(McpDispatcher::new(
        Implementation::new("s", "1.0"),
        registry,
        Arc::new(SessionManager::default()),
        Arc::new(TimeoutManager::default()),
    ));
    let handler = Arc::new(McpHttpHandler::new(
        Arc::clone(&dispatcher),
        handler_config,
    ));

    let server = StreamingServer::bind(StreamingServerConfig {
        address: "127.0.0.1:0".parse()?,
        ..Default::default()
    })
    .await?;
    let addr = server.local_addr()?;

    let ct = CancellationToken::new();
    tokio::spawn({
        let ct = ct.clone();
        async move {
            let _ = server.serve(handler, ct).await;
        }
    });
    tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let ct = ct.clone();
        async move {
            dispatcher
                .maintenance_loop(Duration::from_millis(100), ct)
                .await;
        }
    });

    Ok(TestServer {
        addr,
        ct,
        dispatcher,
    })
}

pub async fn spawn_default_server() -> anyhow::Result<TestServer> {
    spawn_server(ToolRegistryConfig::default(), McpHandlerConfig::default()).await
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).expect("body is UTF-8")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("body is JSON")
    }
}

/// Read one framed response: head to CRLFCRLF, then exactly
/// `Content-Length` body bytes.
pub async fn read_response(stream: &mut TcpStream) -> anyhow::Result<HttpResponse> {
    let mut raw = Vec::new();
    let head_end = loop {
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        anyhow::ensure!(n > 0, "connection closed before response head");
        raw.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&raw[..head_end])?;
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("bad status line: {status_line:?}"))?;
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            line.split_once(':')
                .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    let content_length: usize = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);

    let mut body = raw[head_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0u8; content_length - body.len()];
        let n = stream.read(&mut chunk).await?;
        anyhow::ensure!(n > 0, "connection closed mid-body");
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

pub async fn send_raw(addr: SocketAddr, raw: &str) -> anyhow::Result<HttpResponse> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(raw.as_bytes()).await?;
    read_response(&mut stream).await
}

/// POST a JSON-RPC body to `/mcp` with the standard headers.
pub async fn post_mcp(
    addr: SocketAddr,
    body: &str,
    session: Option<&str>,
) -> anyhow::Result<HttpResponse> {
    let session_header = session
        .map(|s| format!("Mcp-Session-Id: {s}\r\n"))
        .unwrap_or_default();
    let raw = format!(
        "POST /mcp HTTP/1.1\r\n\
         Host: localhost\r\n\
         Content-Type: application/json\r\n\
         Accept: application/json, text/event-stream\r\n\
         {session_header}\
         Content-Length: {}\r\n\r\n{body}",
        body.len()
    );
    send_raw(addr, &raw).await
}

/// Run the `initialize` + `initialized` handshake; returns the session ID.
pub async fn handshake(addr: SocketAddr) -> anyhow::Result<String> {
    let body = format!(
        r#"{{"jsonrpc":"2.0","id":1,"method":"initialize","params":{{"protocolVersion":"{PROTOCOL_VERSION}","clientInfo":{{"name":"c","version":"1.0"}},"capabilities":{{}}}}}}"#
    );
    let response = post_mcp(addr, &body, None).await?;
    anyhow::ensure!(response.status == 200, "initialize failed: {response:?}");
    let session = response
        .header("Mcp-Session-Id")
        .ok_or_else(|| anyhow::anyhow!("no session header"))?
        .to_string();

    let notify = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
    let response = post_mcp(addr, notify, Some(&session)).await?;
    anyhow::ensure!(response.status == 202, "initialized failed: {response:?}");
    Ok(session)
}

/// One parsed SSE frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
    pub comment: Option<String>,
}

/// Raw-TCP client for a `text/event-stream` response.
pub struct SseClient {
    stream: TcpStream,
    buffer: Vec<u8>,
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl SseClient {
    /// Open a stream with `GET <path>`.
    pub async fn connect(
        addr: SocketAddr,
        path: &str,
        session: Option<&str>,
        last_event_id: Option<&str>,
    ) -> anyhow::Result<Self> {
        let mut extra = String::new();
        if let Some(session) = session {
            extra.push_str(&format!("Mcp-Session-Id: {session}\r\n"));
        }
        if let Some(last) = last_event_id {
            extra.push_str(&format!("Last-Event-ID: {last}\r\n"));
        }
        let raw = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: localhost\r\n\
             Accept: text/event-stream\r\n\
             {extra}\r\n"
        );
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(raw.as_bytes()).await?;
        Self::from_stream(stream).await
    }

    /// POST a body and treat the response as an SSE stream.
    pub async fn post(
        addr: SocketAddr,
        body: &str,
        session: Option<&str>,
    ) -> anyhow::Result<Self> {
        let session_header = session
            .map(|s| format!("Mcp-Session-Id: {s}\r\n"))
            .unwrap_or_default();
        let raw = format!(
            "POST /mcp HTTP/1.1\r\n\
             Host: localhost\r\n\
             Content-Type: application/json\r\n\
             Accept: text/event-stream, application/json\r\n\
             {session_header}\
             Content-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(raw.as_bytes()).await?;
        Self::from_stream(stream).await
    }

    async fn from_stream(mut stream: TcpStream) -> anyhow::Result<Self> {
        let mut raw = Vec::new();
        let head_end = loop {
            if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk).await?;
            anyhow::ensure!(n > 0, "connection closed before response head");
            raw.extend_from_slice(&chunk[..n]);
        };
        let head = std::str::from_utf8(&raw[..head_end])?.to_string();
        let mut lines = head.split("\r\n");
        let status: u16 = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("bad status line"))?;
        let headers = lines
            .filter_map(|line| {
                line.split_once(':')
                    .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
            })
            .collect();
        let buffer = raw[head_end + 4..].to_vec();
        Ok(Self {
            stream,
            buffer,
            status,
            headers,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Next frame (event or comment), or an error on timeout/close.
    pub async fn next_frame(&mut self, timeout: Duration) -> anyhow::Result<SseFrame> {
        let block = tokio::time::timeout(timeout, self.read_block()).await??;
        Ok(parse_frame(&block))
    }

    /// Next real event, skipping `:ping` comments.
    pub async fn next_event(&mut self, timeout: Duration) -> anyhow::Result<SseFrame> {
        loop {
            let frame = self.next_frame(timeout).await?;
            if frame.comment.is_none() {
                return Ok(frame);
            }
        }
    }

    async fn read_block(&mut self) -> anyhow::Result<String> {
        loop {
            if let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
                let block = self.buffer.drain(..pos + 2).collect::<Vec<u8>>();
                return Ok(String::from_utf8(block)?);
            }
            let mut chunk = [0u8; 1024];
            let n = self.stream.read(&mut chunk).await?;
            anyhow::ensure!(n > 0, "stream closed");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

fn parse_frame(block: &str) -> SseFrame {
    let mut frame = SseFrame::default();
    let mut data_lines: Vec<&str> = Vec::new();
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event: ") {
            frame.event = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("id: ") {
            frame.id = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("data: ") {
            data_lines.push(rest);
        } else if let Some(rest) = line.strip_prefix(':') {
            frame.comment = Some(rest.to_string());
        }
    }
    frame.data = data_lines.join("\n");
    frame
}
