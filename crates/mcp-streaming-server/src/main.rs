//! Standalone MCP streamable HTTP server.
//!
//! Binds the address from `MCP_STREAMING_ADDR` (default `127.0.0.1:8080`)
//! and serves the MCP endpoint with an empty tool registry; tools are
//! registered by embedding the library. Exits 0 on clean shutdown and
//! non-zero when the listener cannot be bound.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use mcp_streaming::{
    Implementation, McpDispatcher, McpHandlerConfig, McpHttpHandler, SessionManager,
    StreamingServer, StreamingServerConfig, TimeoutManager, ToolRegistry,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MAINTENANCE_PERIOD: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let address = std::env::var("MCP_STREAMING_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let address: SocketAddr = match address.parse() {
        Ok(address) => address,
        Err(error) => {
            tracing::error!(%address, %error, "invalid listen address");
            return ExitCode::FAILURE;
        }
    };

    let dispatcher = Arc::new(McpDispatcher::new(
        Implementation::new("mcp-streaming", env!("CARGO_PKG_VERSION")),
        Arc::new(ToolRegistry::default()),
        Arc::new(SessionManager::default()),
        Arc::new(TimeoutManager::default()),
    ));
    let handler = Arc::new(McpHttpHandler::new(
        Arc::clone(&dispatcher),
        McpHandlerConfig::default(),
    ));

    let config = StreamingServerConfig {
        address,
        ..Default::default()
    };
    let server = match StreamingServer::bind(config).await {
        Ok(server) => server,
        Err(error) => {
            tracing::error!(%address, %error, "failed to bind");
            return ExitCode::FAILURE;
        }
    };

    let ct = CancellationToken::new();
    tokio::spawn({
        let ct = ct.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                ct.cancel();
            }
        }
    });
    tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let ct = ct.clone();
        async move {
            dispatcher.maintenance_loop(MAINTENANCE_PERIOD, ct).await;
        }
    });

    match server.serve(handler, ct).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "server failed");
            ExitCode::FAILURE
        }
    }
}
