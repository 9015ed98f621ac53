//! Ownership-tracked wrapper around an accepted socket.
//!
//! The accept loop creates a [`Connection`] and moves it into the worker
//! task; the move transfers ownership, so `release_ownership` exists for
//! the rare path where a handle must stay behind without closing the
//! socket on drop of the worker's teardown call.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::TransportError;

/// A socket handle with exactly one owner at any moment.
///
/// The owner is responsible for teardown; a handle that has released
/// ownership may still read and write but its [`teardown`](Self::teardown)
/// becomes a no-op.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    peer_addr: Option<SocketAddr>,
    owned: bool,
    torn_down: bool,
}

impl Connection<TcpStream> {
    /// Wrap a freshly accepted TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        Self {
            stream,
            peer_addr,
            owned: true,
            torn_down: false,
        }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            peer_addr: None,
            owned: true,
            torn_down: false,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Give up responsibility for closing the socket.
    pub fn release_ownership(&mut self) {
        self.owned = false;
    }

    /// Read into `buf`, returning the number of bytes read; 0 means EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = self.stream.read(buf).await?;
        Ok(n)
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(buf).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), TransportError> {
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut the write half down. Idempotent; a no-op for handles that have
    /// released ownership.
    pub async fn teardown(&mut self) -> Result<(), TransportError> {
        if !self.owned || self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        self.stream.shutdown().await?;
        Ok(())
    }
}
