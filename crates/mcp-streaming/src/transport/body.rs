//! Body framing over a connection.
//!
//! The read side produces body chunks until the declared `Content-Length`
//! is consumed (or EOF when the length is unknown). The write side emits
//! raw bytes, RFC 7230 chunked framing (lowercase unpadded hex sizes), or
//! SSE records.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};

use super::connection::Connection;
use crate::error::TransportError;

pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// A single Server-Sent Events record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Render the wire form: optional `event:` and `id:` lines, one `data:`
    /// line per LF-split segment of the payload, then a blank line. A
    /// trailing newline in the payload yields an extra empty `data:` line.
    pub fn format(&self) -> String {
        let mut out = String::new();
        if let Some(event_type) = &self.event_type {
            out.push_str("event: ");
            out.push_str(event_type);
            out.push('\n');
        }
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        for segment in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(segment);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Reader/writer state for one HTTP message body.
#[derive(Debug)]
pub struct BodyStream {
    content_length: Option<u64>,
    chunked: bool,
    buffer_size: usize,
    bytes_read: u64,
    read_complete: bool,
    write_ended: bool,
}

impl BodyStream {
    pub fn new(content_length: Option<u64>, chunked: bool, buffer_size: usize) -> Self {
        let read_complete = content_length == Some(0);
        Self {
            content_length,
            chunked,
            buffer_size,
            bytes_read: 0,
            read_complete,
            write_ended: false,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn is_read_complete(&self) -> bool {
        self.read_complete
    }

    pub fn is_write_ended(&self) -> bool {
        self.write_ended
    }

    /// Account for body bytes that arrived in the head buffer and were
    /// consumed without touching the socket.
    pub fn note_buffered(&mut self, n: u64) {
        self.bytes_read += n;
        if let Some(length) = self.content_length {
            if self.bytes_read >= length {
                self.read_complete = true;
            }
        }
    }

    /// Read the next body chunk from the socket. Empty bytes signal
    /// completion: the declared length was reached, or EOF arrived on an
    /// unknown-length body.
    pub async fn read_chunk<S>(
        &mut self,
        conn: &mut Connection<S>,
    ) -> Result<Bytes, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.read_complete {
            return Ok(Bytes::new());
        }
        let want = match self.content_length {
            Some(length) => {
                let remaining = length.saturating_sub(self.bytes_read);
                remaining.min(self.buffer_size as u64) as usize
            }
            None => self.buffer_size,
        };
        let mut buf = BytesMut::zeroed(want);
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            // EOF: completion for unknown-length bodies, truncation
            // otherwise; either way there is nothing more to deliver.
            self.read_complete = true;
            return Ok(Bytes::new());
        }
        buf.truncate(n);
        self.note_buffered(n as u64);
        Ok(buf.freeze())
    }

    /// Write one body chunk, applying chunked framing when configured.
    pub async fn write_chunk<S>(
        &mut self,
        conn: &mut Connection<S>,
        data: &[u8],
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.write_ended {
            return Err(TransportError::StreamEnded);
        }
        if data.is_empty() {
            return Ok(());
        }
        if self.chunked {
            let mut framed = BytesMut::with_capacity(data.len() + 16);
            framed.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
            framed.extend_from_slice(data);
            framed.extend_from_slice(b"\r\n");
            conn.write_all(&framed).await?;
        } else {
            conn.write_all(data).await?;
        }
        Ok(())
    }

    /// Write one SSE record. SSE payloads are never chunk-framed.
    pub async fn write_sse_event<S>(
        &mut self,
        conn: &mut Connection<S>,
        event: &SseEvent,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.write_ended {
            return Err(TransportError::StreamEnded);
        }
        conn.write_all(event.format().as_bytes()).await?;
        conn.flush().await?;
        Ok(())
    }

    /// Write an SSE comment line, used as a keep-alive ping.
    pub async fn write_sse_comment<S>(
        &mut self,
        conn: &mut Connection<S>,
        comment: &str,
    ) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.write_ended {
            return Err(TransportError::StreamEnded);
        }
        conn.write_all(format!(":{comment}\n\n").as_bytes()).await?;
        conn.flush().await?;
        Ok(())
    }

    /// Terminate the body: emits the zero-length chunk iff chunked.
    pub async fn end_stream<S>(&mut self, conn: &mut Connection<S>) -> Result<(), TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.write_ended {
            return Ok(());
        }
        self.write_ended = true;
        if self.chunked {
            conn.write_all(b"0\r\n\r\n").await?;
        }
        conn.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    async fn capture(client: tokio::io::DuplexStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut reader = client;
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn chunked_framing_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(server);
        let mut body = BodyStream::new(None, true, DEFAULT_BUFFER_SIZE);

        body.write_chunk(&mut conn, b"hello ").await.unwrap();
        body.write_chunk(&mut conn, b"world").await.unwrap();
        body.end_stream(&mut conn).await.unwrap();
        drop(conn);

        let raw = capture(client).await;
        assert_eq!(raw, b"6\r\nhello \r\n5\r\nworld\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn chunk_sizes_are_lowercase_unpadded_hex() {
        let (client, server) = tokio::io::duplex(65536);
        let mut conn = Connection::new(server);
        let mut body = BodyStream::new(None, true, DEFAULT_BUFFER_SIZE);

        body.write_chunk(&mut conn, &[b'x'; 255]).await.unwrap();
        body.end_stream(&mut conn).await.unwrap();
        drop(conn);

        let raw = capture(client).await;
        assert!(raw.starts_with(b"ff\r\n"));
    }

    #[tokio::test]
    async fn deframed_chunks_equal_written_payload() {
        let (client, server) = tokio::io::duplex(65536);
        let mut conn = Connection::new(server);
        let mut body = BodyStream::new(None, true, DEFAULT_BUFFER_SIZE);

        let parts: [&[u8]; 3] = [b"alpha", b"beta", b"gamma"];
        for part in parts {
            body.write_chunk(&mut conn, part).await.unwrap();
        }
        body.end_stream(&mut conn).await.unwrap();
        drop(conn);

        // De-frame per RFC 7230 section 4.1.
        let raw = capture(client).await;
        let mut deframed = Vec::new();
        let mut rest = &raw[..];
        loop {
            let line_end = rest.windows(2).position(|w| w == b"\r\n").unwrap();
            let size = usize::from_str_radix(
                std::str::from_utf8(&rest[..line_end]).unwrap(),
                16,
            )
            .unwrap();
            rest = &rest[line_end + 2..];
            if size == 0 {
                break;
            }
            deframed.extend_from_slice(&rest[..size]);
            rest = &rest[size + 2..];
        }
        assert_eq!(deframed, b"alphabetagamma");
    }

    #[tokio::test]
    async fn unchunked_writes_are_verbatim() {
        let (client, server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(server);
        let mut body = BodyStream::new(None, false, DEFAULT_BUFFER_SIZE);

        body.write_chunk(&mut conn, b"raw bytes").await.unwrap();
        body.end_stream(&mut conn).await.unwrap();
        drop(conn);

        assert_eq!(capture(client).await, b"raw bytes");
    }

    #[tokio::test]
    async fn write_after_end_is_an_error() {
        let (_client, server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(server);
        let mut body = BodyStream::new(None, true, DEFAULT_BUFFER_SIZE);
        body.end_stream(&mut conn).await.unwrap();
        let err = body.write_chunk(&mut conn, b"late").await.unwrap_err();
        assert!(matches!(err, TransportError::StreamEnded));
    }

    #[tokio::test]
    async fn read_stops_at_content_length() {
        let (client, server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(server);
        let mut body = BodyStream::new(Some(5), false, DEFAULT_BUFFER_SIZE);

        let (_r, mut w) = tokio::io::split(client);
        tokio::io::AsyncWriteExt::write_all(&mut w, b"hellothere")
            .await
            .unwrap();

        let chunk = body.read_chunk(&mut conn).await.unwrap();
        assert_eq!(&chunk[..], b"hello");
        assert!(body.is_read_complete());
        assert_eq!(&body.read_chunk(&mut conn).await.unwrap()[..], b"");
    }

    #[tokio::test]
    async fn unknown_length_completes_on_eof() {
        let (client, server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(server);
        let mut body = BodyStream::new(None, false, DEFAULT_BUFFER_SIZE);

        let (_r, mut w) = tokio::io::split(client);
        tokio::io::AsyncWriteExt::write_all(&mut w, b"tail").await.unwrap();
        drop(w);
        drop(_r);

        let chunk = body.read_chunk(&mut conn).await.unwrap();
        assert_eq!(&chunk[..], b"tail");
        assert!(!body.is_read_complete());
        let chunk = body.read_chunk(&mut conn).await.unwrap();
        assert!(chunk.is_empty());
        assert!(body.is_read_complete());
    }

    #[test]
    fn sse_event_full_form() {
        let event = SseEvent::new("payload").event_type("message").id("42");
        assert_eq!(event.format(), "event: message\nid: 42\ndata: payload\n\n");
    }

    #[test]
    fn sse_event_data_only() {
        assert_eq!(SseEvent::new("x").format(), "data: x\n\n");
    }

    #[test]
    fn sse_multiline_data_splits_on_lf() {
        let event = SseEvent::new("line one\nline two");
        assert_eq!(event.format(), "data: line one\ndata: line two\n\n");
    }

    #[test]
    fn sse_trailing_newline_yields_empty_data_line() {
        let event = SseEvent::new("done\n");
        assert_eq!(event.format(), "data: done\ndata: \n\n");
    }
}
