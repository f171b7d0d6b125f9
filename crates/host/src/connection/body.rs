//! Streaming request bodies.
//!
//! [`RequestBody`] is the pull side handed to the pipeline through the
//! environment. It reads from the connection's remaining read half, framed
//! either by `Content-Length` or by chunked transfer encoding. Methods that
//! carry no entity body get the empty stream, which yields end-of-stream
//! immediately without touching the connection.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

use super::head::RequestHead;

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// A per-request body stream.
///
/// Cloning yields another handle to the same stream; the environment's
/// guarded assignment compares handles by identity.
#[derive(Clone)]
pub struct RequestBody {
    inner: Arc<Mutex<BodyState>>,
}

enum BodyState {
    Empty,
    Length { reader: BoxReader, buf: BytesMut, remaining: u64 },
    Chunked { reader: BoxReader, buf: BytesMut, remaining: usize, finished: bool },
}

impl RequestBody {
    /// The empty, no-op stream used for bodyless requests.
    pub fn empty() -> Self {
        Self { inner: Arc::new(Mutex::new(BodyState::Empty)) }
    }

    pub(crate) fn length(reader: impl AsyncRead + Send + Unpin + 'static, buf: BytesMut, length: u64) -> Self {
        if length == 0 {
            return Self::empty();
        }
        Self { inner: Arc::new(Mutex::new(BodyState::Length { reader: Box::new(reader), buf, remaining: length })) }
    }

    pub(crate) fn chunked(reader: impl AsyncRead + Send + Unpin + 'static, buf: BytesMut) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BodyState::Chunked {
                reader: Box::new(reader),
                buf,
                remaining: 0,
                finished: false,
            })),
        }
    }

    /// Builds the body stream for a parsed head, applying the body-presence
    /// rule: `POST` and `PUT` always carry a body stream, `PATCH` only when
    /// the head reports one, and every other method is treated as bodyless
    /// regardless of what the connection reports.
    pub(crate) fn from_head(head: &RequestHead, reader: impl AsyncRead + Send + Unpin + 'static, buf: BytesMut) -> Self {
        let method = head.method.as_str();
        let unconditional = method.eq_ignore_ascii_case("POST") || method.eq_ignore_ascii_case("PUT");
        let conditional = method.eq_ignore_ascii_case("PATCH");
        if !unconditional && !conditional {
            return Self::empty();
        }

        let chunked = head
            .headers
            .get_normalized("transfer-encoding")
            .iter()
            .any(|value| value.trim().eq_ignore_ascii_case("chunked"));
        if chunked {
            return Self::chunked(reader, buf);
        }

        let length = head
            .headers
            .get("content-length")
            .and_then(|values| values.first())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0);
        Self::length(reader, buf, length)
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Reads the next chunk of body data, or `None` at end of stream.
    pub async fn read_chunk(&self) -> io::Result<Option<Bytes>> {
        let mut state = self.inner.lock().await;
        match &mut *state {
            BodyState::Empty => Ok(None),
            BodyState::Length { reader, buf, remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                if buf.is_empty() {
                    fill(reader, buf).await?;
                }
                let take = (*remaining).min(buf.len() as u64) as usize;
                let chunk = buf.split_to(take).freeze();
                *remaining -= take as u64;
                Ok(Some(chunk))
            }
            BodyState::Chunked { reader, buf, remaining, finished } => {
                if *finished {
                    return Ok(None);
                }
                if *remaining == 0 {
                    let size = read_chunk_size(reader, buf).await?;
                    if size == 0 {
                        skip_trailers(reader, buf).await?;
                        *finished = true;
                        return Ok(None);
                    }
                    *remaining = size;
                }
                // emit whatever of the declared chunk has already arrived
                // rather than accumulating the whole chunk in memory
                if buf.is_empty() {
                    fill(reader, buf).await?;
                }
                let take = (*remaining).min(buf.len());
                let data = buf.split_to(take).freeze();
                *remaining -= take;
                if *remaining == 0 {
                    let delimiter = read_exact_bytes(reader, buf, 2).await?;
                    if &delimiter[..] != b"\r\n" {
                        return Err(io::Error::new(io::ErrorKind::InvalidData, "chunk data not followed by CRLF"));
                    }
                }
                Ok(Some(data))
            }
        }
    }

    /// Drains the stream and returns the concatenated body.
    pub async fn read_to_end(&self) -> io::Result<Bytes> {
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.read_chunk().await? {
            collected.extend_from_slice(&chunk);
        }
        Ok(collected.freeze())
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody").finish_non_exhaustive()
    }
}

async fn fill(reader: &mut BoxReader, buf: &mut BytesMut) -> io::Result<()> {
    let read = reader.read_buf(buf).await?;
    if read == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed inside the request body"));
    }
    Ok(())
}

async fn read_exact_bytes(reader: &mut BoxReader, buf: &mut BytesMut, count: usize) -> io::Result<Bytes> {
    while buf.len() < count {
        fill(reader, buf).await?;
    }
    Ok(buf.split_to(count).freeze())
}

async fn read_line(reader: &mut BoxReader, buf: &mut BytesMut) -> io::Result<Bytes> {
    loop {
        if let Some(at) = buf.iter().position(|&byte| byte == b'\n') {
            return Ok(buf.split_to(at + 1).freeze());
        }
        fill(reader, buf).await?;
    }
}

async fn read_chunk_size(reader: &mut BoxReader, buf: &mut BytesMut) -> io::Result<usize> {
    let line = read_line(reader, buf).await?;
    let text = std::str::from_utf8(&line)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk size line is not ASCII"))?
        .trim_end_matches(['\r', '\n']);
    // chunk extensions after ';' are skipped
    let size_text = text.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size_text, 16).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid chunk size"))
}

async fn skip_trailers(reader: &mut BoxReader, buf: &mut BytesMut) -> io::Result<()> {
    loop {
        let line = read_line(reader, buf).await?;
        if line.iter().all(|&byte| byte == b'\r' || byte == b'\n') {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let body = RequestBody::empty();
        assert_eq!(body.read_chunk().await.unwrap(), None);
        assert_eq!(body.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn length_framed_body_reads_to_the_limit() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"hello world, and some pipelined noise").await.unwrap();
        drop(client);

        let body = RequestBody::length(server, BytesMut::new(), 11);
        assert_eq!(&body.read_to_end().await.unwrap()[..], b"hello world");
        assert_eq!(body.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn leftover_head_bytes_are_consumed_first() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b" world").await.unwrap();
        drop(client);

        let mut leftover = BytesMut::new();
        leftover.extend_from_slice(b"hello");
        let body = RequestBody::length(server, leftover, 11);

        assert_eq!(&body.read_to_end().await.unwrap()[..], b"hello world");
    }

    #[tokio::test]
    async fn truncated_length_body_is_an_error() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let body = RequestBody::length(server, BytesMut::new(), 10);
        assert_eq!(&body.read_chunk().await.unwrap().unwrap()[..], b"abc");
        assert_eq!(body.read_chunk().await.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn chunked_body_decodes_chunks_and_trailers() {
        let (mut client, server) = tokio::io::duplex(256);
        client.write_all(b"5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nTrailer: x\r\n\r\n").await.unwrap();
        drop(client);

        let body = RequestBody::chunked(server, BytesMut::new());
        assert_eq!(&body.read_chunk().await.unwrap().unwrap()[..], b"hello");
        assert_eq!(&body.read_chunk().await.unwrap().unwrap()[..], b" world");
        assert_eq!(body.read_chunk().await.unwrap(), None);
        assert_eq!(body.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn chunk_data_streams_before_the_full_chunk_arrives() {
        let (mut client, server) = tokio::io::duplex(256);
        client.write_all(b"8\r\nabc").await.unwrap();

        let body = RequestBody::chunked(server, BytesMut::new());

        // only a prefix of the declared 8-byte chunk is on the wire yet
        assert_eq!(&body.read_chunk().await.unwrap().unwrap()[..], b"abc");

        client.write_all(b"defgh\r\n0\r\n\r\n").await.unwrap();
        drop(client);

        assert_eq!(&body.read_chunk().await.unwrap().unwrap()[..], b"defgh");
        assert_eq!(body.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_chunk_size_is_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"zz\r\n").await.unwrap();
        drop(client);

        let body = RequestBody::chunked(server, BytesMut::new());
        assert_eq!(body.read_chunk().await.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn clones_share_the_stream() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"abcdef").await.unwrap();
        drop(client);

        let body = RequestBody::length(server, BytesMut::new(), 6);
        let alias = body.clone();
        assert!(body.ptr_eq(&alias));

        let first = body.read_chunk().await.unwrap().unwrap();
        let rest = alias.read_to_end().await.unwrap();
        assert_eq!(first.len() + rest.len(), 6);
    }
}
