//! The response side of a connection.
//!
//! [`ResponseChannel`] is a shared handle over the native response state:
//! status code, reason phrase, the restricted-header writer and the write
//! half of the connection. The environment exposes live views derived from
//! it, so writes during pipeline execution are reflected immediately on the
//! underlying connection instead of being buffered until the pipeline returns.
//!
//! Framing follows the native properties: an explicit content length streams
//! raw bytes, chunked transfer encoding frames each write, and when neither
//! was chosen the body is buffered so [`finish`](ResponseChannel::finish) can
//! emit the computed content length.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};
use http::{StatusCode, Version};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::headers::{NativeResponseProps, ResponseHeaderWriter};

/// Marker error for writes against an already disposed response.
///
/// The host's failure taxonomy recognizes this as "the client went away" and
/// ignores pipeline errors whose root cause is this type.
#[derive(Debug, Error)]
#[error("response already disposed")]
pub struct ResponseDisposed;

pub(crate) fn disposed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, ResponseDisposed)
}

/// Native response properties, the redirect target for restricted headers.
#[derive(Debug)]
pub struct ResponseProps {
    status: Option<u16>,
    reason: Option<String>,
    content_length: Option<i64>,
    keep_alive: bool,
    chunked: bool,
}

impl Default for ResponseProps {
    fn default() -> Self {
        Self { status: None, reason: None, content_length: None, keep_alive: true, chunked: false }
    }
}

impl NativeResponseProps for ResponseProps {
    fn set_content_length(&mut self, length: i64) {
        self.content_length = Some(length);
    }

    fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    fn enable_chunked(&mut self) {
        self.chunked = true;
    }
}

struct ResponseMeta {
    headers: ResponseHeaderWriter<ResponseProps>,
    version: Version,
    head_sent: bool,
    disposed: bool,
    buffered: Vec<Bytes>,
}

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct ResponseInner {
    meta: Mutex<ResponseMeta>,
    writer: tokio::sync::Mutex<BoxWriter>,
}

/// Shared handle over one connection's response state.
#[derive(Clone)]
pub struct ResponseChannel {
    inner: Arc<ResponseInner>,
}

/// Header-only view of a [`ResponseChannel`], stored in the environment.
///
/// Writes to the restricted names are redirected to the native properties;
/// reads always come from ordinary storage.
#[derive(Clone)]
pub struct ResponseHeaders {
    inner: Arc<ResponseInner>,
}

/// Body write handle of a [`ResponseChannel`], stored in the environment.
#[derive(Clone)]
pub struct ResponseBody {
    inner: Arc<ResponseInner>,
}

enum WriteFrame {
    Buffered,
    Raw(Bytes),
    Chunked(Bytes),
}

enum FinishAction {
    SendHead { head: Bytes, body: Vec<Bytes>, chunked: bool },
    Terminate,
    Flush,
}

impl ResponseChannel {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static, version: Version) -> Self {
        let meta = ResponseMeta {
            headers: ResponseHeaderWriter::new(ResponseProps::default()),
            version,
            head_sent: false,
            disposed: false,
            buffered: Vec::new(),
        };
        Self {
            inner: Arc::new(ResponseInner {
                meta: Mutex::new(meta),
                writer: tokio::sync::Mutex::new(Box::new(writer)),
            }),
        }
    }

    fn meta(&self) -> MutexGuard<'_, ResponseMeta> {
        self.inner.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, status: u16) {
        self.meta().headers.native_mut().status = Some(status);
    }

    /// Unset until the pipeline writes one.
    pub fn status(&self) -> Option<u16> {
        self.meta().headers.native().status
    }

    pub fn set_reason(&self, reason: impl Into<String>) {
        self.meta().headers.native_mut().reason = Some(reason.into());
    }

    pub fn reason(&self) -> Option<String> {
        self.meta().headers.native().reason.clone()
    }

    pub fn headers(&self) -> ResponseHeaders {
        ResponseHeaders { inner: Arc::clone(&self.inner) }
    }

    pub fn body(&self) -> ResponseBody {
        ResponseBody { inner: Arc::clone(&self.inner) }
    }

    pub(crate) fn head_sent(&self) -> bool {
        self.meta().head_sent
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resets the response to a bare 500 when the pipeline failed before any
    /// head bytes went out.
    pub(crate) fn prepare_error_response(&self) {
        let mut meta = self.meta();
        if meta.head_sent || meta.disposed {
            return;
        }
        meta.buffered.clear();
        let store = meta.headers.store_mut();
        let names: Vec<String> = store.names().map(str::to_owned).collect();
        for name in names {
            store.remove(&name);
        }
        let props = meta.headers.native_mut();
        props.status = Some(500);
        props.reason = None;
        props.content_length = None;
        props.chunked = false;
    }

    /// Closes the response: sends the head (with a computed content length)
    /// when nothing was sent yet, terminates chunked framing, flushes and
    /// shuts the write half down. Idempotent; later writes fail with
    /// [`ResponseDisposed`].
    pub(crate) async fn finish(&self) -> io::Result<()> {
        let mut writer = self.inner.writer.lock().await;

        let action = {
            let mut meta = self.meta();
            if meta.disposed {
                return Ok(());
            }
            meta.disposed = true;

            if !meta.head_sent {
                let chunked = meta.headers.native().chunked;
                if !chunked && meta.headers.native().content_length.is_none() {
                    let total: i64 = meta.buffered.iter().map(|chunk| chunk.len() as i64).sum();
                    meta.headers.native_mut().set_content_length(total);
                }
                let head = render_head(&meta);
                meta.head_sent = true;
                let body = std::mem::take(&mut meta.buffered);
                FinishAction::SendHead { head, body, chunked }
            } else if meta.headers.native().chunked {
                FinishAction::Terminate
            } else {
                FinishAction::Flush
            }
        };

        match action {
            FinishAction::SendHead { head, body, chunked } => {
                writer.write_all(&head).await?;
                for chunk in body {
                    if chunked {
                        write_chunk_frame(&mut writer, &chunk).await?;
                    } else {
                        writer.write_all(&chunk).await?;
                    }
                }
                if chunked {
                    writer.write_all(b"0\r\n\r\n").await?;
                }
            }
            FinishAction::Terminate => writer.write_all(b"0\r\n\r\n").await?,
            FinishAction::Flush => {}
        }

        writer.flush().await?;
        writer.shutdown().await
    }
}

impl ResponseHeaders {
    fn meta(&self) -> MutexGuard<'_, ResponseMeta> {
        self.inner.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, name: &str, values: Vec<String>) {
        self.meta().headers.set(name, values);
    }

    pub fn set_value(&self, name: &str, value: impl Into<String>) {
        self.meta().headers.set_value(name, value);
    }

    pub fn append(&self, name: &str, value: impl Into<String>) {
        self.meta().headers.append(name, value);
    }

    pub fn get(&self, name: &str) -> Option<Vec<String>> {
        self.meta().headers.store().get(name).map(<[String]>::to_vec)
    }

    pub fn get_joined(&self, name: &str) -> Option<String> {
        self.meta().headers.store().get_joined(name)
    }

    pub fn get_normalized(&self, name: &str) -> Vec<String> {
        self.meta().headers.store().get_normalized(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.meta().headers.store().contains(name)
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ResponseBody {
    /// Writes one chunk of body data, sending the head first when the framing
    /// is already decided. With no framing decided yet the chunk is buffered
    /// until the response is finished.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> io::Result<()> {
        let chunk = chunk.into();
        let mut writer = self.inner.writer.lock().await;

        let (head, pending, frame) = {
            let mut meta = self.inner.meta.lock().unwrap_or_else(PoisonError::into_inner);
            if meta.disposed {
                return Err(disposed_error());
            }

            let chunked = meta.headers.native().chunked;
            let has_length = meta.headers.native().content_length.is_some();
            if !chunked && !has_length {
                meta.buffered.push(chunk);
                (None, Vec::new(), WriteFrame::Buffered)
            } else {
                let head = if meta.head_sent {
                    None
                } else {
                    let rendered = render_head(&meta);
                    meta.head_sent = true;
                    Some(rendered)
                };
                // chunks buffered before the framing was decided go out first
                let pending = std::mem::take(&mut meta.buffered);
                let frame = if chunked { WriteFrame::Chunked(chunk) } else { WriteFrame::Raw(chunk) };
                (head, pending, frame)
            }
        };

        if let Some(head) = head {
            writer.write_all(&head).await?;
        }
        match frame {
            WriteFrame::Buffered => Ok(()),
            WriteFrame::Raw(chunk) => {
                for earlier in pending {
                    writer.write_all(&earlier).await?;
                }
                writer.write_all(&chunk).await?;
                writer.flush().await
            }
            WriteFrame::Chunked(chunk) => {
                for earlier in pending {
                    write_chunk_frame(&mut writer, &earlier).await?;
                }
                write_chunk_frame(&mut writer, &chunk).await?;
                writer.flush().await
            }
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

async fn write_chunk_frame(writer: &mut BoxWriter, chunk: &Bytes) -> io::Result<()> {
    // a zero-length frame would terminate the body
    if chunk.is_empty() {
        return Ok(());
    }
    writer.write_all(format!("{:x}\r\n", chunk.len()).as_bytes()).await?;
    writer.write_all(chunk).await?;
    writer.write_all(b"\r\n").await
}

fn render_head(meta: &ResponseMeta) -> Bytes {
    let props = meta.headers.native();
    let status = props.status.unwrap_or(200);
    let reason = props
        .reason
        .clone()
        .or_else(|| StatusCode::from_u16(status).ok().and_then(|code| code.canonical_reason().map(str::to_owned)))
        .unwrap_or_default();
    let version = if meta.version == Version::HTTP_10 { "HTTP/1.0" } else { "HTTP/1.1" };

    trace!(status = status, "sending response head");

    let mut head = BytesMut::with_capacity(256);
    head.put_slice(format!("{version} {status} {reason}\r\n").as_bytes());
    for (name, values) in meta.headers.store().iter() {
        for value in values {
            head.put_slice(format!("{name}: {value}\r\n").as_bytes());
        }
    }
    if props.chunked {
        head.put_slice(b"Transfer-Encoding: chunked\r\n");
    } else if let Some(length) = props.content_length {
        head.put_slice(format!("Content-Length: {length}\r\n").as_bytes());
    }
    if !props.keep_alive {
        head.put_slice(b"Connection: close\r\n");
    }
    head.put_slice(b"\r\n");
    head.freeze()
}

impl fmt::Debug for ResponseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseChannel").finish_non_exhaustive()
    }
}

impl fmt::Debug for ResponseHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHeaders").finish_non_exhaustive()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody").finish_non_exhaustive()
    }
}
