//! Request head reading and parsing.
//!
//! The head is accumulated into a buffer with a hard size cap and parsed with
//! `httparse`. Header values are stored raw in a [`HeaderStore`], one array
//! element per header line as received; nothing is split on commas here.

use std::io;

use bytes::{Buf, BytesMut};
use http::Version;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::ensure;
use crate::headers::HeaderStore;

pub(crate) const MAX_HEAD_SIZE: usize = 8 * 1024;
pub(crate) const MAX_HEADERS: usize = 64;

#[derive(Debug, Error)]
pub enum HeadError {
    #[error("request head exceeds the limit of {max_size} bytes")]
    TooLargeHead { max_size: usize },

    #[error("header number exceeds the limit of {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("malformed request head: {reason}")]
    Malformed { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl HeadError {
    pub fn malformed<S: ToString>(reason: S) -> Self {
        Self::Malformed { reason: reason.to_string() }
    }
}

/// The parsed request line and raw headers of one request.
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    /// The raw request target exactly as received, before any decoding.
    pub target: String,
    pub version: Version,
    pub headers: HeaderStore,
}

impl RequestHead {
    /// The request protocol string, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> &'static str {
        if self.version == Version::HTTP_10 {
            "HTTP/1.0"
        } else if self.version == Version::HTTP_09 {
            "HTTP/0.9"
        } else {
            "HTTP/1.1"
        }
    }
}

/// Reads one request head from `reader`, leaving any body bytes already
/// received in `buf`.
///
/// Returns `Ok(None)` when the peer closed the connection before sending
/// anything.
pub(crate) async fn read_head<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Option<RequestHead>, HeadError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(head) = parse_head(buf)? {
            return Ok(Some(head));
        }

        ensure!(buf.len() <= MAX_HEAD_SIZE, HeadError::TooLargeHead { max_size: MAX_HEAD_SIZE });

        let read = reader.read_buf(buf).await?;
        if read == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(HeadError::malformed("connection closed before the head completed"));
        }
    }
}

fn parse_head(buf: &mut BytesMut) -> Result<Option<RequestHead>, HeadError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);

    match parsed.parse(buf.as_ref()) {
        Ok(httparse::Status::Complete(consumed)) => {
            ensure!(consumed <= MAX_HEAD_SIZE, HeadError::TooLargeHead { max_size: MAX_HEAD_SIZE });

            let mut store = HeaderStore::new();
            for header in parsed.headers.iter() {
                store.append(header.name, String::from_utf8_lossy(header.value).into_owned());
            }

            let head = RequestHead {
                method: parsed.method.ok_or_else(|| HeadError::malformed("missing method"))?.to_owned(),
                target: parsed.path.ok_or_else(|| HeadError::malformed("missing request target"))?.to_owned(),
                version: match parsed.version {
                    Some(0) => Version::HTTP_10,
                    Some(1) => Version::HTTP_11,
                    _ => Version::HTTP_09,
                },
                headers: store,
            };

            buf.advance(consumed);
            Ok(Some(head))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(httparse::Error::TooManyHeaders) => Err(HeadError::TooManyHeaders { max_num: MAX_HEADERS }),
        Err(e) => Err(HeadError::malformed(e)),
    }
}
