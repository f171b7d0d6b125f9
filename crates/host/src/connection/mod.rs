//! Per-connection plumbing between the native listener and the environment.
//!
//! # Components
//!
//! - [`RequestHead`]: the parsed request line and raw headers, read with a
//!   hard size cap
//! - [`RequestBody`]: the streaming body handed to the pipeline, framed by
//!   content length or chunked transfer encoding
//! - [`ResponseChannel`]: shared handle over the native response state
//!   (status, reason phrase, restricted headers and the write half). The
//!   environment's response-side entries are live views derived from it.

mod head;
pub use head::HeadError;
pub use head::RequestHead;
pub(crate) use head::read_head;

mod body;
pub use body::RequestBody;

mod response;
pub use response::ResponseBody;
pub use response::ResponseChannel;
pub use response::ResponseDisposed;
pub use response::ResponseHeaders;
pub use response::ResponseProps;
