//! Well-known environment keys.
//!
//! Keys are namespaced, case-sensitive strings. The `request.*` and
//! `server.*` entries are populated by the host before pipeline dispatch;
//! `response.*` entries are live views onto the connection; `request.id` is
//! established (or not) by the pipeline itself.

/// Version of the environment contract, currently `"1.0"`.
pub const HOST_VERSION: &str = "host.version";

pub const REQUEST_METHOD: &str = "request.method";
pub const REQUEST_PATH_BASE: &str = "request.path_base";
pub const REQUEST_PATH: &str = "request.path";
pub const REQUEST_QUERY_STRING: &str = "request.query_string";
/// The protocol string, e.g. `HTTP/1.1`.
pub const REQUEST_PROTOCOL: &str = "request.protocol";
pub const REQUEST_SCHEME: &str = "request.scheme";
pub const REQUEST_HEADERS: &str = "request.headers";
pub const REQUEST_BODY: &str = "request.body";
/// Cancellation signal; starts unsignaled and is never triggered by the host.
pub const REQUEST_CANCELLATION: &str = "request.cancellation";
/// Set by the pipeline during processing; drives the completion notification.
pub const REQUEST_ID: &str = "request.id";

pub const SERVER_LOCAL_ADDRESS: &str = "server.local_address";
pub const SERVER_LOCAL_PORT: &str = "server.local_port";
pub const SERVER_REMOTE_ADDRESS: &str = "server.remote_address";
pub const SERVER_REMOTE_PORT: &str = "server.remote_port";
pub const SERVER_IS_LOCAL: &str = "server.is_local";

/// Present only on the `https` scheme, which this host never produces.
pub const SSL_CLIENT_CERTIFICATE: &str = "ssl.client_certificate";

pub const RESPONSE_HEADERS: &str = "response.headers";
pub const RESPONSE_BODY: &str = "response.body";
pub const RESPONSE_STATUS_CODE: &str = "response.status_code";
pub const RESPONSE_REASON_PHRASE: &str = "response.reason_phrase";

/// The value stored under [`HOST_VERSION`].
pub const HOST_VERSION_VALUE: &str = "1.0";
