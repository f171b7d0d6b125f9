//! Assembly of the per-request environment.
//!
//! The builder takes the parsed head, the decomposed target, the body stream
//! and the response channel, and populates every `request.*`, `server.*` and
//! `response.*` key the contract defines. All assignments go through the
//! guarded setter so the assign-once semantics are exercised from the start.

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

use crate::connection::{RequestBody, RequestHead, ResponseChannel};
use crate::headers::SharedHeaders;
use crate::target::RequestTarget;

use super::{keys, EnvError, Environment, Value};

pub(crate) struct EnvironmentBuilder {
    head: RequestHead,
    target: RequestTarget,
    body: RequestBody,
    response: ResponseChannel,
    local: SocketAddr,
    remote: SocketAddr,
}

impl EnvironmentBuilder {
    pub(crate) fn new(
        head: RequestHead,
        target: RequestTarget,
        body: RequestBody,
        response: ResponseChannel,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Self {
        Self { head, target, body, response, local, remote }
    }

    pub(crate) fn build(self) -> Result<Environment, EnvError> {
        let Self { head, target, body, response, local, remote } = self;

        let mut env = Environment::with_response(response.clone());

        env.set(keys::HOST_VERSION, Value::Str(keys::HOST_VERSION_VALUE.to_owned()))?;
        env.set(keys::REQUEST_CANCELLATION, Value::Cancellation(CancellationToken::new()))?;

        env.set(keys::REQUEST_METHOD, Value::Str(head.method.clone()))?;
        env.set(keys::REQUEST_PROTOCOL, Value::Str(head.protocol().to_owned()))?;
        env.set(keys::REQUEST_SCHEME, Value::Str("http".to_owned()))?;
        env.set(keys::REQUEST_PATH_BASE, Value::Str(target.path_base().to_owned()))?;
        env.set(keys::REQUEST_PATH, Value::Str(target.path().to_owned()))?;
        env.set(keys::REQUEST_QUERY_STRING, Value::Str(target.query_string().to_owned()))?;
        env.set(keys::REQUEST_HEADERS, Value::Headers(SharedHeaders::new(head.headers)))?;
        env.set(keys::REQUEST_BODY, Value::RequestBody(body))?;

        env.set(keys::SERVER_LOCAL_ADDRESS, Value::Str(local.ip().to_string()))?;
        env.set(keys::SERVER_LOCAL_PORT, Value::Str(local.port().to_string()))?;
        env.set(keys::SERVER_REMOTE_ADDRESS, Value::Str(remote.ip().to_string()))?;
        env.set(keys::SERVER_REMOTE_PORT, Value::Str(remote.port().to_string()))?;
        env.set(keys::SERVER_IS_LOCAL, Value::Bool(remote.ip().is_loopback() || remote.ip() == local.ip()))?;

        env.set(keys::RESPONSE_HEADERS, Value::ResponseHeaders(response.headers()))?;
        env.set(keys::RESPONSE_BODY, Value::ResponseBody(response.body()))?;

        Ok(env)
    }
}
