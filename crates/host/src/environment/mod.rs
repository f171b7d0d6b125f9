//! The per-request environment: a flat, mutable map of namespaced keys to
//! polymorphic values, owned by the accept loop and handed by reference to
//! the downstream pipeline.
//!
//! Two behaviors distinguish the environment from a plain map:
//!
//! - **Guarded assignment**: once an object-valued key (headers, body
//!   streams, cancellation signal) is bound, replacing it with a *different*
//!   object is rejected. Idempotent re-assignment of the same handle and the
//!   first assignment both succeed. Scalar keys replace freely.
//! - **Live response views**: `response.status_code` and
//!   `response.reason_phrase` route through the attached
//!   [`ResponseChannel`], so writes during pipeline execution are reflected
//!   immediately on the underlying connection.

use std::collections::HashMap;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::connection::{RequestBody, ResponseBody, ResponseChannel, ResponseHeaders};
use crate::headers::SharedHeaders;

pub mod keys;

mod builder;
pub(crate) use builder::EnvironmentBuilder;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("environment key {key} is already bound to a different value")]
    Rebind { key: String },
}

impl EnvError {
    fn rebind(key: &str) -> Self {
        Self::Rebind { key: key.to_owned() }
    }
}

/// A polymorphic environment value.
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Headers(SharedHeaders),
    ResponseHeaders(ResponseHeaders),
    RequestBody(RequestBody),
    ResponseBody(ResponseBody),
    Cancellation(CancellationToken),
}

impl Value {
    fn is_guarded(&self) -> bool {
        matches!(
            self,
            Value::Headers(_)
                | Value::ResponseHeaders(_)
                | Value::RequestBody(_)
                | Value::ResponseBody(_)
                | Value::Cancellation(_)
        )
    }

    fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Headers(a), Value::Headers(b)) => a.ptr_eq(b),
            (Value::ResponseHeaders(a), Value::ResponseHeaders(b)) => a.ptr_eq(b),
            (Value::RequestBody(a), Value::RequestBody(b)) => a.ptr_eq(b),
            (Value::ResponseBody(a), Value::ResponseBody(b)) => a.ptr_eq(b),
            // tokens carry no usable identity, so the first assignment wins
            (Value::Cancellation(_), Value::Cancellation(_)) => false,
            _ => false,
        }
    }
}

/// The flat per-request map. Exactly one instance exists per in-flight
/// request.
#[derive(Debug, Default)]
pub struct Environment {
    entries: HashMap<String, Value>,
    response: Option<ResponseChannel>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_response(response: ResponseChannel) -> Self {
        Self { entries: HashMap::new(), response: Some(response) }
    }

    /// Sets `key` to `value`, enforcing the guarded assignment rule and
    /// routing the live response keys through the connection.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), EnvError> {
        if key == keys::RESPONSE_STATUS_CODE && self.response.is_some() {
            if let (Some(channel), Value::Int(code)) = (&self.response, &value) {
                if let Ok(status) = u16::try_from(*code) {
                    channel.set_status(status);
                }
                return Ok(());
            }
        }
        if key == keys::RESPONSE_REASON_PHRASE && self.response.is_some() {
            if let (Some(channel), Value::Str(reason)) = (&self.response, &value) {
                channel.set_reason(reason.clone());
                return Ok(());
            }
        }

        if let Some(existing) = self.entries.get(key) {
            if existing.is_guarded() || value.is_guarded() {
                if existing.same_as(&value) {
                    return Ok(());
                }
                return Err(EnvError::rebind(key));
            }
        }
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    /// Reads `key`, cloning the value. Live response keys read through the
    /// connection.
    pub fn get(&self, key: &str) -> Option<Value> {
        if key == keys::RESPONSE_STATUS_CODE {
            if let Some(channel) = &self.response {
                return channel.status().map(|status| Value::Int(i64::from(status)));
            }
        }
        if key == keys::RESPONSE_REASON_PHRASE {
            if let Some(channel) = &self.response {
                return channel.reason().map(Value::Str);
            }
        }
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::Str(value)) => Some(value),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(Value::Bool(value)) => Some(value),
            _ => None,
        }
    }

    pub fn request_headers(&self) -> Option<SharedHeaders> {
        match self.get(keys::REQUEST_HEADERS) {
            Some(Value::Headers(headers)) => Some(headers),
            _ => None,
        }
    }

    pub fn response_headers(&self) -> Option<ResponseHeaders> {
        match self.get(keys::RESPONSE_HEADERS) {
            Some(Value::ResponseHeaders(headers)) => Some(headers),
            _ => None,
        }
    }

    pub fn request_body(&self) -> Option<RequestBody> {
        match self.get(keys::REQUEST_BODY) {
            Some(Value::RequestBody(body)) => Some(body),
            _ => None,
        }
    }

    pub fn response_body(&self) -> Option<ResponseBody> {
        match self.get(keys::RESPONSE_BODY) {
            Some(Value::ResponseBody(body)) => Some(body),
            _ => None,
        }
    }

    pub fn cancellation(&self) -> Option<CancellationToken> {
        match self.get(keys::REQUEST_CANCELLATION) {
            Some(Value::Cancellation(token)) => Some(token),
            _ => None,
        }
    }

    /// Unset until the pipeline writes one.
    pub fn status_code(&self) -> Option<u16> {
        match self.get(keys::RESPONSE_STATUS_CODE) {
            Some(Value::Int(code)) => u16::try_from(code).ok(),
            _ => None,
        }
    }

    pub fn set_status_code(&mut self, status: u16) -> Result<(), EnvError> {
        self.set(keys::RESPONSE_STATUS_CODE, Value::Int(i64::from(status)))
    }

    pub fn reason_phrase(&self) -> Option<String> {
        self.string(keys::RESPONSE_REASON_PHRASE)
    }

    pub fn set_reason_phrase(&mut self, reason: impl Into<String>) -> Result<(), EnvError> {
        self.set(keys::RESPONSE_REASON_PHRASE, Value::Str(reason.into()))
    }

    pub fn request_id(&self) -> Option<String> {
        self.string(keys::REQUEST_ID)
    }

    pub fn set_request_id(&mut self, id: impl Into<String>) -> Result<(), EnvError> {
        self.set(keys::REQUEST_ID, Value::Str(id.into()))
    }
}
