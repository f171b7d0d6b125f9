//! Host lifecycle errors and the pipeline-failure taxonomy.
//!
//! Pipeline errors are classified by walking the `source()` chain down to the
//! root cause. Failures that merely mean "the conversation is over" (the
//! listener was shut down, the response was already disposed, the peer
//! disconnected) are swallowed; everything else reaches the host's error hook.

use std::error::Error;
use std::io;

use thiserror::Error;

use crate::connection::ResponseDisposed;

/// Errors from the host lifecycle itself, not from request processing.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host is already initialized")]
    AlreadyInitialized,

    #[error("host must be initialized before it can start")]
    NotInitialized,

    #[error("{what} cannot change while the host is listening")]
    MutableWhileListening { what: &'static str },

    #[error("failed to bind {address}: {source}")]
    Bind { address: String, source: io::Error },
}

impl HostError {
    pub(crate) fn mutable_while_listening(what: &'static str) -> Self {
        Self::MutableWhileListening { what }
    }

    pub(crate) fn bind(address: impl Into<String>, source: io::Error) -> Self {
        Self::Bind { address: address.into(), source }
    }
}

/// Marker error for operations raced against listener shutdown.
///
/// A pipeline failure whose root cause is this type is swallowed without
/// reaching the error hook.
#[derive(Debug, Error)]
#[error("listener already closed")]
pub struct ListenerClosed;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FailureClass {
    /// Expected termination; discard silently.
    Ignored,
    /// A genuine pipeline failure; report through the error hook.
    Unexpected,
}

/// Classifies a pipeline failure by its root cause.
pub(crate) fn classify_failure(error: &(dyn Error + 'static)) -> FailureClass {
    let mut cause = error;
    while let Some(source) = cause.source() {
        cause = source;
    }

    if cause.downcast_ref::<ListenerClosed>().is_some() {
        return FailureClass::Ignored;
    }
    if cause.downcast_ref::<ResponseDisposed>().is_some() {
        return FailureClass::Ignored;
    }
    if let Some(io_error) = cause.downcast_ref::<io::Error>() {
        if is_disconnect(io_error.kind()) {
            return FailureClass::Ignored;
        }
    }
    FailureClass::Unexpected
}

fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("wrapper: {source}")]
    struct Wrapper {
        #[from]
        source: io::Error,
    }

    #[test]
    fn listener_closed_at_the_root_is_ignored() {
        let error: Box<dyn Error + Send + Sync> =
            Box::new(Wrapper::from(io::Error::new(io::ErrorKind::Other, ListenerClosed)));
        assert_eq!(classify_failure(error.as_ref()), FailureClass::Ignored);
    }

    #[test]
    fn disposed_response_is_ignored() {
        let error: Box<dyn Error + Send + Sync> =
            Box::new(io::Error::new(io::ErrorKind::NotConnected, ResponseDisposed));
        assert_eq!(classify_failure(error.as_ref()), FailureClass::Ignored);
    }

    #[test]
    fn disconnect_kinds_are_ignored() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected,
            io::ErrorKind::UnexpectedEof,
        ] {
            let error: Box<dyn Error + Send + Sync> = Box::new(io::Error::from(kind));
            assert_eq!(classify_failure(error.as_ref()), FailureClass::Ignored);
        }
    }

    #[test]
    fn other_io_errors_are_unexpected() {
        let error: Box<dyn Error + Send + Sync> = Box::new(io::Error::from(io::ErrorKind::OutOfMemory));
        assert_eq!(classify_failure(error.as_ref()), FailureClass::Unexpected);
    }

    #[test]
    fn application_errors_are_unexpected() {
        let error: Box<dyn Error + Send + Sync> = "handler blew up".into();
        assert_eq!(classify_failure(error.as_ref()), FailureClass::Unexpected);
    }
}
