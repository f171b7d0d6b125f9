//! The listener lifecycle and accept loop.
//!
//! [`HttpHost`] moves through `Idle` -> `Initialized` -> `Listening` ->
//! `Stopped`, and `Stopped` is re-enterable through `start`. The accept loop
//! re-arms before processing: every accepted connection is handed to its own
//! task and the loop immediately returns to `accept`, so a slow pipeline
//! never stalls intake.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::connection::{read_head, RequestBody, ResponseChannel};
use crate::ensure;
use crate::environment::EnvironmentBuilder;
use crate::pipeline::{Pipeline, PipelineError};
use crate::target::{MountRoot, RequestTarget};

use super::address::{BindMode, HostAddress};
use super::error::{classify_failure, FailureClass, HostError};

/// Invoked after a response is finished, with the `request.id` the pipeline
/// established. Requests where the pipeline set no id fire no notification.
pub type CompletionHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Invoked for pipeline failures that are not expected terminations, with the
/// raw request target and the failure itself.
pub type ErrorHook = Arc<dyn Fn(&str, &PipelineError) + Send + Sync>;

/// Configures and builds an [`HttpHost`].
pub struct HostBuilder {
    bind_mode: BindMode,
    port: u16,
    mount_root: MountRoot,
    completion_hooks: Vec<CompletionHook>,
    error_hook: ErrorHook,
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self {
            bind_mode: BindMode::Any,
            port: 8080,
            mount_root: MountRoot::default(),
            completion_hooks: Vec::new(),
            error_hook: Arc::new(|raw_target, failure| {
                error!(request = %raw_target, cause = %failure, "pipeline failure");
            }),
        }
    }
}

impl HostBuilder {
    pub fn bind_mode(mut self, mode: BindMode) -> Self {
        self.bind_mode = mode;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn mount_root(mut self, root: impl Into<MountRoot>) -> Self {
        self.mount_root = root.into();
        self
    }

    pub fn on_completion(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.completion_hooks.push(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&str, &PipelineError) + Send + Sync + 'static) -> Self {
        self.error_hook = Arc::new(hook);
        self
    }

    pub fn build(self) -> HttpHost {
        HttpHost {
            bind_mode: self.bind_mode,
            port: self.port,
            mount_root: self.mount_root,
            completion_hooks: self.completion_hooks,
            error_hook: self.error_hook,
            pipeline: None,
            state: State::Idle,
            local_addr: None,
        }
    }
}

enum State {
    Idle,
    Initialized,
    Listening { shutdown: CancellationToken, worker: JoinHandle<()> },
    Stopped,
}

/// The listener-to-environment adapter.
pub struct HttpHost {
    bind_mode: BindMode,
    port: u16,
    mount_root: MountRoot,
    completion_hooks: Vec<CompletionHook>,
    error_hook: ErrorHook,
    pipeline: Option<Arc<dyn Pipeline>>,
    state: State,
    local_addr: Option<SocketAddr>,
}

/// The accept seam the loop runs against.
#[async_trait]
trait Accept: Send + Sync + 'static {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Accept for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// The configuration snapshot an accept loop runs against.
struct LoopContext<A> {
    listener: A,
    mount_root: MountRoot,
    pipeline: Arc<dyn Pipeline>,
    completion_hooks: Vec<CompletionHook>,
    error_hook: ErrorHook,
    shutdown: CancellationToken,
}

impl HttpHost {
    pub fn builder() -> HostBuilder {
        HostBuilder::default()
    }

    /// Builds the downstream pipeline. Callable exactly once; a second call
    /// fails with [`HostError::AlreadyInitialized`].
    pub fn initialize<F>(&mut self, factory: F) -> Result<(), HostError>
    where
        F: FnOnce() -> Arc<dyn Pipeline>,
    {
        ensure!(self.pipeline.is_none(), HostError::AlreadyInitialized);
        self.pipeline = Some(factory());
        self.state = State::Initialized;
        Ok(())
    }

    /// Binds the listener and spawns the accept loop.
    ///
    /// No-op while the accept loop is running; fails with
    /// [`HostError::NotInitialized`] before [`initialize`](Self::initialize).
    /// A host whose loop has ended, whether stopped or failed on an
    /// unexpected accept error, binds a fresh listener and resumes.
    pub async fn start(&mut self) -> Result<(), HostError> {
        if let State::Listening { worker, .. } = &self.state {
            if !worker.is_finished() {
                return Ok(());
            }
        }
        let pipeline = self.pipeline.clone().ok_or(HostError::NotInitialized)?;

        let address = self.address();
        let listener = TcpListener::bind(address.socket_addr())
            .await
            .map_err(|source| HostError::bind(address.to_string(), source))?;
        self.local_addr = listener.local_addr().ok();

        info!(address = %address, "listening");

        let shutdown = CancellationToken::new();
        let context = Arc::new(LoopContext {
            listener,
            mount_root: self.mount_root.clone(),
            pipeline,
            completion_hooks: self.completion_hooks.clone(),
            error_hook: Arc::clone(&self.error_hook),
            shutdown: shutdown.clone(),
        });
        let worker = tokio::spawn(accept_loop(context));

        self.state = State::Listening { shutdown, worker };
        Ok(())
    }

    /// Stops listening and joins the accept loop. No-op when not listening;
    /// requests already handed to their own tasks run to completion.
    pub async fn stop(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Stopped);
        match state {
            State::Listening { shutdown, worker } => {
                shutdown.cancel();
                if worker.await.is_err() {
                    warn!("accept loop ended abnormally");
                }
            }
            other => self.state = other,
        }
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), HostError> {
        ensure!(!self.is_listening(), HostError::mutable_while_listening("port"));
        self.port = port;
        Ok(())
    }

    pub fn set_bind_mode(&mut self, mode: BindMode) -> Result<(), HostError> {
        ensure!(!self.is_listening(), HostError::mutable_while_listening("bind mode"));
        self.bind_mode = mode;
        Ok(())
    }

    pub fn set_mount_root(&mut self, root: impl Into<MountRoot>) -> Result<(), HostError> {
        ensure!(!self.is_listening(), HostError::mutable_while_listening("mount root"));
        self.mount_root = root.into();
        Ok(())
    }

    /// The advertised address, regenerated from the current configuration.
    pub fn address(&self) -> HostAddress {
        HostAddress::new(self.bind_mode, self.port, self.mount_root.clone())
    }

    /// The concrete bound address, once started. With port 0 this carries the
    /// port the operating system picked.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.state, State::Listening { .. })
    }
}

async fn accept_loop<A: Accept>(context: Arc<LoopContext<A>>) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = context.shutdown.cancelled() => break,
            accepted = context.listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote)) => {
                // hand the connection to its own task and re-arm immediately
                let context = Arc::clone(&context);
                tokio::spawn(async move {
                    handle_connection(context, stream, remote).await;
                });
            }
            Err(cause) if is_transient_accept_error(&cause) => {
                warn!(cause = %cause, "failed to accept");
            }
            Err(cause) => {
                // a later start() binds a fresh listener and resumes
                error!(cause = %cause, "listener failed, accepting no further connections");
                break;
            }
        }
    }
}

fn is_transient_accept_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
    )
}

async fn handle_connection<A: Accept>(context: Arc<LoopContext<A>>, stream: TcpStream, remote: SocketAddr) {
    let local = match stream.local_addr() {
        Ok(local) => local,
        Err(cause) => {
            debug!(cause = %cause, "connection lost before processing");
            return;
        }
    };
    let (mut read_half, write_half) = stream.into_split();

    let mut buf = BytesMut::new();
    let head = match read_head(&mut read_half, &mut buf).await {
        Ok(Some(head)) => head,
        Ok(None) => return,
        Err(cause) => {
            debug!(cause = %cause, "discarding unreadable request");
            return;
        }
    };

    let raw_target = head.target.clone();
    let Some(target) = RequestTarget::decompose(&raw_target, &context.mount_root) else {
        trace!(request = %raw_target, "request target outside the mount root, discarding");
        return;
    };

    let response = ResponseChannel::new(write_half, head.version);
    let body = RequestBody::from_head(&head, read_half, buf);

    let mut env = match EnvironmentBuilder::new(head, target, body, response.clone(), local, remote).build() {
        Ok(env) => env,
        Err(cause) => {
            debug!(cause = %cause, "failed to assemble the request environment");
            return;
        }
    };

    if let Err(failure) = context.pipeline.call(&mut env).await {
        match classify_failure(failure.as_ref()) {
            FailureClass::Ignored => {
                trace!(request = %raw_target, cause = %failure, "ignoring expected termination");
            }
            FailureClass::Unexpected => {
                (context.error_hook)(&raw_target, &failure);
                response.prepare_error_response();
            }
        }
    }

    // best effort: the peer may already be gone
    if let Err(cause) = response.finish().await {
        trace!(cause = %cause, "failed to finish the response");
    }

    if let Some(id) = env.request_id() {
        for hook in &context.completion_hooks {
            hook(&id);
        }
    }
}

impl fmt::Debug for HttpHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpHost")
            .field("address", &self.address().to_string())
            .field("listening", &self.is_listening())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for HostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuilder")
            .field("bind_mode", &self.bind_mode)
            .field("port", &self.port)
            .field("mount_root", &self.mount_root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::BoxFuture;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::environment::Environment;
    use crate::pipeline::make_pipeline;

    use super::*;

    fn noop(_env: &mut Environment) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(async { Ok(()) })
    }

    async fn expect_default_response(addr: SocketAddr) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert!(String::from_utf8_lossy(&out).starts_with("HTTP/1.1 200 OK\r\n"));
    }

    /// Fails the first accept attempts with a configured error kind, then
    /// delegates to a real listener.
    struct FlakyAcceptor {
        inner: TcpListener,
        failures: AtomicUsize,
        kind: io::ErrorKind,
    }

    #[async_trait]
    impl Accept for FlakyAcceptor {
        async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            if self.failures.swap(0, Ordering::SeqCst) > 0 {
                return Err(io::Error::from(self.kind));
            }
            self.inner.accept().await
        }
    }

    fn loop_context<A: Accept>(listener: A, shutdown: CancellationToken) -> Arc<LoopContext<A>> {
        Arc::new(LoopContext {
            listener,
            mount_root: MountRoot::new("/"),
            pipeline: Arc::new(make_pipeline(noop)),
            completion_hooks: Vec::new(),
            error_hook: Arc::new(|_, _| {}),
            shutdown,
        })
    }

    #[test]
    fn initialize_is_callable_exactly_once() {
        let mut host = HttpHost::builder().build();
        host.initialize(|| Arc::new(make_pipeline(noop))).unwrap();

        let error = host.initialize(|| Arc::new(make_pipeline(noop))).unwrap_err();
        assert!(matches!(error, HostError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn start_requires_initialize() {
        let mut host = HttpHost::builder().port(0).build();
        let error = host.start().await.unwrap_err();
        assert!(matches!(error, HostError::NotInitialized));
    }

    #[tokio::test]
    async fn configuration_is_frozen_while_listening() {
        let mut host = HttpHost::builder().bind_mode(BindMode::Localhost).port(0).build();
        host.initialize(|| Arc::new(make_pipeline(noop))).unwrap();
        host.start().await.unwrap();

        assert!(matches!(host.set_port(9999), Err(HostError::MutableWhileListening { .. })));
        assert!(matches!(host.set_bind_mode(BindMode::Any), Err(HostError::MutableWhileListening { .. })));
        assert!(matches!(host.set_mount_root("/other"), Err(HostError::MutableWhileListening { .. })));

        host.stop().await;
        host.set_port(9999).unwrap();
        assert_eq!(host.address().to_string(), "http://localhost:9999/");
    }

    #[tokio::test]
    async fn start_is_a_no_op_while_listening_and_stop_reenters() {
        let mut host = HttpHost::builder().bind_mode(BindMode::Localhost).port(0).build();
        host.initialize(|| Arc::new(make_pipeline(noop))).unwrap();

        host.start().await.unwrap();
        let first = host.local_addr().unwrap();
        host.start().await.unwrap();
        assert_eq!(host.local_addr().unwrap(), first);

        host.stop().await;
        assert!(!host.is_listening());
        host.stop().await;

        host.start().await.unwrap();
        assert!(host.is_listening());
        host.stop().await;
    }

    #[test]
    fn transient_accept_error_kinds() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::Interrupted,
            io::ErrorKind::TimedOut,
        ] {
            assert!(is_transient_accept_error(&io::Error::from(kind)), "{kind:?}");
        }
        for kind in [io::ErrorKind::PermissionDenied, io::ErrorKind::AddrInUse, io::ErrorKind::OutOfMemory] {
            assert!(!is_transient_accept_error(&io::Error::from(kind)), "{kind:?}");
        }
    }

    #[tokio::test]
    async fn one_transient_accept_failure_does_not_stop_intake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let flaky = FlakyAcceptor {
            inner: listener,
            failures: AtomicUsize::new(1),
            kind: io::ErrorKind::ConnectionReset,
        };

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(accept_loop(loop_context(flaky, shutdown.clone())));

        // the first accept attempt fails transiently; intake continues
        expect_default_response(addr).await;
        expect_default_response(addr).await;

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_accept_failure_ends_the_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let flaky = FlakyAcceptor {
            inner: listener,
            failures: AtomicUsize::new(1),
            kind: io::ErrorKind::PermissionDenied,
        };

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(accept_loop(loop_context(flaky, shutdown)));

        // the loop terminates on its own, without a shutdown signal
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn start_rebinds_after_the_accept_loop_ends() {
        let mut host = HttpHost::builder().bind_mode(BindMode::Localhost).port(0).build();
        host.initialize(|| Arc::new(make_pipeline(noop))).unwrap();
        host.start().await.unwrap();

        // stand in for an accept loop that died on an unexpected error
        if let State::Listening { worker, .. } = &host.state {
            worker.abort();
            while !worker.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        host.start().await.unwrap();
        assert!(host.is_listening());
        expect_default_response(host.local_addr().unwrap()).await;

        host.stop().await;
    }
}
