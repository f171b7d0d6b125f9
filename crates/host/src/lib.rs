//! An adapter that turns a raw TCP/HTTP listener into a normalized,
//! framework-agnostic per-request environment.
//!
//! This crate owns the listener lifecycle and accept loop, decomposes each raw
//! request target against a configured mount root, and assembles a flat
//! key/value [`Environment`](environment::Environment) describing the request
//! (method, path, headers, body stream, connection metadata). The environment
//! is handed to a single downstream [`Pipeline`](pipeline::Pipeline); response
//! writes flow back through live views onto the underlying connection.
//!
//! # Features
//!
//! - Self-perpetuating asynchronous accept loop that re-arms before processing,
//!   so a slow pipeline never stalls intake
//! - Mount-root validation with legacy-compatible percent-decoding (exactly
//!   once) and traversal-free path flattening
//! - Case-insensitive multi-value header store with lossless raw round-trips
//!   and a quote-aware comma tokenizer
//! - Restricted response headers (`Content-Length`, `Keep-Alive`,
//!   `Transfer-Encoding`) redirected to native connection properties instead
//!   of header storage
//! - Streaming request bodies (content-length and chunked)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::future::BoxFuture;
//! use tracing::Level;
//! use tracing_subscriber::FmtSubscriber;
//!
//! use gantry_host::environment::Environment;
//! use gantry_host::host::HttpHost;
//! use gantry_host::pipeline::{make_pipeline, PipelineError};
//!
//! fn hello(env: &mut Environment) -> BoxFuture<'_, Result<(), PipelineError>> {
//!     Box::pin(async move {
//!         let body = env.response_body().expect("response body is always present");
//!         env.set_status_code(200)?;
//!         body.write("Hello World!\r\n").await?;
//!         Ok(())
//!     })
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     let mut host = HttpHost::builder().port(8080).mount_root("/").build();
//!     host.initialize(|| Arc::new(make_pipeline(hello))).expect("initialize once");
//!     host.start().await.expect("start listening");
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     host.stop().await;
//! }
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`host`]: Listener lifecycle, accept loop and addressing
//! - [`environment`]: The per-request environment map and its builder
//! - [`headers`]: Multi-value header store, tokenizer and the restricted
//!   response-header interceptor
//! - [`target`]: Request-target decomposition against the mount root
//! - [`connection`]: Request head parsing, body streams and the response
//!   channel
//! - [`pipeline`]: The downstream processing seam
//!
//! # Limitations
//!
//! - HTTP/1.x only; no TLS termination and no HTTP/2 multiplexing
//! - No application-level routing: the host stops at producing the
//!   environment and invoking one downstream callable
//! - Maximum request head size: 8KB; maximum number of headers: 64

pub mod connection;
pub mod environment;
pub mod headers;
pub mod host;
pub mod pipeline;
pub mod target;

mod utils;
pub(crate) use utils::ensure;
