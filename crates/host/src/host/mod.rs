//! Listener lifecycle, accept loop and addressing.
//!
//! [`HttpHost`] owns the TCP listener and moves through `Idle` ->
//! `Initialized` -> `Listening` -> `Stopped`. Each accepted connection runs
//! on its own task; the loop re-arms before processing so intake never waits
//! on the pipeline.

mod address;
pub use address::BindMode;
pub use address::HostAddress;

mod error;
pub use error::HostError;
pub use error::ListenerClosed;

mod http_host;
pub use http_host::CompletionHook;
pub use http_host::ErrorHook;
pub use http_host::HostBuilder;
pub use http_host::HttpHost;
