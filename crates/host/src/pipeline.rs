//! The downstream processing seam.
//!
//! The host knows nothing about routing or application frameworks; it hands
//! each assembled [`Environment`] to exactly one [`Pipeline`] and interprets
//! the returned result. A plain async function over `&mut Environment` can be
//! lifted into a pipeline with [`make_pipeline`].

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::environment::Environment;

/// The error type a pipeline may surface back to the host.
///
/// Failures are classified by walking the `source()` chain to the root cause;
/// expected terminations (listener shutdown, a disposed response, peer
/// disconnects) are swallowed and everything else reaches the error hook.
pub type PipelineError = Box<dyn Error + Send + Sync>;

/// A downstream consumer of per-request environments.
#[async_trait]
pub trait Pipeline: Send + Sync + 'static {
    async fn call(&self, env: &mut Environment) -> Result<(), PipelineError>;
}

/// A [`Pipeline`] built from a plain function.
///
/// The function borrows the environment for the duration of the returned
/// future, so handlers can both read request entries and drive the response
/// views without cloning.
pub struct PipelineFn<F> {
    func: F,
}

impl<F> fmt::Debug for PipelineFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Pipeline for PipelineFn<F>
where
    F: for<'env> Fn(&'env mut Environment) -> BoxFuture<'env, Result<(), PipelineError>>
        + Send
        + Sync
        + 'static,
{
    async fn call(&self, env: &mut Environment) -> Result<(), PipelineError> {
        (self.func)(env).await
    }
}

/// Lifts an async function into a [`Pipeline`].
pub fn make_pipeline<F>(func: F) -> PipelineFn<F>
where
    F: for<'env> Fn(&'env mut Environment) -> BoxFuture<'env, Result<(), PipelineError>>
        + Send
        + Sync
        + 'static,
{
    PipelineFn { func }
}
