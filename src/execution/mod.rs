//! Concurrent fan-out/fan-in over independent units of work.
//!
//! Every request is spawned onto the tokio runtime as soon as it is handed to
//! one of the `execute_parallel*` functions. Requests are never aborted by this
//! module: when the caller's context is cancelled the join stops waiting and
//! in-flight requests are expected to observe the same context themselves.

mod ordered;
mod parallel;

pub use ordered::execute_parallel_ordered;
pub use parallel::{execute_parallel, execute_parallel_unordered};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::FuturesUnordered;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A unit of work that can run independently of its siblings
#[async_trait]
pub trait Request: Send + Sync + 'static {
    type Output: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Performs the work, observing `ctx` for cancellation
    async fn process(&self, ctx: &CancellationToken) -> Result<Self::Output, Self::Error>;
}

/// Error type for parallel execution
#[derive(Debug, Error)]
pub enum ParallelError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Request(E),
    #[error("Parallel execution cancelled")]
    Cancelled,
    #[error("Request task failed: {0}")]
    TaskFailed(String),
}

/// The outcome of one request, tagged with its position in the input
#[derive(Debug)]
pub struct Response<T, E: std::error::Error + 'static> {
    pub index: usize,
    pub result: Result<T, ParallelError<E>>,
}

/// Spawns every request and returns their responses in completion order
pub(crate) fn spawn_all<R: Request>(
    ctx: &CancellationToken,
    requests: Vec<R>,
) -> FuturesUnordered<BoxFuture<'static, Response<R::Output, R::Error>>> {
    requests
        .into_iter()
        .enumerate()
        .map(|(index, request)| {
            let ctx = ctx.clone();
            let handle = tokio::spawn(async move { request.process(&ctx).await });
            async move {
                let result = match handle.await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(ParallelError::Request(err)),
                    Err(err) => Err(ParallelError::TaskFailed(err.to_string())),
                };
                Response { index, result }
            }
            .boxed()
        })
        .collect()
}
