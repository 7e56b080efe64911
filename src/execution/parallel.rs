use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{spawn_all, ParallelError, Request, Response};
use crate::metrics;

/// Runs every request concurrently and waits for all of them.
///
/// A failing request does not stop its siblings. The first error observed in
/// completion order is returned once every request has finished.
pub async fn execute_parallel<R: Request>(
    ctx: &CancellationToken,
    requests: Vec<R>,
) -> Result<(), ParallelError<R::Error>> {
    let total = requests.len();
    let mut pending = spawn_all(ctx, requests);
    let mut first_error = None;
    let mut failed = 0;

    loop {
        tokio::select! {
            biased;
            next = pending.next() => match next {
                Some(Response { index, result: Err(err) }) => {
                    debug!(index, error = %err, "Parallel request failed");
                    failed += 1;
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Some(_) => {}
                None => break,
            },
            _ = ctx.cancelled() => {
                debug!(total, "Parallel execution cancelled before join completed");
                return Err(ParallelError::Cancelled);
            }
        }
    }

    metrics::record_parallel_batch(total, failed);
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Runs every request concurrently and yields responses as they complete.
///
/// The stream ends once every response has been yielded or `ctx` is cancelled.
/// Use `Response::index` to map a response back to its request.
pub fn execute_parallel_unordered<R: Request>(
    ctx: &CancellationToken,
    requests: Vec<R>,
) -> impl Stream<Item = Response<R::Output, R::Error>> {
    spawn_all(ctx, requests).take_until(ctx.clone().cancelled_owned())
}
