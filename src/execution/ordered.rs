use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{spawn_all, ParallelError, Request, Response};
use crate::metrics;

/// Runs every request concurrently and returns one response per request.
///
/// `responses[i]` always belongs to `requests[i]`, whatever order the requests
/// completed in. Individual failures are reported in their response; the call
/// itself only fails if `ctx` is cancelled before every request completed.
pub async fn execute_parallel_ordered<R: Request>(
    ctx: &CancellationToken,
    requests: Vec<R>,
) -> Result<Vec<Response<R::Output, R::Error>>, ParallelError<R::Error>> {
    let total = requests.len();
    let mut pending = spawn_all(ctx, requests);
    let mut slots: Vec<Option<Response<R::Output, R::Error>>> = (0..total).map(|_| None).collect();

    loop {
        tokio::select! {
            biased;
            next = pending.next() => match next {
                Some(response) => {
                    let index = response.index;
                    slots[index] = Some(response);
                }
                None => break,
            },
            _ = ctx.cancelled() => return Err(ParallelError::Cancelled),
        }
    }

    let failed = slots
        .iter()
        .filter(|slot| matches!(slot, Some(Response { result: Err(_), .. })))
        .count();
    metrics::record_parallel_batch(total, failed);

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                ParallelError::TaskFailed(format!("No response collected for request {}", index))
            })
        })
        .collect()
}
