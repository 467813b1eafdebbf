//! Bounded-concurrency fan-out for bulk operations (analysis, article runs).
//! Orthogonal to the single-worker scheduler loop.

use std::future::Future;

use futures::stream::{self, StreamExt};

/// Runs `op` over `items` with at most `workers` futures in flight.
///
/// `on_progress(done, total)` fires after every completion. Results come back
/// in input order regardless of completion order.
pub async fn run_bounded<T, R, F, Fut, P>(
    items: Vec<T>,
    workers: usize,
    op: F,
    mut on_progress: P,
) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
    P: FnMut(usize, usize),
{
    let total = items.len();
    let mut slots: Vec<Option<R>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);

    let mut completions = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let fut = op(item);
            async move { (index, fut.await) }
        })
        .buffer_unordered(workers.max(1));

    let mut done = 0;
    while let Some((index, result)) = completions.next().await {
        slots[index] = Some(result);
        done += 1;
        on_progress(done, total);
    }

    slots.into_iter().flatten().collect()
}
