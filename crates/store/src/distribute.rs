//! Bounded fan-out over contiguous chunks with delayed error reporting.

use std::future::Future;

use futures::future::join_all;
use tracing::debug;

/// Split `n` items into at most `max_workers` contiguous chunks of `ceil(n / max_workers)`,
/// the last one possibly smaller. A `max_workers` of zero is treated as one.
pub fn chunk_sizes(n: usize, max_workers: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let workers = max_workers.max(1);
    let per_chunk = (n + workers - 1) / workers;
    let mut sizes = Vec::with_capacity(workers);
    let mut left = n;
    while left > 0 {
        let size = per_chunk.min(left);
        sizes.push(size);
        left -= size;
    }
    sizes
}

/// Run `f` over every item, one worker per chunk, each worker walking its chunk in order.
///
/// A failing item never stops its siblings: all errors are collected and, once every worker
/// has finished, the one belonging to the lowest input index is returned.
pub async fn distribute<T, F, Fut, E>(items: Vec<T>, max_workers: usize, f: F) -> Result<(), E>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    if items.is_empty() {
        return Ok(());
    }
    let sizes = chunk_sizes(items.len(), max_workers);
    let f = &f;
    let mut indexed = items.into_iter().enumerate();
    let workers: Vec<_> = sizes
        .into_iter()
        .map(|size| {
            let chunk: Vec<(usize, T)> = indexed.by_ref().take(size).collect();
            async move {
                let mut errors = Vec::new();
                for (idx, item) in chunk {
                    if let Err(e) = f(item).await {
                        errors.push((idx, e));
                    }
                }
                errors
            }
        })
        .collect();

    let worker_count = workers.len();
    let mut errors: Vec<(usize, E)> = join_all(workers).await.into_iter().flatten().collect();
    if errors.is_empty() {
        return Ok(());
    }
    debug!(workers = worker_count, failed = errors.len(), "distribute finished with errors");
    errors.sort_by_key(|(idx, _)| *idx);
    match errors.into_iter().next() {
        Some((_, e)) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn chunks_are_even_with_smaller_tail() {
        assert_eq!(chunk_sizes(31, 8), vec![4, 4, 4, 4, 4, 4, 4, 3]);
        assert_eq!(chunk_sizes(8, 8), vec![1; 8]);
        assert_eq!(chunk_sizes(3, 8), vec![1, 1, 1]);
        assert_eq!(chunk_sizes(9, 8), vec![2, 2, 2, 2, 1]);
        assert_eq!(chunk_sizes(5, 0), vec![5]);
        assert!(chunk_sizes(0, 8).is_empty());
    }

    #[tokio::test]
    async fn every_item_runs_exactly_once() {
        let seen = Mutex::new(Vec::new());
        distribute((0..31).collect(), 8, |i: usize| {
            let seen = &seen;
            async move {
                seen.lock().unwrap().push(i);
                Ok::<(), String>(())
            }
        })
        .await
        .unwrap();
        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..31).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_input_never_calls_back() {
        let calls = AtomicUsize::new(0);
        let res: Result<(), String> = distribute(Vec::<u8>::new(), 8, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert!(res.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lowest_index_error_wins_and_siblings_finish() {
        let calls = AtomicUsize::new(0);
        // 16 items over 4 workers: chunks [0..4) [4..8) [8..12) [12..16).
        let res = distribute((0..16).collect(), 4, |i: usize| {
            let calls = &calls;
            async move {
                // the later chunk fails first in wall time
                if i == 5 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                calls.fetch_add(1, Ordering::SeqCst);
                match i {
                    5 => Err(format!("item {}", i)),
                    13 => Err(format!("item {}", i)),
                    _ => Ok(()),
                }
            }
        })
        .await;
        assert_eq!(res, Err("item 5".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn workers_overlap() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        distribute((0..8).collect(), 4, |_: usize| {
            let (in_flight, peak) = (&in_flight, &peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), ()>(())
            }
        })
        .await
        .unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }
}
