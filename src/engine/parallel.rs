// src/engine/parallel.rs

//! Bounded worker pool over indexed jobs.
//!
//! `W` tokio tasks drain a shared job queue and push `(idx, result)` into a
//! result channel; the collector slots results back by index, so output order
//! never depends on completion order.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::engine::context::CancelToken;

/// Run `f` over `items` on at most `workers` tasks.
///
/// The returned vector has one slot per item, in input order. A slot is
/// `None` when the job never ran (or its result was discarded) because the
/// pool was cancelled. When `stop_on` returns true for a result the pool is
/// cancelled; jobs already running finish but their results are dropped.
pub async fn run_indexed<T, R, F, Fut, S>(
    items: Vec<T>,
    workers: usize,
    cancel: &CancelToken,
    f: F,
    stop_on: S,
) -> Vec<Option<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(usize, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    S: Fn(&R) -> bool,
{
    let n = items.len();
    let mut slots: Vec<Option<R>> = Vec::with_capacity(n);
    slots.resize_with(n, || None);
    if n == 0 {
        return slots;
    }

    let pool_cancel = cancel.child();
    let workers = workers.clamp(1, n);

    let (job_tx, job_rx) = mpsc::channel::<(usize, T)>(n);
    for (idx, item) in items.into_iter().enumerate() {
        // Capacity is `n`, so this never waits.
        if job_tx.send((idx, item)).await.is_err() {
            break;
        }
    }
    drop(job_tx);

    let job_rx = Arc::new(Mutex::new(job_rx));
    let (res_tx, mut res_rx) = mpsc::channel::<(usize, R)>(workers * 2);
    let f = Arc::new(f);

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let job_rx = job_rx.clone();
        let res_tx = res_tx.clone();
        let cancel = pool_cancel.clone();
        let f = f.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let job = { job_rx.lock().await.recv().await };
                let Some((idx, item)) = job else { break };
                let out = f(idx, item).await;
                if cancel.is_cancelled() {
                    break;
                }
                if res_tx.send((idx, out)).await.is_err() {
                    break;
                }
            }
            debug!(worker, "pool worker finished");
        }));
    }
    drop(res_tx);

    while let Some((idx, out)) = res_rx.recv().await {
        if stop_on(&out) {
            pool_cancel.cancel();
        }
        slots[idx] = Some(out);
    }

    for handle in handles {
        let _ = handle.await;
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn results_follow_input_order() {
        let items: Vec<u64> = (0..50).collect();
        let out = run_indexed(
            items,
            8,
            &CancelToken::new(),
            |idx, x| async move {
                // Later jobs finish first.
                tokio::time::sleep(Duration::from_millis(50 - x)).await;
                (idx, x * 2)
            },
            |_| false,
        )
        .await;
        let got: Vec<(usize, u64)> = out.into_iter().map(Option::unwrap).collect();
        let want: Vec<(usize, u64)> = (0..50).map(|i| (i as usize, i * 2)).collect();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn empty_input_and_zero_workers() {
        let out: Vec<Option<u8>> =
            run_indexed(Vec::<u8>::new(), 0, &CancelToken::new(), |_, x| async move { x }, |_| false).await;
        assert!(out.is_empty());

        let out = run_indexed(vec![1u8, 2], 0, &CancelToken::new(), |_, x| async move { x }, |_| false).await;
        assert_eq!(out, vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn stop_predicate_cancels_remaining_jobs() {
        let items: Vec<u32> = (0..100).collect();
        let out = run_indexed(
            items,
            1,
            &CancelToken::new(),
            |_, x| async move { x },
            |x| *x == 3,
        )
        .await;
        assert_eq!(out[3], Some(3));
        assert!(out[99].is_none());
    }

    #[tokio::test]
    async fn pool_cancellation_does_not_cancel_the_parent() {
        let parent = CancelToken::new();
        let _ = run_indexed(vec![1u8], 1, &parent, |_, x| async move { x }, |_| true).await;
        assert!(!parent.is_cancelled());
    }
}
