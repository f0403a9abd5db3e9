//! Bounded worker stage
//!
//! The fan-out used at every level of a source's hierarchy. A stage knows
//! all of its items up front: they are pushed onto a channel sized exactly
//! to the item count, the channel is closed, and a fixed number of workers
//! drain it. There is no re-enqueue inside a stage.
//!
//! A failing item is logged and counted, never propagated: one broken team
//! page does not stop its siblings. Cancellation is checked before each item
//! is taken, so no new item starts once the token fires while in-flight
//! handlers run to completion.

use futures::future::join_all;
use std::future::Future;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::DomainResult;

/// Additive per-stage counters folded into the parent's totals
pub trait StageCounters: Default + Send {
    fn merge(&mut self, other: Self);
}

impl StageCounters for () {
    fn merge(&mut self, _other: Self) {}
}

impl StageCounters for usize {
    fn merge(&mut self, other: Self) {
        *self += other;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport<C> {
    pub total: usize,
    /// Items a worker took off the channel
    pub started: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Never started because the run was cancelled
    pub skipped: usize,
    pub counters: C,
}

/// Runs `handler` over `items` with at most `workers` in flight
///
/// Workers are futures joined on the calling task, so handlers may borrow
/// from the caller.
pub async fn run_bounded_stage<T, C, F, Fut>(
    label: &str,
    cancel: &CancellationToken,
    items: Vec<T>,
    workers: usize,
    handler: F,
) -> StageReport<C>
where
    C: StageCounters,
    F: Fn(T) -> Fut,
    Fut: Future<Output = DomainResult<C>>,
{
    let total = items.len();
    let mut report = StageReport {
        total,
        ..StageReport::default()
    };
    if total == 0 {
        return report;
    }

    let (tx, rx) = mpsc::channel(total);
    for item in items {
        // Capacity equals the item count, so this never fills up
        if tx.try_send(item).is_err() {
            break;
        }
    }
    drop(tx);

    let receiver = Mutex::new(rx);
    let state = Mutex::new(report);
    let worker_count = workers.clamp(1, total);
    debug!("[{}] {} items, {} workers", label, total, worker_count);

    let receiver = &receiver;
    let shared = &state;
    let handler = &handler;
    let worker = move |worker_id: usize| async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let next = receiver.lock().await.recv().await;
            let Some(item) = next else {
                break;
            };
            shared.lock().await.started += 1;

            match handler(item).await {
                Ok(counters) => {
                    let mut report = shared.lock().await;
                    report.succeeded += 1;
                    report.counters.merge(counters);
                }
                Err(err) => {
                    warn!("[{}] worker {} item failed: {}", label, worker_id, err);
                    shared.lock().await.failed += 1;
                }
            }
        }
    };

    join_all((0..worker_count).map(worker)).await;

    report = state.into_inner();
    report.skipped = report.total - report.started;
    if report.skipped > 0 {
        debug!("[{}] cancelled, {} items not started", label, report.skipped);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn failing_item_does_not_stop_siblings() {
        let cancel = CancellationToken::new();
        let seen = AtomicUsize::new(0);
        let report = run_bounded_stage("teams", &cancel, (1..=10).collect(), 3, |n: u32| {
            let seen = &seen;
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                if n == 4 {
                    Err(DomainError::http_status("/team/4", 500))
                } else {
                    Ok(1usize)
                }
            }
        })
        .await;

        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert_eq!(report.succeeded, 9);
        assert_eq!(report.failed, 1);
        assert_eq!(report.counters, 9);
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_worker_count() {
        let cancel = CancellationToken::new();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let report = run_bounded_stage("players", &cancel, (0..20).collect(), 4, |_: u32| {
            let (in_flight, peak) = (&in_flight, &peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(report.succeeded, 20);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn cancellation_stops_new_items_but_lets_running_ones_finish() {
        let cancel = CancellationToken::new();
        let finished = AtomicUsize::new(0);
        let report = run_bounded_stage("seasons", &cancel, (0..10).collect(), 2, |n: u32| {
            let (cancel, finished) = (&cancel, &finished);
            async move {
                if n == 1 {
                    cancel.cancel();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        // items 0 and 1 were in flight when the token fired
        assert_eq!(report.started, 2);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.skipped, 8);
    }

    #[tokio::test]
    async fn empty_stage_is_a_no_op() {
        let report: StageReport<()> =
            run_bounded_stage("empty", &CancellationToken::new(), Vec::<u32>::new(), 5, |_| async { Ok(()) }).await;
        assert_eq!(report.total, 0);
        assert_eq!((report.started, report.failed, report.skipped), (0, 0, 0));
    }
}
