//! Adaptive worker pool
//!
//! General executor for work whose size is not known up front (the retry
//! queue replay). Tasks go through a bounded channel; results come back
//! on an unbounded one so a slow reader never stalls the workers.
//!
//! Every `scale_interval` the pool measures `queued / buffer_size`. Above
//! `scale_threshold` it starts up to two more workers, never exceeding
//! `max_workers`.
//!
//! TODO: scale-down needs a drain protocol (retire a worker only between
//! tasks, never mid-task) before it can be added; until then a pool keeps
//! its peak worker count until `close`.

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{DomainError, DomainResult};
use crate::infrastructure::config::PoolConfig;

const MAX_SCALE_STEP: usize = 2;
pub const MAX_PRIORITY: u8 = 10;

pub type TaskFuture<O> = Pin<Box<dyn Future<Output = DomainResult<O>> + Send + 'static>>;

pub struct PoolTask<O> {
    pub id: String,
    /// 0-10. Carried for a future priority queue; the channel is FIFO today.
    pub priority: u8,
    run: TaskFuture<O>,
}

impl<O> PoolTask<O> {
    pub fn new<F>(id: impl Into<String>, run: F) -> Self
    where
        F: Future<Output = DomainResult<O>> + Send + 'static,
    {
        Self {
            id: id.into(),
            priority: 0,
            run: Box::pin(run),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }
}

#[derive(Debug)]
pub struct TaskResult<O> {
    pub task_id: String,
    pub priority: u8,
    pub result: DomainResult<O>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub dropped: u64,
    pub queued: usize,
    pub active: usize,
    pub workers: usize,
    pub peak_workers: usize,
    pub scale_ups: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    dropped: AtomicU64,
    queued: AtomicUsize,
    active: AtomicUsize,
    workers: AtomicUsize,
    peak_workers: AtomicUsize,
    scale_ups: AtomicU64,
}

struct Shared<O> {
    config: PoolConfig,
    tasks: Mutex<mpsc::Receiver<PoolTask<O>>>,
    /// Template for new workers; taken on close so the result channel can end
    results: StdMutex<Option<mpsc::UnboundedSender<TaskResult<O>>>>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
    counters: Counters,
}

pub struct AdaptivePool<O: Send + 'static> {
    shared: Arc<Shared<O>>,
    sender: StdMutex<Option<mpsc::Sender<PoolTask<O>>>>,
    receiver: StdMutex<Option<mpsc::UnboundedReceiver<TaskResult<O>>>>,
    scaler: StdMutex<Option<JoinHandle<()>>>,
    stop_scaler: CancellationToken,
    cancel: CancellationToken,
}

impl<O: Send + 'static> AdaptivePool<O> {
    /// Starts `worker_count` workers and the scale ticker. Needs a tokio runtime.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let buffer = config.buffer_size.max(1);
        let (task_tx, task_rx) = mpsc::channel(buffer);
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let initial = config.worker_count.clamp(1, config.max_workers.max(1));
        let interval = config.scale_interval();

        let shared = Arc::new(Shared {
            config,
            tasks: Mutex::new(task_rx),
            results: StdMutex::new(Some(result_tx)),
            handles: StdMutex::new(Vec::new()),
            counters: Counters::default(),
        });
        for _ in 0..initial {
            spawn_worker(&shared);
        }

        let stop_scaler = CancellationToken::new();
        let scaler = tokio::spawn(scale_loop(Arc::clone(&shared), stop_scaler.clone(), interval));

        info!("Adaptive pool started with {} workers (max {})", initial, shared.config.max_workers);
        Self {
            shared,
            sender: StdMutex::new(Some(task_tx)),
            receiver: StdMutex::new(Some(result_rx)),
            scaler: StdMutex::new(Some(scaler)),
            stop_scaler,
            cancel: CancellationToken::new(),
        }
    }

    /// Queues a task, waiting for room. Returns `false` and drops the task
    /// once the pool is closed.
    pub async fn submit(&self, task: PoolTask<O>) -> bool {
        let sender = self.sender.lock().ok().and_then(|guard| guard.clone());
        let Some(sender) = sender else {
            self.drop_task(&task.id);
            return false;
        };

        let counters = &self.shared.counters;
        counters.queued.fetch_add(1, Ordering::SeqCst);
        let id = task.id.clone();
        let sent = tokio::select! {
            res = sender.send(task) => res.is_ok(),
            () = self.cancel.cancelled() => false,
        };
        if sent {
            counters.submitted.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.queued.fetch_sub(1, Ordering::SeqCst);
            self.drop_task(&id);
        }
        sent
    }

    fn drop_task(&self, id: &str) {
        self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
        debug!("Dropped task {} submitted to a closed pool", id);
    }

    /// Result stream; `None` after the first call
    pub fn take_results(&self) -> Option<mpsc::UnboundedReceiver<TaskResult<O>>> {
        self.receiver.lock().ok().and_then(|mut guard| guard.take())
    }

    pub fn worker_count(&self) -> usize {
        self.shared.counters.workers.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> PoolMetrics {
        let c = &self.shared.counters;
        PoolMetrics {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            queued: c.queued.load(Ordering::SeqCst),
            active: c.active.load(Ordering::SeqCst),
            workers: c.workers.load(Ordering::SeqCst),
            peak_workers: c.peak_workers.load(Ordering::SeqCst),
            scale_ups: c.scale_ups.load(Ordering::Relaxed),
        }
    }

    /// Stops scaling, closes the task channel, waits for the workers to
    /// drain it, then ends the result stream. Idempotent.
    pub async fn close(&self) {
        self.stop_scaler.cancel();
        let scaler = self.scaler.lock().ok().and_then(|mut guard| guard.take());
        if let Some(scaler) = scaler
            && let Err(e) = scaler.await
        {
            warn!("Pool scaler ended abnormally: {}", e);
        }

        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        // The scaler is gone, so no handle can be added while we drain
        let handles = self
            .shared
            .handles
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Pool worker ended abnormally: {}", e);
            }
        }

        if let Ok(mut results) = self.shared.results.lock() {
            results.take();
        }
        self.cancel.cancel();
        debug!("Adaptive pool closed: {:?}", self.metrics());
    }
}

impl<O: Send + 'static> Drop for AdaptivePool<O> {
    fn drop(&mut self) {
        self.stop_scaler.cancel();
        self.cancel.cancel();
    }
}

fn spawn_worker<O: Send + 'static>(shared: &Arc<Shared<O>>) -> bool {
    let Some(results) = shared.results.lock().ok().and_then(|guard| guard.clone()) else {
        return false;
    };
    let counters = &shared.counters;
    let workers = counters.workers.fetch_add(1, Ordering::SeqCst) + 1;
    counters.peak_workers.fetch_max(workers, Ordering::SeqCst);

    let handle = tokio::spawn(worker_loop(Arc::clone(shared), results, workers));
    match shared.handles.lock() {
        Ok(mut handles) => handles.push(handle),
        Err(_) => handle.abort(),
    }
    true
}

async fn worker_loop<O: Send + 'static>(
    shared: Arc<Shared<O>>,
    results: mpsc::UnboundedSender<TaskResult<O>>,
    worker_id: usize,
) {
    let timeout = shared.config.task_timeout();
    let counters = &shared.counters;

    loop {
        let next = shared.tasks.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.active.fetch_add(1, Ordering::SeqCst);

        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, task.run).await {
            Ok(result) => result,
            Err(_) => {
                counters.timed_out.fetch_add(1, Ordering::Relaxed);
                Err(DomainError::timeout("pool task", timeout).with_context("task_id", task.id.as_str()))
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        counters.active.fetch_sub(1, Ordering::SeqCst);
        if result.is_ok() {
            counters.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }

        // Nobody listening is fine
        let _ = results.send(TaskResult {
            task_id: task.id,
            priority: task.priority,
            result,
            duration_ms,
        });
    }
    debug!("Pool worker {} exiting", worker_id);
}

async fn scale_loop<O: Send + 'static>(shared: Arc<Shared<O>>, stop: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = stop.cancelled() => break,
        }

        let config = &shared.config;
        let counters = &shared.counters;
        let queued = counters.queued.load(Ordering::SeqCst);
        let utilization = queued as f64 / config.buffer_size.max(1) as f64;
        let current = counters.workers.load(Ordering::SeqCst);

        if utilization > config.scale_threshold && current < config.max_workers {
            let add = MAX_SCALE_STEP.min(config.max_workers - current);
            let mut started = 0;
            for _ in 0..add {
                if spawn_worker(&shared) {
                    started += 1;
                }
            }
            if started > 0 {
                counters.scale_ups.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Pool utilization {:.0}%: scaled {} -> {} workers",
                    utilization * 100.0,
                    current,
                    current + started
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;

    fn config(workers: usize, max: usize, buffer: usize) -> PoolConfig {
        PoolConfig {
            worker_count: workers,
            max_workers: max,
            buffer_size: buffer,
            scale_threshold: 0.5,
            scale_interval_ms: 10,
            task_timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn runs_tasks_and_closes_result_stream() {
        let pool = AdaptivePool::new(config(2, 2, 8));
        let mut results = pool.take_results().unwrap();
        assert!(pool.take_results().is_none());

        for i in 0..5u32 {
            let task = PoolTask::new(format!("t{i}"), async move { Ok(i * 2) }).with_priority(42);
            assert!(pool.submit(task).await);
        }
        pool.close().await;

        let mut sum = 0;
        while let Some(r) = results.recv().await {
            assert_eq!(r.priority, MAX_PRIORITY);
            sum += r.result.unwrap();
        }
        assert_eq!(sum, 20);
        assert_eq!(pool.metrics().completed, 5);
    }

    #[tokio::test]
    async fn submit_after_close_is_dropped() {
        let pool: AdaptivePool<()> = AdaptivePool::new(config(1, 1, 1));
        pool.close().await;
        assert!(!pool.submit(PoolTask::new("late", async { Ok(()) })).await);
        assert_eq!(pool.metrics().dropped, 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn over_running_task_times_out() {
        let mut cfg = config(1, 1, 1);
        cfg.task_timeout_seconds = 0;
        let pool = AdaptivePool::new(cfg);
        let mut results = pool.take_results().unwrap();
        pool.submit(PoolTask::new("slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }))
        .await;
        pool.close().await;

        let r = results.recv().await.unwrap();
        assert_eq!(r.result.unwrap_err().code(), ErrorCode::Timeout);
        assert_eq!(pool.metrics().timed_out, 1);
    }
}
