//! Adaptive pool under sustained backlog

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use hockey_stats_crawler::crawling::worker_pool::MAX_PRIORITY;
use hockey_stats_crawler::crawling::{AdaptivePool, PoolTask};
use hockey_stats_crawler::domain::DomainError;
use hockey_stats_crawler::infrastructure::config::PoolConfig;

fn backlog_config() -> PoolConfig {
    PoolConfig {
        worker_count: 1,
        max_workers: 4,
        buffer_size: 4,
        scale_threshold: 0.2,
        scale_interval_ms: 10,
        task_timeout_seconds: 30,
    }
}

fn gated(n: usize, gate: &Arc<Semaphore>) -> PoolTask<usize> {
    let gate = Arc::clone(gate);
    PoolTask::new(format!("task-{n}"), async move {
        let _permit = gate.acquire().await.map_err(|_| DomainError::business("gate closed"))?;
        Ok(n)
    })
}

#[tokio::test]
async fn scales_up_under_backlog_but_never_past_max() {
    let pool = Arc::new(AdaptivePool::new(backlog_config()));
    let mut results = pool.take_results().unwrap();
    let gate = Arc::new(Semaphore::new(0));

    let submitter = {
        let pool = Arc::clone(&pool);
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            for n in 0..12 {
                assert!(pool.submit(gated(n, &gate)).await);
            }
        })
    };

    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pool.worker_count() <= 4, "pool grew to {}", pool.worker_count());
    }
    let metrics = pool.metrics();
    assert_eq!(metrics.peak_workers, 4);
    assert!(metrics.scale_ups >= 1);

    gate.add_permits(12);
    submitter.await.unwrap();
    pool.close().await;

    let mut finished = Vec::new();
    while let Some(result) = results.recv().await {
        finished.push(result.result.unwrap());
    }
    finished.sort_unstable();
    assert_eq!(finished, (0..12).collect::<Vec<_>>());
    assert_eq!(pool.metrics().completed, 12);
    assert_eq!(pool.worker_count(), 4);
}

#[tokio::test]
async fn idle_pool_keeps_its_initial_size() {
    let pool: AdaptivePool<()> = AdaptivePool::new(backlog_config());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(pool.worker_count(), 1);
    assert_eq!(pool.metrics().scale_ups, 0);
    pool.close().await;
}

#[tokio::test]
async fn failed_tasks_are_reported_not_fatal() {
    let pool = AdaptivePool::new(PoolConfig {
        worker_count: 2,
        ..backlog_config()
    });
    let mut results = pool.take_results().unwrap();

    assert!(pool.submit(PoolTask::new("bad", async { Err(DomainError::business("nope")) })).await);
    assert!(pool.submit(PoolTask::new("good", async { Ok(7u32) }).with_priority(200)).await);
    pool.close().await;

    let mut seen = Vec::new();
    while let Some(result) = results.recv().await {
        seen.push((result.task_id, result.priority, result.result.is_ok()));
    }
    seen.sort();
    assert_eq!(seen, vec![("bad".to_string(), 0, false), ("good".to_string(), MAX_PRIORITY, true)]);

    let metrics = pool.metrics();
    assert_eq!(metrics.completed, 1);
    assert_eq!(metrics.failed, 1);
}
