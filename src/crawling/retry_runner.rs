//! Consumer side of the durable retry queue
//!
//! Pulls due jobs in batches, replays each through the orchestrator of its
//! source on an [`AdaptivePool`], and settles the row: success deletes it,
//! failure reschedules it. A job is attempted at most once per run, so a
//! zero base delay cannot spin the loop.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crawling::sources::JobReplayer;
use crate::crawling::summary::CrawlSummary;
use crate::crawling::worker_pool::{AdaptivePool, PoolTask};
use crate::domain::{DomainError, DomainResult, ErrorCode, Source};
use crate::infrastructure::config::PoolConfig;
use crate::infrastructure::retry_manager::RetryManager;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryRunReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed replays that reached the retry ceiling
    pub exhausted: usize,
    /// Jobs whose source has no registered replayer
    pub unroutable: usize,
    /// Interrupted by cancellation and left untouched
    pub interrupted: usize,
    pub summary: CrawlSummary,
}

pub struct RetryRunner {
    manager: RetryManager,
    replayers: HashMap<Source, Arc<dyn JobReplayer>>,
    pool: PoolConfig,
    batch_limit: u32,
}

impl RetryRunner {
    #[must_use]
    pub fn new(manager: RetryManager, pool: PoolConfig, batch_limit: u32) -> Self {
        Self {
            manager,
            replayers: HashMap::new(),
            pool,
            batch_limit: batch_limit.max(1),
        }
    }

    #[must_use]
    pub fn register(mut self, replayer: Arc<dyn JobReplayer>) -> Self {
        self.replayers.insert(replayer.source(), replayer);
        self
    }

    /// Drains every job due now, optionally for one source only
    pub async fn run(&self, source: Option<Source>, cancel: &CancellationToken) -> DomainResult<RetryRunReport> {
        let mut report = RetryRunReport::default();
        let mut seen = HashSet::new();
        // Jobs rescheduled during this run fall after the start and are left for the next one
        let started = Utc::now();

        while !cancel.is_cancelled() {
            // Seen rows that are still due (unroutable ones) must not crowd out fresh ones
            let limit = self.batch_limit.saturating_add(u32::try_from(seen.len()).unwrap_or(u32::MAX));
            let batch: Vec<_> = self
                .manager
                .get_jobs_due_at(source, limit, started)
                .await?
                .into_iter()
                .filter(|job| seen.insert(job.id))
                .take(self.batch_limit as usize)
                .collect();
            if batch.is_empty() {
                break;
            }
            debug!("Replaying batch of {} jobs", batch.len());

            let pool = AdaptivePool::new(self.pool.clone());
            let mut results = pool
                .take_results()
                .ok_or_else(|| DomainError::infrastructure("retry pool results already taken"))?;

            // job id -> (retry_count, max_retries) before this attempt
            let mut attempts = HashMap::new();
            for job in batch {
                let Some(replayer) = self.replayers.get(&job.source).cloned() else {
                    warn!("No replayer for {} job {}", job.source, job.id);
                    report.unroutable += 1;
                    continue;
                };
                attempts.insert(job.id, (job.retry_count, job.max_retries));
                let task = PoolTask::new(job.id.to_string(), async move { replayer.replay(&job).await });
                if !pool.submit(task).await {
                    break;
                }
            }
            pool.close().await;

            while let Some(done) = results.recv().await {
                let Ok(job_id) = done.task_id.parse::<i64>() else {
                    continue;
                };
                report.attempted += 1;
                match done.result {
                    Ok(summary) => {
                        self.manager.mark_job_retried(job_id, true, None).await?;
                        report.succeeded += 1;
                        report.summary += summary;
                    }
                    Err(e) if e.code() == ErrorCode::Cancelled => {
                        debug!("Job {} interrupted, left for the next run", job_id);
                        report.interrupted += 1;
                    }
                    Err(e) => {
                        warn!("Retry of job {} failed: {}", job_id, e);
                        self.manager.mark_job_retried(job_id, false, Some(&e)).await?;
                        report.failed += 1;
                        if let Some((retry_count, max_retries)) = attempts.get(&job_id)
                            && retry_count + 1 >= *max_retries
                        {
                            report.exhausted += 1;
                        }
                    }
                }
            }
        }

        info!(
            "🔁 Retry run: {} attempted, {} succeeded, {} failed ({} exhausted), {} unroutable",
            report.attempted, report.succeeded, report.failed, report.exhausted, report.unroutable
        );
        Ok(report)
    }
}
