//! Everything a source crawler needs while walking its hierarchy

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::crawling::summary::CrawlSummary;
use crate::domain::{DomainError, DomainResult, ErrorCode, FailedJob, JobKind, NewFailedJob, Repositories, Source};
use crate::infrastructure::config::SourceConfig;
use crate::infrastructure::http_client::PageFetcher;
use crate::infrastructure::retry_manager::RetryManager;

/// Metadata key holding the serialized unit the job was built from
pub const PAYLOAD_KEY: &str = "payload";
/// Metadata key naming the run that first saw the failure
pub const RUN_ID_KEY: &str = "run_id";

#[derive(Clone)]
pub struct CrawlContext {
    pub source: Source,
    pub config: Arc<SourceConfig>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub repos: Repositories,
    pub retry: RetryManager,
    pub cancel: CancellationToken,
    pub run_id: Uuid,
}

impl CrawlContext {
    pub async fn get(&self, path: &str) -> DomainResult<Vec<u8>> {
        if self.cancel.is_cancelled() {
            return Err(DomainError::cancelled(path));
        }
        self.fetcher.get(path).await
    }

    /// Failed-job record for one crawl unit, carrying `payload` for replay
    pub fn unit_job<T: Serialize>(&self, kind: JobKind, external_id: &str, url: &str, payload: &T) -> NewFailedJob {
        let job = NewFailedJob::new(kind, self.source, external_id, url).with_meta(RUN_ID_KEY, self.run_id.to_string());
        match serde_json::to_string(payload) {
            Ok(json) => job.with_meta(PAYLOAD_KEY, json),
            Err(e) => {
                warn!("Could not serialize {} {} for replay: {}", kind, external_id, e);
                job
            }
        }
    }

    /// Queues `job` when `err` is worth another attempt later
    ///
    /// Cancellation is not a failure of the unit and is never queued. A
    /// queue write failure is logged; it must not fail the crawl.
    pub async fn record_failure(&self, job: NewFailedJob, err: &DomainError) {
        if err.code() == ErrorCode::Cancelled {
            debug!("{} {} interrupted by cancellation", job.job_type, job.external_id);
            return;
        }
        let trace_id = err.trace_id().unwrap_or_default();
        if !err.is_retryable() {
            warn!(trace_id, "❌ {} {} failed permanently: {}", job.job_type, job.external_id, err);
            return;
        }
        let (kind, external_id) = (job.job_type, job.external_id.clone());
        if let Err(e) = self.retry.add_failed_job(job, err).await {
            error!(trace_id, "Failed to queue {} {} for retry: {}", kind, external_id, e);
        }
    }

    /// Runs one unit, queueing it for retry when it fails
    ///
    /// The returned error carries this run's id as its trace id unless an
    /// inner unit already set one.
    pub async fn guarded<F>(&self, job: NewFailedJob, unit: F) -> DomainResult<CrawlSummary>
    where
        F: Future<Output = DomainResult<CrawlSummary>>,
    {
        match unit.await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                let e = self.traced(e);
                self.record_failure(job, &e).await;
                Err(e)
            }
        }
    }

    /// Tags `err` with the run id when it has no trace id yet
    #[must_use]
    pub fn traced(&self, err: DomainError) -> DomainError {
        if err.trace_id().is_some() {
            err
        } else {
            err.with_trace_id(self.run_id.to_string())
        }
    }
}

/// Parent id stored in a job's metadata
pub fn job_meta<'a>(job: &'a FailedJob, key: &str) -> DomainResult<&'a str> {
    job.meta(key).ok_or_else(|| {
        DomainError::invalid_format("metadata", format!("job {} has no '{key}'", job.id))
    })
}

/// Unit serialized into a job by [`CrawlContext::unit_job`]
pub fn job_payload<T: serde::de::DeserializeOwned>(job: &FailedJob) -> DomainResult<T> {
    let raw = job_meta(job, PAYLOAD_KEY)?;
    serde_json::from_str(raw)
        .map_err(|e| DomainError::invalid_format("metadata", format!("job {} payload: {e}", job.id)))
}
