//! Durable retry queue
//!
//! Complements the fetch client's in-memory retries for failures that must
//! survive the process. Rows live in `failed_jobs`:
//! created on a retryable failure, rescheduled on each failed replay,
//! deleted on success, and left inert (dead letter) once `retry_count`
//! reaches `max_retries`. Dead letters are only removed by the explicit
//! [`RetryManager::cleanup_old_jobs`] sweep.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::{DomainError, DomainResult, FailedJob, NewFailedJob, Source};
use crate::infrastructure::backoff::{BackoffStrategy, LinearBackoff};
use crate::infrastructure::config::RetryConfig;

/// Queue totals for operator reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryQueueStats {
    pub total: i64,
    /// Still below the retry ceiling
    pub pending: i64,
    /// Pending and due now
    pub due: i64,
    pub dead_letters: i64,
}

#[derive(Clone)]
pub struct RetryManager {
    pool: SqlitePool,
    max_retries: u32,
    backoff: Arc<dyn BackoffStrategy>,
}

impl RetryManager {
    #[must_use]
    pub fn new(pool: SqlitePool, config: &RetryConfig) -> Self {
        Self {
            pool,
            max_retries: config.max_retries,
            backoff: Arc::new(LinearBackoff::new(Duration::from_secs(config.base_delay_secs))),
        }
    }

    /// Replaces the default linear curve
    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn schedule(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.backoff.delay(retry_count)).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Inserts a fresh row with `retry_count = 0`, due after the base delay
    pub async fn add_failed_job(&self, job: NewFailedJob, error: &DomainError) -> DomainResult<i64> {
        let now = Utc::now();
        let next_retry_at = self.schedule(0, now);
        let metadata = serde_json::to_string(&job.metadata)
            .map_err(|e| DomainError::invalid_format("metadata", e.to_string()))?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO failed_jobs (
                job_type, source, external_id, url, error_message, retry_count,
                max_retries, next_retry_at, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8, $9, $9)
            RETURNING id
            "#,
        )
        .bind(job.job_type.as_str())
        .bind(job.source.as_str())
        .bind(&job.external_id)
        .bind(&job.url)
        .bind(error.to_string())
        .bind(i64::from(self.max_retries))
        .bind(next_retry_at.timestamp_millis())
        .bind(metadata)
        .bind(now.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        info!(
            "🔄 Queued failed {} {} ({}) for retry at {} [job {}]",
            job.job_type, job.external_id, job.source, next_retry_at, id
        );
        Ok(id)
    }

    /// Due jobs below the ceiling, oldest-due first, at most `limit`
    pub async fn get_jobs_for_retry(&self, source: Option<Source>, limit: u32) -> DomainResult<Vec<FailedJob>> {
        self.get_jobs_due_at(source, limit, Utc::now()).await
    }

    /// [`Self::get_jobs_for_retry`] against an explicit clock
    pub async fn get_jobs_due_at(
        &self,
        source: Option<Source>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<FailedJob>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM failed_jobs
            WHERE next_retry_at <= $1
              AND retry_count < max_retries
              AND ($2 IS NULL OR source = $2)
            ORDER BY next_retry_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(source.map(Source::as_str))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows.iter().map(row_to_job).collect::<DomainResult<Vec<_>>>()?;
        if !jobs.is_empty() {
            info!("📤 Retrieved {} jobs ready for retry", jobs.len());
        }
        Ok(jobs)
    }

    /// Success deletes the row. Failure bumps `retry_count`, reschedules from
    /// the new count and keeps only the latest error message.
    pub async fn mark_job_retried(&self, job_id: i64, success: bool, error: Option<&DomainError>) -> DomainResult<()> {
        if success {
            sqlx::query("DELETE FROM failed_jobs WHERE id = $1")
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            info!("✅ Retry succeeded, removed job {}", job_id);
            return Ok(());
        }

        // The increment and its read happen in one statement so concurrent
        // settles of the same job never lose a count.
        let now = Utc::now();
        let bumped: Option<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE failed_jobs
            SET retry_count = retry_count + 1,
                error_message = COALESCE($1, error_message),
                updated_at = $2
            WHERE id = $3
            RETURNING retry_count, max_retries
            "#,
        )
        .bind(error.map(ToString::to_string))
        .bind(now.timestamp_millis())
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some((retry_count, max_retries)) = bumped else {
            return Err(DomainError::not_found("failed_job", &job_id.to_string()));
        };

        let new_count = retry_count as u32;
        let next_retry_at = self.schedule(new_count, now);

        // A later settle owns the schedule once it has bumped the count again
        sqlx::query("UPDATE failed_jobs SET next_retry_at = $1 WHERE id = $2 AND retry_count = $3")
            .bind(next_retry_at.timestamp_millis())
            .bind(job_id)
            .bind(retry_count)
            .execute(&self.pool)
            .await?;

        if retry_count >= max_retries {
            warn!("❌ Job {} exhausted {} retries, kept as dead letter", job_id, max_retries);
        } else {
            debug!("Job {} retry {} failed, next attempt at {}", job_id, new_count, next_retry_at);
        }
        Ok(())
    }

    /// Dead-letter sweep: rows created before the horizon or past their ceiling
    pub async fn cleanup_old_jobs(&self, older_than: Duration) -> DomainResult<u64> {
        let horizon = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(horizon)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let result = sqlx::query("DELETE FROM failed_jobs WHERE created_at < $1 OR retry_count >= max_retries")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        info!("🧹 Removed {} failed jobs (cutoff {})", removed, cutoff);
        Ok(removed)
    }

    /// Exhausted jobs, most recently failed first
    pub async fn list_dead_letters(&self, source: Option<Source>, limit: u32) -> DomainResult<Vec<FailedJob>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM failed_jobs
            WHERE retry_count >= max_retries
              AND ($1 IS NULL OR source = $1)
            ORDER BY updated_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(source.map(Source::as_str))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    pub async fn get(&self, job_id: i64) -> DomainResult<Option<FailedJob>> {
        let row = sqlx::query("SELECT * FROM failed_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    pub async fn stats(&self) -> DomainResult<RetryQueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN retry_count < max_retries THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN retry_count < max_retries AND next_retry_at <= $1 THEN 1 ELSE 0 END), 0) AS due,
                COALESCE(SUM(CASE WHEN retry_count >= max_retries THEN 1 ELSE 0 END), 0) AS dead_letters
            FROM failed_jobs
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(RetryQueueStats {
            total: row.try_get("total")?,
            pending: row.try_get("pending")?,
            due: row.try_get("due")?,
            dead_letters: row.try_get("dead_letters")?,
        })
    }
}

fn millis_to_utc(field: &str, millis: i64) -> DomainResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| DomainError::invalid_format(field, format!("timestamp {millis} out of range")))
}

fn row_to_job(row: &SqliteRow) -> DomainResult<FailedJob> {
    let job_type: String = row.try_get("job_type")?;
    let source: String = row.try_get("source")?;
    let metadata: String = row.try_get("metadata")?;
    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&metadata).map_err(|e| DomainError::invalid_format("metadata", e.to_string()))?;

    Ok(FailedJob {
        id: row.try_get("id")?,
        job_type: job_type.parse()?,
        source: source.parse()?,
        external_id: row.try_get("external_id")?,
        url: row.try_get("url")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        next_retry_at: millis_to_utc("next_retry_at", row.try_get("next_retry_at")?)?,
        metadata,
        created_at: millis_to_utc("created_at", row.try_get("created_at")?)?,
        updated_at: millis_to_utc("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobKind;
    use crate::infrastructure::database_connection::DatabaseConnection;

    async fn manager(max_retries: u32) -> RetryManager {
        let db = DatabaseConnection::in_memory().await.unwrap();
        let config = RetryConfig {
            max_retries,
            base_delay_secs: 60,
            ..RetryConfig::default()
        };
        RetryManager::new(db.pool().clone(), &config)
    }

    fn far_future() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::days(365)
    }

    fn team_job(id: &str) -> NewFailedJob {
        NewFailedJob::new(JobKind::Team, Source::Fhspb, id, format!("/Team.aspx?id={id}"))
            .with_meta("tournament_id", "spb:2024:5")
    }

    #[tokio::test]
    async fn new_job_waits_for_base_delay() {
        let rm = manager(3).await;
        let err = DomainError::http_status("/Team.aspx?id=3", 500);
        let id = rm.add_failed_job(team_job("3"), &err).await.unwrap();

        assert!(rm.get_jobs_for_retry(None, 10).await.unwrap().is_empty());

        let due = rm.get_jobs_due_at(None, 10, far_future()).await.unwrap();
        assert_eq!(due.len(), 1);
        let job = &due[0];
        assert_eq!(job.id, id);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.job_type, JobKind::Team);
        assert_eq!(job.meta("tournament_id"), Some("spb:2024:5"));
        let delay = job.next_retry_at - job.created_at;
        assert_eq!(delay.num_seconds(), 60);
    }

    #[tokio::test]
    async fn failed_retries_converge_to_dead_letter() {
        let rm = manager(3).await;
        let err = DomainError::http_status("/x", 503);
        let id = rm.add_failed_job(team_job("7"), &err).await.unwrap();

        for attempt in 1..=3 {
            let due = rm.get_jobs_due_at(None, 10, far_future()).await.unwrap();
            assert_eq!(due.len(), 1, "attempt {attempt}");
            let retry_err = DomainError::http_status("/x", 502);
            rm.mark_job_retried(id, false, Some(&retry_err)).await.unwrap();
        }

        assert!(rm.get_jobs_due_at(None, 10, far_future()).await.unwrap().is_empty());
        let job = rm.get(id).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 3);
        assert!(job.is_exhausted());
        assert!(job.error_message.contains("502"));

        let dead = rm.list_dead_letters(Some(Source::Fhspb), 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(rm.stats().await.unwrap().dead_letters, 1);
    }

    #[tokio::test]
    async fn reschedule_uses_new_retry_count() {
        let rm = manager(5).await;
        let id = rm.add_failed_job(team_job("1"), &DomainError::business("x")).await.unwrap();
        rm.mark_job_retried(id, false, None).await.unwrap();

        let job = rm.get(id).await.unwrap().unwrap();
        let delay = job.next_retry_at - job.updated_at;
        // linear: base * (retry_count + 1) with retry_count = 1
        assert_eq!(delay.num_seconds(), 120);
        assert!(job.error_message.contains("x"));
    }

    #[tokio::test]
    async fn success_deletes_and_cleanup_sweeps_dead_letters() {
        let rm = manager(1).await;
        let err = DomainError::http_status("/x", 500);
        let ok = rm.add_failed_job(team_job("1"), &err).await.unwrap();
        let dead = rm.add_failed_job(team_job("2"), &err).await.unwrap();
        let fresh = rm.add_failed_job(team_job("3"), &err).await.unwrap();

        rm.mark_job_retried(ok, true, None).await.unwrap();
        rm.mark_job_retried(dead, false, Some(&err)).await.unwrap();
        assert!(rm.get(ok).await.unwrap().is_none());

        let removed = rm.cleanup_old_jobs(Duration::from_secs(86_400)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(rm.get(fresh).await.unwrap().is_some());
        assert!(rm.get(dead).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn due_jobs_are_ordered_and_limited() {
        let rm = manager(3).await;
        let err = DomainError::http_status("/x", 500);
        for id in ["1", "2", "3", "4"] {
            rm.add_failed_job(team_job(id), &err).await.unwrap();
        }
        let mihf = NewFailedJob::new(JobKind::Player, Source::Mihf, "9", "/Player/9");
        rm.add_failed_job(mihf, &err).await.unwrap();

        let batch = rm.get_jobs_due_at(Some(Source::Fhspb), 3, far_future()).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.windows(2).all(|w| w[0].next_retry_at <= w[1].next_retry_at));
        assert!(batch.iter().all(|j| j.source == Source::Fhspb));
    }

    #[tokio::test]
    async fn concurrent_failed_settles_each_count() {
        let rm = manager(5).await;
        let id = rm.add_failed_job(team_job("8"), &DomainError::business("x")).await.unwrap();
        let err = DomainError::http_status("/x", 503);

        let other = rm.clone();
        let (a, b) = tokio::join!(
            rm.mark_job_retried(id, false, Some(&err)),
            other.mark_job_retried(id, false, Some(&err)),
        );
        a.unwrap();
        b.unwrap();

        let job = rm.get(id).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 2);
        let delay = job.next_retry_at - job.updated_at;
        assert_eq!(delay.num_seconds(), 180);
    }

    #[tokio::test]
    async fn marking_unknown_job_is_not_found() {
        let rm = manager(3).await;
        let err = rm.mark_job_retried(404, false, None).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
