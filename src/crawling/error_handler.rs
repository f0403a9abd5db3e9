//! In-process retry for a single failed operation
//!
//! Separate from the durable queue: this runs inside the current call,
//! retrying with exponential backoff plus ±25% jitter, and gives up
//! promptly when the surrounding run is cancelled.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{DomainError, DomainResult};
use crate::infrastructure::backoff::{BackoffStrategy, ExponentialJitterBackoff};
use crate::infrastructure::config::ErrorHandlerConfig;

#[derive(Debug, Clone)]
pub struct ErrorHandler {
    max_retries: u32,
    backoff: ExponentialJitterBackoff,
}

impl ErrorHandler {
    #[must_use]
    pub fn new(config: &ErrorHandlerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: ExponentialJitterBackoff::new(
                Duration::from_millis(config.base_delay_ms),
                Duration::from_millis(config.max_delay_ms),
            ),
        }
    }

    #[must_use]
    pub const fn should_retry(&self, err: &DomainError) -> bool {
        err.is_retryable() && self.max_retries > 0
    }

    /// Delay before retry number `attempt` (zero-based)
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Recovers from `err` by re-running `operation`
    ///
    /// Non-retryable errors come straight back. Otherwise `operation` is
    /// retried up to `max_retries` times; a non-retryable failure on the way
    /// ends the loop early. The last error is returned if every retry fails.
    pub async fn handle_with_retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        err: DomainError,
        operation_name: &str,
        mut operation: F,
    ) -> DomainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        if !self.should_retry(&err) {
            warn!("{} failed permanently: {}", operation_name, err);
            return Err(err);
        }

        let mut last = err;
        for attempt in 0..self.max_retries {
            let wait = self.retry_delay(attempt);
            warn!(
                "{} failed ({}), retry {}/{} in {:?}",
                operation_name,
                last,
                attempt + 1,
                self.max_retries,
                wait
            );
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = cancel.cancelled() => return Err(DomainError::cancelled(operation_name).with_cause(last)),
            }

            match operation().await {
                Ok(value) => {
                    info!("{} recovered after {} retries", operation_name, attempt + 1);
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => last = e,
            }
        }

        Err(last)
    }
}
