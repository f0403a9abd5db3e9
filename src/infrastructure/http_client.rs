//! HTTP client for crawling one source host
//!
//! One [`FetchClient`] instance is one logical connection to one host. All
//! requests through an instance are serialized: the client mutex is held
//! for the whole request, so the configured delay separates the end of one
//! request from the start of the next. This is a hard spacing rule, not a
//! token bucket.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::domain::{DomainError, DomainResult};
use crate::infrastructure::backoff::{self, BackoffStrategy};
use crate::infrastructure::config::SourceConfig;

/// Error-chain fragments of connection-level failures that clear on their own
///
/// hyper reports a mid-exchange hangup as an incomplete message, not an EOF.
const TRANSIENT_MARKERS: &[&str] = &[
    "eof",
    "connection reset",
    "connection closed before message completed",
    "incomplete message",
    "broken pipe",
    "timeout",
    "timed out",
];

/// Page source used by the orchestrators
///
/// `path` may be absolute or relative to the source's base URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, path: &str) -> DomainResult<Vec<u8>>;

    /// Replays an ASP.NET postback. The form pairs are passed through untouched.
    async fn post_form(&self, path: &str, form: &[(String, String)]) -> DomainResult<Vec<u8>>;
}

enum Failure {
    Transport(reqwest::Error),
    Status { status: StatusCode, retry_after: Option<u64> },
}

pub struct FetchClient {
    client: Client,
    base_url: Url,
    delay: Duration,
    timeout: Duration,
    max_attempts: u32,
    backoff: Box<dyn BackoffStrategy>,
    /// End of the previous request; the lock doubles as the request serializer
    last_request: Mutex<Option<Instant>>,
    cancel: CancellationToken,
}

impl FetchClient {
    pub fn new(config: &SourceConfig, cancel: CancellationToken) -> DomainResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| DomainError::validation("user_agent", e.to_string()))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ru-RU,ru;q=0.9,en-US;q=0.7,en;q=0.6"));

        // ASP.NET postbacks are bound to the session cookie of the first GET
        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| DomainError::infrastructure("failed to build HTTP client").with_cause(e))?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| DomainError::validation("base_url", format!("{}: {e}", config.base_url)))?;

        Ok(Self {
            client,
            base_url,
            delay: config.request_delay(),
            timeout: config.request_timeout(),
            max_attempts: config.max_attempts.max(1),
            backoff: backoff::for_kind(config.backoff, Duration::from_millis(config.backoff_base_ms)),
            last_request: Mutex::new(None),
            cancel,
        })
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Box<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn resolve(&self, path: &str) -> DomainResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| DomainError::invalid_format("url", format!("{path}: {e}")))
    }

    async fn execute(&self, method: Method, path: &str, form: Option<&[(String, String)]>) -> DomainResult<Vec<u8>> {
        let url = self.resolve(path)?;
        let mut last_request = self.last_request.lock().await;
        let mut attempt: u32 = 0;

        loop {
            if let Some(finished) = *last_request {
                let elapsed = finished.elapsed();
                if elapsed < self.delay {
                    self.pause(self.delay - elapsed, url.as_str()).await?;
                }
            }
            if self.cancel.is_cancelled() {
                return Err(DomainError::cancelled("fetch").with_context("url", url.as_str()));
            }

            debug!("{} {} (attempt {}/{})", method, url, attempt + 1, self.max_attempts);
            let outcome = self.send_once(method.clone(), url.clone(), form).await;
            *last_request = Some(Instant::now());

            match outcome {
                Ok(body) => return Ok(body),
                Err(Failure::Status { status, retry_after }) => {
                    warn!("{} {} returned {}", method, url, status);
                    let err = if status == StatusCode::TOO_MANY_REQUESTS {
                        DomainError::rate_limited(url.as_str(), retry_after)
                            .with_context("status_code", status.as_u16().to_string())
                    } else {
                        DomainError::http_status(url.as_str(), status.as_u16())
                    };
                    return Err(err);
                }
                Err(Failure::Transport(e)) => {
                    let transient = is_transient(&e);
                    if transient && attempt + 1 < self.max_attempts {
                        let wait = self.backoff.delay(attempt);
                        warn!(
                            "Transient failure for {} (attempt {}/{}), retrying in {:?}: {}",
                            url,
                            attempt + 1,
                            self.max_attempts,
                            wait,
                            e
                        );
                        self.pause(wait, url.as_str()).await?;
                        attempt += 1;
                        continue;
                    }
                    let err = if e.is_timeout() {
                        DomainError::timeout("fetch", self.timeout)
                            .with_context("url", url.as_str())
                            .with_cause(e)
                    } else {
                        DomainError::network(url.as_str(), e)
                    };
                    return Err(err.with_context("attempts", (attempt + 1).to_string()));
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        form: Option<&[(String, String)]>,
    ) -> Result<Vec<u8>, Failure> {
        let mut request = self.client.request(method, url);
        if let Some(form) = form {
            request = request.form(form);
        }

        let response = request.send().await.map_err(Failure::Transport)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(Failure::Status { status, retry_after });
        }

        let body = response.bytes().await.map_err(Failure::Transport)?;
        Ok(body.to_vec())
    }

    /// Sleep that gives up as soon as the run is cancelled
    async fn pause(&self, wait: Duration, url: &str) -> DomainResult<()> {
        tokio::select! {
            () = tokio::time::sleep(wait) => Ok(()),
            () = self.cancel.cancelled() => Err(DomainError::cancelled("fetch").with_context("url", url)),
        }
    }
}

#[async_trait]
impl PageFetcher for FetchClient {
    async fn get(&self, path: &str) -> DomainResult<Vec<u8>> {
        self.execute(Method::GET, path, None).await
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> DomainResult<Vec<u8>> {
        self.execute(Method::POST, path, Some(form)).await
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if is_transient_message(&e.to_string()) {
            return true;
        }
        current = e.source();
    }
    false
}

fn is_transient_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Source;

    #[test]
    fn transient_markers_match_connection_failures() {
        assert!(is_transient_message("unexpected EOF during handshake"));
        assert!(is_transient_message("Connection reset by peer (os error 104)"));
        assert!(is_transient_message("operation timed out"));
        assert!(is_transient_message("connection closed before message completed"));
        assert!(is_transient_message("Broken pipe (os error 32)"));
        assert!(!is_transient_message("dns error: failed to lookup address"));
        assert!(!is_transient_message("invalid certificate"));
    }

    #[test]
    fn resolves_relative_paths_against_base() {
        let config = SourceConfig::for_source(Source::Mihf);
        let client = FetchClient::new(&config, CancellationToken::new()).unwrap();
        assert_eq!(
            client.resolve("/Tournament/Teams?id=12").unwrap().as_str(),
            "https://stats.mihf.ru/Tournament/Teams?id=12"
        );
        assert_eq!(
            client.resolve("https://other.host/x").unwrap().as_str(),
            "https://other.host/x"
        );
    }

    #[test]
    fn rejects_bad_base_url() {
        let mut config = SourceConfig::for_source(Source::Fhspb);
        config.base_url = "not a url".into();
        assert!(FetchClient::new(&config, CancellationToken::new()).is_err());
    }
}
