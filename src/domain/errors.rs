//! Error classification for the crawl engine
//!
//! Every failure that crosses a stage boundary is a [`DomainError`]. The
//! `retryable` flag is fixed when the error is built and depends only on
//! [`ErrorType`], so workers and the retry queue branch on it directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub type DomainResult<T> = Result<T, DomainError>;

type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Broad failure family. Retryability is a property of the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ParsingTemporary,
    ParsingPermanent,
    Network,
    External,
    /// Connection, pool, I/O and timeout failures of our own plumbing
    Infrastructure,
    /// Constraint violations, decode errors, missing rows
    Database,
    Business,
    Validation,
}

impl ErrorType {
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        match self {
            Self::ParsingTemporary | Self::Network | Self::External | Self::Infrastructure => true,
            Self::ParsingPermanent | Self::Database | Self::Business | Self::Validation => false,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParsingTemporary => "parsing_temporary",
            Self::ParsingPermanent => "parsing_permanent",
            Self::Network => "network",
            Self::External => "external",
            Self::Infrastructure => "infrastructure",
            Self::Database => "database",
            Self::Business => "business",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained failure code, informational only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TransientNetwork,
    TransientServer,
    RateLimited,
    Timeout,
    Cancelled,
    NotFound,
    InvalidFormat,
    ParseIncomplete,
    AccessDenied,
    UnexpectedStatus,
    BusinessRule,
    Validation,
    DatabaseConnection,
    DatabaseConstraint,
    DatabaseDecode,
    /// Process-local setup or wiring failure
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransientNetwork => "TRANSIENT_NETWORK",
            Self::TransientServer => "TRANSIENT_SERVER",
            Self::RateLimited => "RATE_LIMITED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::ParseIncomplete => "PARSE_INCOMPLETE",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::UnexpectedStatus => "UNEXPECTED_STATUS",
            Self::BusinessRule => "BUSINESS_RULE",
            Self::Validation => "VALIDATION",
            Self::DatabaseConnection => "DATABASE_CONNECTION",
            Self::DatabaseConstraint => "DATABASE_CONSTRAINT",
            Self::DatabaseDecode => "DATABASE_DECODE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct DomainError {
    error_type: ErrorType,
    code: ErrorCode,
    message: String,
    retryable: bool,
    context: BTreeMap<String, String>,
    cause: Option<Cause>,
    trace_id: Option<String>,
    timestamp: DateTime<Utc>,
}

impl DomainError {
    pub fn new(error_type: ErrorType, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_type,
            code,
            message: message.into(),
            retryable: error_type.is_retryable(),
            context: BTreeMap::new(),
            cause: None,
            trace_id: None,
            timestamp: Utc::now(),
        }
    }

    // ------------------------------------------------------------------
    // Construction helpers
    // ------------------------------------------------------------------

    pub fn network(url: &str, cause: impl StdError + Send + Sync + 'static) -> Self {
        Self::new(ErrorType::Network, ErrorCode::TransientNetwork, format!("request to {url} failed"))
            .with_context("url", url)
            .with_cause(cause)
    }

    pub fn timeout(operation: &str, after: Duration) -> Self {
        Self::new(
            ErrorType::Network,
            ErrorCode::Timeout,
            format!("{operation} timed out after {}ms", after.as_millis()),
        )
        .with_context("operation", operation)
    }

    /// Maps a non-2xx HTTP status onto the taxonomy.
    pub fn http_status(url: &str, status: u16) -> Self {
        let err = match status {
            404 | 410 => Self::not_found("page", url),
            401 | 403 => Self::access_denied(url, status),
            429 => Self::rate_limited(url, None),
            500..=599 => Self::new(
                ErrorType::External,
                ErrorCode::TransientServer,
                format!("server error {status} for {url}"),
            )
            .with_context("url", url),
            _ => Self::new(
                ErrorType::External,
                ErrorCode::UnexpectedStatus,
                format!("unexpected status {status} for {url}"),
            )
            .with_context("url", url),
        };
        err.with_context("status_code", status.to_string())
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        Self::new(ErrorType::Business, ErrorCode::NotFound, format!("{resource} '{id}' not found"))
            .with_context("resource", resource)
            .with_context("id", id)
    }

    pub fn invalid_format(field: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(
            ErrorType::ParsingPermanent,
            ErrorCode::InvalidFormat,
            format!("invalid format of '{field}': {detail}"),
        )
        .with_context("field", field)
    }

    /// Page looked truncated or half-rendered; a later fetch may succeed.
    pub fn parsing_temporary(what: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorType::ParsingTemporary,
            ErrorCode::ParseIncomplete,
            format!("incomplete {what}: {}", detail.into()),
        )
        .with_context("resource", what)
    }

    pub fn rate_limited(url: &str, retry_after_secs: Option<u64>) -> Self {
        let mut err = Self::new(ErrorType::External, ErrorCode::RateLimited, format!("rate limited by {url}"))
            .with_context("url", url);
        if let Some(secs) = retry_after_secs {
            err = err.with_context("retry_after_secs", secs.to_string());
        }
        err
    }

    pub fn access_denied(url: &str, status: u16) -> Self {
        Self::new(
            ErrorType::Business,
            ErrorCode::AccessDenied,
            format!("access denied ({status}) for {url}"),
        )
        .with_context("url", url)
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Business, ErrorCode::BusinessRule, message)
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorType::Validation, ErrorCode::Validation, message).with_context("field", field)
    }

    pub fn cancelled(operation: &str) -> Self {
        Self::new(
            ErrorType::Infrastructure,
            ErrorCode::Cancelled,
            format!("{operation} cancelled"),
        )
        .with_context("operation", operation)
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Infrastructure, ErrorCode::Internal, message)
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[must_use]
    pub const fn error_type(&self) -> ErrorType {
        self.error_type
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retryable
    }

    #[must_use]
    pub const fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Innermost error in the `source()` chain, or `self` if there is no cause.
    #[must_use]
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }
}

impl fmt::Debug for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainError")
            .field("type", &self.error_type)
            .field("code", &self.code)
            .field("message", &self.message)
            .field("retryable", &self.retryable)
            .field("context", &self.context)
            .field("cause", &self.cause.as_ref().map(ToString::to_string))
            .field("trace_id", &self.trace_id)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.error_type, self.code, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl StdError for DomainError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn StdError + 'static))
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        let (error_type, code) = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Protocol(_) => (ErrorType::Infrastructure, ErrorCode::DatabaseConnection),
            sqlx::Error::Database(db) if is_busy(&**db) => {
                (ErrorType::Infrastructure, ErrorCode::DatabaseConnection)
            }
            sqlx::Error::Database(_) => (ErrorType::Database, ErrorCode::DatabaseConstraint),
            _ => (ErrorType::Database, ErrorCode::DatabaseDecode),
        };
        Self::new(error_type, code, "database operation failed").with_cause(err)
    }
}

/// SQLite reports lock contention as a database error; it clears on its own.
fn is_busy(err: &dyn sqlx::error::DatabaseError) -> bool {
    let message = err.message().to_ascii_lowercase();
    message.contains("database is locked") || message.contains("busy")
}
