//! Durable record of a unit of work that failed in a retryable way

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::DomainError;
use crate::domain::source::Source;

/// Pipeline level a failed unit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Season,
    Group,
    Tournament,
    SubTournament,
    Team,
    Player,
}

impl JobKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Season => "season",
            Self::Group => "group",
            Self::Tournament => "tournament",
            Self::SubTournament => "sub_tournament",
            Self::Team => "team",
            Self::Player => "player",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "season" => Ok(Self::Season),
            "group" => Ok(Self::Group),
            "tournament" => Ok(Self::Tournament),
            "sub_tournament" => Ok(Self::SubTournament),
            "team" => Ok(Self::Team),
            "player" => Ok(Self::Player),
            other => Err(DomainError::invalid_format("job_type", format!("unknown job type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    pub id: i64,
    pub job_type: JobKind,
    pub source: Source,
    pub external_id: String,
    pub url: String,
    pub error_message: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: DateTime<Utc>,
    /// Ancestor scope needed to rebuild the crawl unit on replay
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FailedJob {
    /// Inert once the ceiling is reached; kept for operators until cleanup.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// What a stage hands to the retry queue when a unit fails retryably
#[derive(Debug, Clone)]
pub struct NewFailedJob {
    pub job_type: JobKind,
    pub source: Source,
    pub external_id: String,
    pub url: String,
    pub metadata: BTreeMap<String, String>,
}

impl NewFailedJob {
    pub fn new(job_type: JobKind, source: Source, external_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            job_type,
            source,
            external_id: external_id.into(),
            url: url.into(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}
