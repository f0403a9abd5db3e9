//! External hockey-stats sources
//!
//! Each source is one website with its own HTML structure and its own
//! external ID space. The key prefix is what makes IDs from different
//! sources impossible to confuse once they land in the shared schema.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// fhspb.ru - Saint Petersburg federation stat portal (ASP.NET)
    Fhspb,
    /// stats.mihf.ru - Moscow federation stat portal (ASP.NET)
    Mihf,
    /// junior.fhr.ru - national junior league pages (plain HTML)
    Junior,
}

impl Source {
    pub const ALL: [Self; 3] = [Self::Fhspb, Self::Mihf, Self::Junior];

    /// Prefix used as the first component of every entity key from this source
    #[must_use]
    pub const fn key_prefix(self) -> &'static str {
        match self {
            Self::Fhspb => "spb",
            Self::Mihf => "msk",
            Self::Junior => "fhr",
        }
    }

    /// Name used in configuration, CLI and the `failed_jobs.source` column
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fhspb => "fhspb",
            Self::Mihf => "mihf",
            Self::Junior => "junior",
        }
    }

    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Fhspb => "https://www.fhspb.ru",
            Self::Mihf => "https://stats.mihf.ru",
            Self::Junior => "https://junior.fhr.ru",
        }
    }

    pub fn from_key_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.key_prefix() == prefix)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|src| src.as_str() == normalized || src.key_prefix() == normalized)
            .ok_or_else(|| DomainError::validation("source", format!("unknown source '{s}'")))
    }
}
