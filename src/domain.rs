//! Domain module - entities, identity, error taxonomy and repository seams
//!
//! Everything in here is source-agnostic; the crawl engine and the
//! persistence layer both depend on it, never the other way around.

pub mod entities;
pub mod entity_ref;
pub mod errors;
pub mod failed_job;
pub mod repositories;
pub mod source;

pub use entities::{Match, Mergeable, Player, PlayerStatistic, RosterEntry, Team, Tournament, non_empty};
pub use entity_ref::EntityRef;
pub use errors::{DomainError, DomainResult, ErrorCode, ErrorType};
pub use failed_job::{FailedJob, JobKind, NewFailedJob};
pub use repositories::Repositories;
pub use source::Source;
