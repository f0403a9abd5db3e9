//! Repository interfaces for crawled hockey data
//!
//! The crawl engine depends only on these signatures. Every `upsert` is an
//! independently atomic, idempotent write keyed by the entity's rendered
//! [`EntityRef`](crate::domain::entity_ref::EntityRef), and returns that key.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::entities::{Match, Player, PlayerStatistic, RosterEntry, Team, Tournament};
use crate::domain::errors::DomainResult;
use crate::domain::source::Source;

#[async_trait]
pub trait PlayerRepository: Send + Sync {
    async fn upsert(&self, player: &Player) -> DomainResult<String>;
    async fn get_by_external_id(&self, source: Source, external_id: &str) -> DomainResult<Option<Player>>;
    async fn exists(&self, source: Source, external_id: &str) -> DomainResult<bool>;
    async fn count(&self) -> DomainResult<i64>;
}

#[async_trait]
pub trait TeamRepository: Send + Sync {
    async fn upsert(&self, team: &Team) -> DomainResult<String>;
    /// `scope` is the parent tournament key for sources with scoped team ids.
    async fn get_by_external_id(
        &self,
        source: Source,
        external_id: &str,
        scope: &[String],
    ) -> DomainResult<Option<Team>>;
    async fn exists(&self, source: Source, external_id: &str, scope: &[String]) -> DomainResult<bool>;
    async fn upsert_roster_entry(&self, entry: &RosterEntry) -> DomainResult<()>;
    async fn count(&self) -> DomainResult<i64>;
}

#[async_trait]
pub trait TournamentRepository: Send + Sync {
    async fn upsert(&self, tournament: &Tournament) -> DomainResult<String>;
    async fn get_by_external_id(
        &self,
        source: Source,
        external_id: &str,
        scope: &[String],
    ) -> DomainResult<Option<Tournament>>;
    async fn exists(&self, source: Source, external_id: &str, scope: &[String]) -> DomainResult<bool>;
    async fn count(&self) -> DomainResult<i64>;
}

#[async_trait]
pub trait MatchRepository: Send + Sync {
    async fn upsert(&self, game: &Match) -> DomainResult<String>;
    async fn count(&self) -> DomainResult<i64>;
}

#[async_trait]
pub trait StatisticsRepository: Send + Sync {
    async fn upsert(&self, stat: &PlayerStatistic) -> DomainResult<()>;
    async fn count(&self) -> DomainResult<i64>;
}

/// The store as seen by the crawlers
#[derive(Clone)]
pub struct Repositories {
    pub players: Arc<dyn PlayerRepository>,
    pub teams: Arc<dyn TeamRepository>,
    pub tournaments: Arc<dyn TournamentRepository>,
    pub matches: Arc<dyn MatchRepository>,
    pub statistics: Arc<dyn StatisticsRepository>,
}
