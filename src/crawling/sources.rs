//! Per-source orchestrators
//!
//! Each source walks its own page hierarchy with bounded stages and turns
//! parser DTOs into keyed entities. The helpers here hold the parts every
//! source shares: roster players, DTO conversion and replay dispatch.

pub mod fhspb;
pub mod junior;
pub mod markup;
pub mod mihf;

use async_trait::async_trait;

use crate::crawling::context::CrawlContext;
use crate::crawling::dto::{MatchDto, PlayerDto, PlayerStatDto, RosterEntryDto, TeamDto};
use crate::crawling::summary::CrawlSummary;
use crate::domain::{
    DomainResult, EntityRef, FailedJob, Match, Mergeable, Player, PlayerStatistic, RosterEntry, Source, Team,
    non_empty,
};

pub use fhspb::{FhspbCrawler, FhspbParser};
pub use junior::{JuniorCrawler, JuniorParser};
pub use mihf::{MihfCrawler, MihfParser};

/// Re-runs one failed unit from its stored job
///
/// Failures of the unit itself come back as `Err` for the caller to settle
/// on the job; failures of its children are queued as usual.
#[async_trait]
pub trait JobReplayer: Send + Sync {
    fn source(&self) -> Source;
    async fn replay(&self, job: &FailedJob) -> DomainResult<CrawlSummary>;
}

pub fn player_from_roster(source: Source, entry: &RosterEntryDto) -> DomainResult<Player> {
    let mut player = Player::new(EntityRef::new(source, entry.player_external_id.as_str())?, entry.full_name.as_str());
    player.birth_date = entry.birth_date;
    player.birth_year = entry.birth_year;
    player.position = non_empty(entry.position.clone());
    player.profile_url = non_empty(entry.url.clone());
    Ok(player)
}

pub fn player_from_profile(source: Source, dto: PlayerDto) -> DomainResult<Player> {
    let mut player = Player::new(EntityRef::new(source, dto.external_id)?, dto.full_name);
    player.birth_date = dto.birth_date;
    player.birth_year = dto.birth_year;
    player.position = non_empty(dto.position);
    player.handedness = non_empty(dto.handedness);
    player.height_cm = dto.height_cm;
    player.weight_kg = dto.weight_kg;
    player.citizenship = non_empty(dto.citizenship);
    player.photo_url = non_empty(dto.photo_url);
    Ok(player)
}

pub fn team_from_dto(key: EntityRef, tournament_id: &str, dto: &TeamDto) -> Team {
    let mut team = Team::new(key, dto.name.as_str());
    team.tournament_id = Some(tournament_id.to_string());
    team.city = non_empty(dto.city.clone());
    team.logo_url = non_empty(dto.logo_url.clone());
    team.url = non_empty(Some(dto.url.clone()));
    team
}

/// `team_key` maps a team's external id onto its rendered key
pub fn match_from_dto<F>(source: Source, tournament_id: &str, dto: MatchDto, team_key: F) -> DomainResult<Match>
where
    F: Fn(&str) -> DomainResult<String>,
{
    let home_team_id = dto.home_team_external_id.as_deref().map(&team_key).transpose()?;
    let away_team_id = dto.away_team_external_id.as_deref().map(&team_key).transpose()?;
    Ok(Match {
        key: EntityRef::new(source, dto.external_id)?,
        tournament_id: tournament_id.to_string(),
        home_team_id,
        away_team_id,
        home_score: dto.home_score,
        away_score: dto.away_score,
        played_at: dto.played_at,
        venue: non_empty(dto.venue),
        url: non_empty(dto.url),
    })
}

pub fn statistic_from_dto(player_id: String, tournament_id: &str, team_id: String, dto: &PlayerStatDto) -> PlayerStatistic {
    PlayerStatistic {
        player_id,
        tournament_id: tournament_id.to_string(),
        team_id,
        games: dto.games,
        goals: dto.goals,
        assists: dto.assists,
        points: dto.points,
        penalty_minutes: dto.penalty_minutes,
        plus_minus: dto.plus_minus,
    }
}

/// Roster row to stored player plus membership
///
/// The profile page, when linked, is merged over the roster row with the
/// non-empty-wins rule. With `filter_birth_years` a player outside the
/// source's configured range is counted as filtered and not written.
pub async fn crawl_roster_player<P>(
    ctx: &CrawlContext,
    team_id: &str,
    entry: &RosterEntryDto,
    filter_birth_years: bool,
    parse_profile: P,
) -> DomainResult<CrawlSummary>
where
    P: Fn(&[u8]) -> DomainResult<PlayerDto>,
{
    let mut player = player_from_roster(ctx.source, entry)?;
    if let Some(url) = entry.url.as_deref().filter(|u| !u.trim().is_empty()) {
        let body = ctx.get(url).await?;
        let mut profile = parse_profile(&body)?;
        // The roster's id is authoritative; profiles sometimes omit it
        profile.external_id = entry.player_external_id.clone();
        player.merge_from(player_from_profile(ctx.source, profile)?);
    }

    if filter_birth_years && !ctx.config.accepts_birth_year(player.effective_birth_year()) {
        return Ok(CrawlSummary {
            filtered: 1,
            ..CrawlSummary::default()
        });
    }

    let player_id = ctx.repos.players.upsert(&player).await?;
    ctx.repos
        .teams
        .upsert_roster_entry(&RosterEntry {
            player_id,
            team_id: team_id.to_string(),
            jersey_number: entry.jersey_number,
            position: non_empty(entry.position.clone()),
        })
        .await?;

    Ok(CrawlSummary {
        players: 1,
        roster_entries: 1,
        ..CrawlSummary::default()
    })
}
