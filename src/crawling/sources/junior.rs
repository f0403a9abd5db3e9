//! junior.fhr.ru: seasons → tournaments → teams → players
//!
//! Tournaments and players are filtered by birth year against the source's
//! configured range. Team ids repeat across tournaments, so team keys are
//! scoped by the tournament id (`fhr:<tournament>:<team>`).

pub mod html;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::crawling::bounded_stage::run_bounded_stage;
use crate::crawling::context::{CrawlContext, job_meta, job_payload};
use crate::crawling::dto::{PlayerDto, RosterEntryDto, SeasonDto, TeamDto, TournamentDto};
use crate::crawling::error_handler::ErrorHandler;
use crate::crawling::sources::{JobReplayer, crawl_roster_player, team_from_dto};
use crate::crawling::summary::CrawlSummary;
use crate::domain::{DomainError, DomainResult, EntityRef, FailedJob, JobKind, Source, Tournament, non_empty};

pub const SEASONS_PATH: &str = "/seasons/";

pub trait JuniorParser: Send + Sync {
    fn parse_seasons(&self, html: &[u8]) -> DomainResult<Vec<SeasonDto>>;
    fn parse_tournaments(&self, html: &[u8]) -> DomainResult<Vec<TournamentDto>>;
    fn parse_teams(&self, html: &[u8]) -> DomainResult<Vec<TeamDto>>;
    fn parse_roster(&self, html: &[u8]) -> DomainResult<Vec<RosterEntryDto>>;
    fn parse_player(&self, html: &[u8]) -> DomainResult<PlayerDto>;
}

pub struct JuniorCrawler {
    ctx: CrawlContext,
    parser: Arc<dyn JuniorParser>,
    errors: ErrorHandler,
}

impl JuniorCrawler {
    #[must_use]
    pub fn new(ctx: CrawlContext, parser: Arc<dyn JuniorParser>, errors: ErrorHandler) -> Self {
        Self { ctx, parser, errors }
    }

    pub async fn run(&self) -> DomainResult<CrawlSummary> {
        info!(
            "🏒 Starting junior crawl (birth years {:?}..={:?})",
            self.ctx.config.min_birth_year, self.ctx.config.max_birth_year
        );
        let seasons = self.fetch_seasons().await?;
        info!("Found {} junior seasons", seasons.len());

        let report = run_bounded_stage(
            "junior seasons",
            &self.ctx.cancel,
            seasons,
            self.ctx.config.workers.season,
            |season| self.season_unit(season),
        )
        .await;

        let summary = CrawlSummary::absorb(report);
        summary.log(Source::Junior);
        Ok(summary)
    }

    async fn fetch_seasons(&self) -> DomainResult<Vec<SeasonDto>> {
        let load = || async move {
            let body = self.ctx.get(SEASONS_PATH).await?;
            self.parser.parse_seasons(&body)
        };
        match load().await {
            Ok(seasons) => Ok(seasons),
            Err(e) => {
                self.errors
                    .handle_with_retry(&self.ctx.cancel, e, "junior season list", load)
                    .await
            }
        }
    }

    async fn season_unit(&self, season: SeasonDto) -> DomainResult<CrawlSummary> {
        let job = self
            .ctx
            .unit_job(JobKind::Season, &season.external_id, &season.url, &season);
        self.ctx.guarded(job, self.crawl_season(&season)).await
    }

    async fn crawl_season(&self, season: &SeasonDto) -> DomainResult<CrawlSummary> {
        let body = self.ctx.get(&season.url).await?;
        let (accepted, rejected): (Vec<_>, Vec<_>) = self
            .parser
            .parse_tournaments(&body)?
            .into_iter()
            .partition(|t| self.ctx.config.accepts_birth_year(t.birth_year));
        debug!(
            "Season {}: {} tournaments, {} outside the birth-year range",
            season.name,
            accepted.len(),
            rejected.len()
        );

        let report = run_bounded_stage(
            "junior tournaments",
            &self.ctx.cancel,
            accepted,
            self.ctx.config.workers.tournament,
            |tournament| self.tournament_unit(season, tournament),
        )
        .await;
        let mut summary = CrawlSummary::absorb(report);
        summary.seasons += 1;
        summary.filtered += rejected.len();
        Ok(summary)
    }

    async fn tournament_unit(&self, season: &SeasonDto, tournament: TournamentDto) -> DomainResult<CrawlSummary> {
        let job = self
            .ctx
            .unit_job(JobKind::Tournament, &tournament.external_id, &tournament.url, &tournament)
            .with_meta("season_id", season.external_id.as_str())
            .with_meta("season", season.name.as_str());
        self.ctx
            .guarded(job, self.crawl_tournament(&season.external_id, &season.name, &tournament))
            .await
    }

    async fn crawl_tournament(
        &self,
        season_id: &str,
        season_name: &str,
        dto: &TournamentDto,
    ) -> DomainResult<CrawlSummary> {
        let mut tournament = Tournament::new(
            EntityRef::scoped(Source::Junior, [season_id], dto.external_id.as_str())?,
            dto.name.as_str(),
        );
        tournament.season = non_empty(Some(season_name.to_string()));
        tournament.group_name = non_empty(dto.group_name.clone());
        tournament.birth_year = dto.birth_year;
        tournament.url = Some(dto.url.clone());
        let tournament_id = self.ctx.repos.tournaments.upsert(&tournament).await?;

        let body = self.ctx.get(&dto.url).await?;
        let teams = self.parser.parse_teams(&body)?;

        let report = run_bounded_stage(
            "junior teams",
            &self.ctx.cancel,
            teams,
            self.ctx.config.workers.team,
            |team| self.team_unit(&tournament_id, &dto.external_id, team),
        )
        .await;
        let mut summary = CrawlSummary::absorb(report);
        summary.tournaments += 1;
        Ok(summary)
    }

    async fn team_unit(&self, tournament_id: &str, tournament_ext: &str, team: TeamDto) -> DomainResult<CrawlSummary> {
        let job = self
            .ctx
            .unit_job(JobKind::Team, &team.external_id, &team.url, &team)
            .with_meta("tournament_id", tournament_id)
            .with_meta("tournament_ext", tournament_ext);
        self.ctx
            .guarded(job, self.crawl_team(tournament_id, tournament_ext, &team))
            .await
    }

    async fn crawl_team(&self, tournament_id: &str, tournament_ext: &str, dto: &TeamDto) -> DomainResult<CrawlSummary> {
        let key = EntityRef::scoped(Source::Junior, [tournament_ext], dto.external_id.as_str())?;
        let team_id = self
            .ctx
            .repos
            .teams
            .upsert(&team_from_dto(key, tournament_id, dto))
            .await?;

        let body = self.ctx.get(&dto.url).await?;
        let roster = self.parser.parse_roster(&body)?;

        let report = run_bounded_stage(
            "junior players",
            &self.ctx.cancel,
            roster,
            self.ctx.config.workers.player,
            |entry| self.player_unit(&team_id, entry),
        )
        .await;
        let mut summary = CrawlSummary::absorb(report);
        summary.teams += 1;
        Ok(summary)
    }

    async fn player_unit(&self, team_id: &str, entry: RosterEntryDto) -> DomainResult<CrawlSummary> {
        let url = entry.url.clone().unwrap_or_default();
        let job = self
            .ctx
            .unit_job(JobKind::Player, &entry.player_external_id, &url, &entry)
            .with_meta("team_id", team_id);
        self.ctx.guarded(job, self.crawl_player(team_id, &entry)).await
    }

    async fn crawl_player(&self, team_id: &str, entry: &RosterEntryDto) -> DomainResult<CrawlSummary> {
        crawl_roster_player(&self.ctx, team_id, entry, true, |page| self.parser.parse_player(page)).await
    }
}

#[async_trait]
impl JobReplayer for JuniorCrawler {
    fn source(&self) -> Source {
        Source::Junior
    }

    async fn replay(&self, job: &FailedJob) -> DomainResult<CrawlSummary> {
        match job.job_type {
            JobKind::Season => {
                let season: SeasonDto = job_payload(job)?;
                self.crawl_season(&season).await
            }
            JobKind::Tournament => {
                let dto: TournamentDto = job_payload(job)?;
                self.crawl_tournament(job_meta(job, "season_id")?, job_meta(job, "season")?, &dto)
                    .await
            }
            JobKind::Team => {
                let dto: TeamDto = job_payload(job)?;
                self.crawl_team(job_meta(job, "tournament_id")?, job_meta(job, "tournament_ext")?, &dto)
                    .await
            }
            JobKind::Player => {
                let entry: RosterEntryDto = job_payload(job)?;
                self.crawl_player(job_meta(job, "team_id")?, &entry).await
            }
            other => Err(DomainError::business(format!("junior has no {other} level"))),
        }
    }
}
