//! fhspb.ru: seasons → tournaments → teams → players
//!
//! Tournaments are keyed per season. Team and player ids are global on this
//! site, so their keys are unscoped. Each tournament's match schedule is a
//! paged grid walked through postbacks.

pub mod html;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::crawling::bounded_stage::run_bounded_stage;
use crate::crawling::context::{CrawlContext, job_meta, job_payload};
use crate::crawling::dto::{MatchDto, Page, PlayerDto, RosterEntryDto, SeasonDto, TeamDto, TournamentDto};
use crate::crawling::error_handler::ErrorHandler;
use crate::crawling::pagination::collect_pages;
use crate::crawling::sources::{JobReplayer, crawl_roster_player, match_from_dto, team_from_dto};
use crate::crawling::summary::CrawlSummary;
use crate::domain::{DomainError, DomainResult, EntityRef, FailedJob, JobKind, Source, Tournament, non_empty};

pub const SEASONS_PATH: &str = "/Seasons.aspx";

pub trait FhspbParser: Send + Sync {
    fn parse_seasons(&self, html: &[u8]) -> DomainResult<Vec<SeasonDto>>;
    fn parse_tournaments(&self, html: &[u8]) -> DomainResult<Vec<TournamentDto>>;
    fn parse_teams(&self, html: &[u8]) -> DomainResult<Vec<TeamDto>>;
    fn parse_schedule(&self, html: &[u8]) -> DomainResult<Page<MatchDto>>;
    fn parse_roster(&self, html: &[u8]) -> DomainResult<Vec<RosterEntryDto>>;
    fn parse_player(&self, html: &[u8]) -> DomainResult<PlayerDto>;
}

pub struct FhspbCrawler {
    ctx: CrawlContext,
    parser: Arc<dyn FhspbParser>,
    errors: ErrorHandler,
}

impl FhspbCrawler {
    #[must_use]
    pub fn new(ctx: CrawlContext, parser: Arc<dyn FhspbParser>, errors: ErrorHandler) -> Self {
        Self { ctx, parser, errors }
    }

    /// Full crawl. Only a season list that cannot be loaded fails the run.
    pub async fn run(&self) -> DomainResult<CrawlSummary> {
        info!("🏒 Starting fhspb crawl");
        let seasons = self.fetch_seasons().await?;
        info!("Found {} fhspb seasons", seasons.len());

        let report = run_bounded_stage(
            "fhspb seasons",
            &self.ctx.cancel,
            seasons,
            self.ctx.config.workers.season,
            |season| self.season_unit(season),
        )
        .await;

        let summary = CrawlSummary::absorb(report);
        summary.log(Source::Fhspb);
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
                    .handle_with_retry(&self.ctx.cancel, e, "fhspb season list", load)
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
        let tournaments = self.parser.parse_tournaments(&body)?;
        debug!("Season {}: {} tournaments", season.name, tournaments.len());

        let report = run_bounded_stage(
            "fhspb tournaments",
            &self.ctx.cancel,
            tournaments,
            self.ctx.config.workers.tournament,
            |tournament| self.tournament_unit(season, tournament),
        )
        .await;

        let mut summary = CrawlSummary::absorb(report);
        summary.seasons += 1;
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
            EntityRef::scoped(Source::Fhspb, [season_id], dto.external_id.as_str())?,
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
            "fhspb teams",
            &self.ctx.cancel,
            teams,
            self.ctx.config.workers.team,
            |team| self.team_unit(&tournament_id, team),
        )
        .await;
        let mut summary = CrawlSummary::absorb(report);
        summary.tournaments += 1;

        if let Some(path) = dto.schedule_url.as_deref() {
            match self.crawl_schedule(&tournament_id, path).await {
                Ok(matches) => summary.matches += matches,
                Err(e) => {
                    warn!("Schedule of {} failed: {}", tournament_id, e);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn crawl_schedule(&self, tournament_id: &str, path: &str) -> DomainResult<usize> {
        let body = self.ctx.get(path).await?;
        let first = self.parser.parse_schedule(&body)?;
        let games = collect_pages(self.ctx.fetcher.as_ref(), &self.ctx.cancel, path, first, |page| {
            self.parser.parse_schedule(page)
        })
        .await?;

        let mut written = 0;
        for dto in games {
            let game = match_from_dto(Source::Fhspb, tournament_id, dto, |team| {
                Ok(EntityRef::new(Source::Fhspb, team)?.render())
            })?;
            self.ctx.repos.matches.upsert(&game).await?;
            written += 1;
        }
        debug!("{}: {} matches", tournament_id, written);
        Ok(written)
    }

    async fn team_unit(&self, tournament_id: &str, team: TeamDto) -> DomainResult<CrawlSummary> {
        let job = self
            .ctx
            .unit_job(JobKind::Team, &team.external_id, &team.url, &team)
            .with_meta("tournament_id", tournament_id);
        self.ctx.guarded(job, self.crawl_team(tournament_id, &team)).await
    }

    async fn crawl_team(&self, tournament_id: &str, dto: &TeamDto) -> DomainResult<CrawlSummary> {
        let key = EntityRef::new(Source::Fhspb, dto.external_id.as_str())?;
        let team_id = self
            .ctx
            .repos
            .teams
            .upsert(&team_from_dto(key, tournament_id, dto))
            .await?;

        let body = self.ctx.get(&dto.url).await?;
        let roster = self.parser.parse_roster(&body)?;

        let report = run_bounded_stage(
            "fhspb players",
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
        crawl_roster_player(&self.ctx, team_id, entry, false, |page| self.parser.parse_player(page)).await
    }
}

#[async_trait]
impl JobReplayer for FhspbCrawler {
    fn source(&self) -> Source {
        Source::Fhspb
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
                self.crawl_team(job_meta(job, "tournament_id")?, &dto).await
            }
            JobKind::Player => {
                let entry: RosterEntryDto = job_payload(job)?;
                self.crawl_player(job_meta(job, "team_id")?, &entry).await
            }
            other => Err(DomainError::business(format!("fhspb has no {other} level"))),
        }
    }
}
