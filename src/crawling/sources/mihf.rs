//! stats.mihf.ru: seasons → groups → tournaments → stages → teams → players
//!
//! The deepest hierarchy of the three. Team ids are only unique inside a
//! stage, so team keys carry `<season>-<tournament>-<stage>` as their scope.
//! Each stage also publishes a paged player statistics grid.

pub mod html;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::crawling::bounded_stage::run_bounded_stage;
use crate::crawling::context::{CrawlContext, job_meta, job_payload};
use crate::crawling::dto::{GroupDto, Page, PlayerDto, PlayerStatDto, RosterEntryDto, SeasonDto, TeamDto, TournamentDto};
use crate::crawling::error_handler::ErrorHandler;
use crate::crawling::pagination::collect_pages;
use crate::crawling::sources::{JobReplayer, crawl_roster_player, statistic_from_dto, team_from_dto};
use crate::crawling::summary::CrawlSummary;
use crate::domain::{DomainError, DomainResult, EntityRef, FailedJob, JobKind, Player, Source, Tournament, non_empty};

pub const SEASONS_PATH: &str = "/seasons";

pub trait MihfParser: Send + Sync {
    fn parse_seasons(&self, html: &[u8]) -> DomainResult<Vec<SeasonDto>>;
    fn parse_groups(&self, html: &[u8]) -> DomainResult<Vec<GroupDto>>;
    fn parse_tournaments(&self, html: &[u8]) -> DomainResult<Vec<TournamentDto>>;
    fn parse_sub_tournaments(&self, html: &[u8]) -> DomainResult<Vec<TournamentDto>>;
    fn parse_teams(&self, html: &[u8]) -> DomainResult<Vec<TeamDto>>;
    fn parse_stats(&self, html: &[u8]) -> DomainResult<Page<PlayerStatDto>>;
    fn parse_roster(&self, html: &[u8]) -> DomainResult<Vec<RosterEntryDto>>;
    fn parse_player(&self, html: &[u8]) -> DomainResult<PlayerDto>;
}

/// Ancestors of a stage, as stored on its failed jobs
#[derive(Debug, Clone)]
struct StageScope {
    season_id: String,
    season: String,
    group: String,
    tournament_ext: String,
    tournament_id: String,
}

impl StageScope {
    fn from_job(job: &FailedJob) -> DomainResult<Self> {
        Ok(Self {
            season_id: job_meta(job, "season_id")?.to_string(),
            season: job_meta(job, "season")?.to_string(),
            group: job_meta(job, "group")?.to_string(),
            tournament_ext: job_meta(job, "tournament_ext")?.to_string(),
            tournament_id: job_meta(job, "tournament_id")?.to_string(),
        })
    }

    fn tournament_key(&self) -> DomainResult<EntityRef> {
        EntityRef::scoped(Source::Mihf, [self.season_id.as_str()], self.tournament_ext.as_str())
    }

    /// Scope component shared by every team of `stage_ext`
    fn team_scope(&self, stage_ext: &str) -> String {
        format!("{}-{}-{}", self.season_id, self.tournament_ext, stage_ext)
    }
}

pub struct MihfCrawler {
    ctx: CrawlContext,
    parser: Arc<dyn MihfParser>,
    errors: ErrorHandler,
}

impl MihfCrawler {
    #[must_use]
    pub fn new(ctx: CrawlContext, parser: Arc<dyn MihfParser>, errors: ErrorHandler) -> Self {
        Self { ctx, parser, errors }
    }

    pub async fn run(&self) -> DomainResult<CrawlSummary> {
        info!("🏒 Starting mihf crawl");
        let seasons = self.fetch_seasons().await?;
        info!("Found {} mihf seasons", seasons.len());

        let report = run_bounded_stage(
            "mihf seasons",
            &self.ctx.cancel,
            seasons,
            self.ctx.config.workers.season,
            |season| self.season_unit(season),
        )
        .await;

        let summary = CrawlSummary::absorb(report);
        summary.log(Source::Mihf);
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
                    .handle_with_retry(&self.ctx.cancel, e, "mihf season list", load)
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
        let groups = self.parser.parse_groups(&body)?;
        debug!("Season {}: {} groups", season.name, groups.len());

        let report = run_bounded_stage(
            "mihf groups",
            &self.ctx.cancel,
            groups,
            self.ctx.config.workers.group,
            |group| self.group_unit(season, group),
        )
        .await;
        let mut summary = CrawlSummary::absorb(report);
        summary.seasons += 1;
        Ok(summary)
    }

    async fn group_unit(&self, season: &SeasonDto, group: GroupDto) -> DomainResult<CrawlSummary> {
        let job = self
            .ctx
            .unit_job(JobKind::Group, &group.external_id, &group.url, &group)
            .with_meta("season_id", season.external_id.as_str())
            .with_meta("season", season.name.as_str());
        self.ctx
            .guarded(job, self.crawl_group(&season.external_id, &season.name, &group))
            .await
    }

    async fn crawl_group(&self, season_id: &str, season_name: &str, group: &GroupDto) -> DomainResult<CrawlSummary> {
        let body = self.ctx.get(&group.url).await?;
        let tournaments = self.parser.parse_tournaments(&body)?;

        let report = run_bounded_stage(
            "mihf tournaments",
            &self.ctx.cancel,
            tournaments,
            self.ctx.config.workers.tournament,
            |tournament| self.tournament_unit(season_id, season_name, &group.name, tournament),
        )
        .await;
        let mut summary = CrawlSummary::absorb(report);
        summary.groups += 1;
        Ok(summary)
    }

    async fn tournament_unit(
        &self,
        season_id: &str,
        season_name: &str,
        group_name: &str,
        tournament: TournamentDto,
    ) -> DomainResult<CrawlSummary> {
        let job = self
            .ctx
            .unit_job(JobKind::Tournament, &tournament.external_id, &tournament.url, &tournament)
            .with_meta("season_id", season_id)
            .with_meta("season", season_name)
            .with_meta("group", group_name);
        self.ctx
            .guarded(job, self.crawl_tournament(season_id, season_name, group_name, &tournament))
            .await
    }

    async fn crawl_tournament(
        &self,
        season_id: &str,
        season_name: &str,
        group_name: &str,
        dto: &TournamentDto,
    ) -> DomainResult<CrawlSummary> {
        let mut tournament = Tournament::new(
            EntityRef::scoped(Source::Mihf, [season_id], dto.external_id.as_str())?,
            dto.name.as_str(),
        );
        tournament.season = non_empty(Some(season_name.to_string()));
        tournament.group_name = non_empty(Some(group_name.to_string())).or_else(|| non_empty(dto.group_name.clone()));
        tournament.birth_year = dto.birth_year;
        tournament.url = Some(dto.url.clone());
        let tournament_id = self.ctx.repos.tournaments.upsert(&tournament).await?;

        let body = self.ctx.get(&dto.url).await?;
        let stages = self.parser.parse_sub_tournaments(&body)?;
        if stages.is_empty() {
            debug!("{} has no stages", tournament_id);
        }

        let scope = StageScope {
            season_id: season_id.to_string(),
            season: season_name.to_string(),
            group: group_name.to_string(),
            tournament_ext: dto.external_id.clone(),
            tournament_id,
        };
        let report = run_bounded_stage(
            "mihf stages",
            &self.ctx.cancel,
            stages,
            self.ctx.config.workers.sub_tournament,
            |stage| self.stage_unit(&scope, stage),
        )
        .await;
        let mut summary = CrawlSummary::absorb(report);
        summary.tournaments += 1;
        Ok(summary)
    }

    async fn stage_unit(&self, scope: &StageScope, stage: TournamentDto) -> DomainResult<CrawlSummary> {
        let job = self
            .ctx
            .unit_job(JobKind::SubTournament, &stage.external_id, &stage.url, &stage)
            .with_meta("season_id", scope.season_id.as_str())
            .with_meta("season", scope.season.as_str())
            .with_meta("group", scope.group.as_str())
            .with_meta("tournament_ext", scope.tournament_ext.as_str())
            .with_meta("tournament_id", scope.tournament_id.as_str());
        self.ctx.guarded(job, self.crawl_stage(scope, &stage)).await
    }

    async fn crawl_stage(&self, scope: &StageScope, dto: &TournamentDto) -> DomainResult<CrawlSummary> {
        let mut stage = Tournament::new(scope.tournament_key()?.child(dto.external_id.as_str())?, dto.name.as_str());
        stage.parent_id = Some(scope.tournament_id.clone());
        stage.season = non_empty(Some(scope.season.clone()));
        stage.group_name = non_empty(Some(scope.group.clone()));
        stage.birth_year = dto.birth_year;
        stage.url = Some(dto.url.clone());
        let stage_id = self.ctx.repos.tournaments.upsert(&stage).await?;
        let team_scope = scope.team_scope(&dto.external_id);

        let body = self.ctx.get(&dto.url).await?;
        let teams = self.parser.parse_teams(&body)?;

        let report = run_bounded_stage(
            "mihf teams",
            &self.ctx.cancel,
            teams,
            self.ctx.config.workers.team,
            |team| self.team_unit(&stage_id, &team_scope, team),
        )
        .await;
        let mut summary = CrawlSummary::absorb(report);
        summary.sub_tournaments += 1;

        if let Some(path) = dto.stats_url.as_deref() {
            match self.crawl_stats(&stage_id, &team_scope, path).await {
                Ok(rows) => summary.statistics += rows,
                Err(e) => {
                    warn!("Statistics of {} failed: {}", stage_id, e);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn crawl_stats(&self, stage_id: &str, team_scope: &str, path: &str) -> DomainResult<usize> {
        let body = self.ctx.get(path).await?;
        let first = self.parser.parse_stats(&body)?;
        let rows = collect_pages(self.ctx.fetcher.as_ref(), &self.ctx.cancel, path, first, |page| {
            self.parser.parse_stats(page)
        })
        .await?;

        let mut written = 0;
        for row in rows {
            // A statistic is keyed by its team; rows without one cannot be stored
            let Some(team_ext) = row.team_external_id.as_deref() else {
                debug!("{}: stats row for {} has no team", stage_id, row.player_external_id);
                continue;
            };
            let team_id = EntityRef::scoped(Source::Mihf, [team_scope], team_ext)?.render();
            let player_key = EntityRef::new(Source::Mihf, row.player_external_id.as_str())?;

            if let Some(name) = non_empty(row.full_name.clone()) {
                self.ctx.repos.players.upsert(&Player::new(player_key.clone(), name)).await?;
            }
            let stat = statistic_from_dto(player_key.render(), stage_id, team_id, &row);
            self.ctx.repos.statistics.upsert(&stat).await?;
            written += 1;
        }
        debug!("{}: {} statistics rows", stage_id, written);
        Ok(written)
    }

    async fn team_unit(&self, stage_id: &str, team_scope: &str, team: TeamDto) -> DomainResult<CrawlSummary> {
        let job = self
            .ctx
            .unit_job(JobKind::Team, &team.external_id, &team.url, &team)
            .with_meta("stage_id", stage_id)
            .with_meta("team_scope", team_scope);
        self.ctx.guarded(job, self.crawl_team(stage_id, team_scope, &team)).await
    }

    async fn crawl_team(&self, stage_id: &str, team_scope: &str, dto: &TeamDto) -> DomainResult<CrawlSummary> {
        let key = EntityRef::scoped(Source::Mihf, [team_scope], dto.external_id.as_str())?;
        let team_id = self
            .ctx
            .repos
            .teams
            .upsert(&team_from_dto(key, stage_id, dto))
            .await?;

        let body = self.ctx.get(&dto.url).await?;
        let roster = self.parser.parse_roster(&body)?;

        let report = run_bounded_stage(
            "mihf players",
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
impl JobReplayer for MihfCrawler {
    fn source(&self) -> Source {
        Source::Mihf
    }

    async fn replay(&self, job: &FailedJob) -> DomainResult<CrawlSummary> {
        match job.job_type {
            JobKind::Season => {
                let season: SeasonDto = job_payload(job)?;
                self.crawl_season(&season).await
            }
            JobKind::Group => {
                let group: GroupDto = job_payload(job)?;
                self.crawl_group(job_meta(job, "season_id")?, job_meta(job, "season")?, &group)
                    .await
            }
            JobKind::Tournament => {
                let dto: TournamentDto = job_payload(job)?;
                self.crawl_tournament(
                    job_meta(job, "season_id")?,
                    job_meta(job, "season")?,
                    job_meta(job, "group")?,
                    &dto,
                )
                .await
            }
            JobKind::SubTournament => {
                let dto: TournamentDto = job_payload(job)?;
                self.crawl_stage(&StageScope::from_job(job)?, &dto).await
            }
            JobKind::Team => {
                let dto: TeamDto = job_payload(job)?;
                self.crawl_team(job_meta(job, "stage_id")?, job_meta(job, "team_scope")?, &dto)
                    .await
            }
            JobKind::Player => {
                let entry: RosterEntryDto = job_payload(job)?;
                self.crawl_player(job_meta(job, "team_id")?, &entry).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_scope_joins_the_stage_chain() {
        let scope = StageScope {
            season_id: "45".into(),
            season: "2024/25".into(),
            group: "U16".into(),
            tournament_ext: "6".into(),
            tournament_id: "msk:45:6".into(),
        };
        let team_scope = scope.team_scope("7");
        let key = EntityRef::scoped(Source::Mihf, [team_scope.as_str()], "89").unwrap();
        assert_eq!(key.render(), "msk:45-6-7:89");
    }

    #[test]
    fn stage_key_nests_under_its_tournament() {
        let scope = StageScope {
            season_id: "45".into(),
            season: "2024/25".into(),
            group: "U16".into(),
            tournament_ext: "6".into(),
            tournament_id: "msk:45:6".into(),
        };
        let tournament = scope.tournament_key().unwrap();
        assert_eq!(tournament.render(), scope.tournament_id);
        let stage = tournament.child("7").unwrap();
        assert_eq!(stage.render(), "msk:45:6:7");
        assert_eq!(stage.scope(), ["45".to_string(), "6".to_string()]);
    }
}
