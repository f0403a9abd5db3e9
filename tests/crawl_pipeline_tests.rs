//! One failing team must not take its siblings down, and must come back
//! through the retry queue once the site recovers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use hockey_stats_crawler::crawling::dto::{
    MatchDto, Page, PlayerDto, RosterEntryDto, SeasonDto, TeamDto, TournamentDto,
};
use hockey_stats_crawler::crawling::sources::fhspb::{FhspbParser, SEASONS_PATH};
use hockey_stats_crawler::crawling::context::RUN_ID_KEY;
use hockey_stats_crawler::crawling::{CrawlContext, CrawlSummary, ErrorHandler, FhspbCrawler, RetryRunner};
use hockey_stats_crawler::domain::{DomainError, DomainResult, EntityRef, JobKind, Repositories, Source};
use hockey_stats_crawler::infrastructure::config::{ErrorHandlerConfig, PoolConfig, RetryConfig, SourceConfig};
use hockey_stats_crawler::infrastructure::{DatabaseConnection, PageFetcher, RetryManager};

/// Canned responses keyed by path: a body, or an HTTP status to fail with
#[derive(Default)]
struct FakeSite {
    pages: Mutex<HashMap<String, Result<Vec<u8>, u16>>>,
    hits: Mutex<HashMap<String, usize>>,
}

impl FakeSite {
    fn page(&self, path: &str, body: serde_json::Value) {
        self.pages.lock().unwrap().insert(path.to_string(), Ok(body.to_string().into_bytes()));
    }

    fn fail(&self, path: &str, status: u16) {
        self.pages.lock().unwrap().insert(path.to_string(), Err(status));
    }

    fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PageFetcher for FakeSite {
    async fn get(&self, path: &str) -> DomainResult<Vec<u8>> {
        *self.hits.lock().unwrap().entry(path.to_string()).or_default() += 1;
        let page = self.pages.lock().unwrap().get(path).cloned();
        match page {
            Some(Ok(body)) => Ok(body),
            Some(Err(status)) => Err(DomainError::http_status(path, status)),
            None => Err(DomainError::http_status(path, 404)),
        }
    }

    async fn post_form(&self, path: &str, _form: &[(String, String)]) -> DomainResult<Vec<u8>> {
        Err(DomainError::http_status(path, 405))
    }
}

/// Pages in this site are JSON renderings of the parser output
struct JsonParser;

fn decode<T: DeserializeOwned>(body: &[u8]) -> DomainResult<T> {
    serde_json::from_slice(body).map_err(|e| DomainError::invalid_format("body", e.to_string()))
}

impl FhspbParser for JsonParser {
    fn parse_seasons(&self, html: &[u8]) -> DomainResult<Vec<SeasonDto>> {
        decode(html)
    }
    fn parse_tournaments(&self, html: &[u8]) -> DomainResult<Vec<TournamentDto>> {
        decode(html)
    }
    fn parse_teams(&self, html: &[u8]) -> DomainResult<Vec<TeamDto>> {
        decode(html)
    }
    fn parse_schedule(&self, html: &[u8]) -> DomainResult<Page<MatchDto>> {
        Ok(Page::single(decode(html)?))
    }
    fn parse_roster(&self, html: &[u8]) -> DomainResult<Vec<RosterEntryDto>> {
        decode(html)
    }
    fn parse_player(&self, html: &[u8]) -> DomainResult<PlayerDto> {
        decode(html)
    }
}

fn five_team_site() -> Arc<FakeSite> {
    let site = Arc::new(FakeSite::default());
    site.page(SEASONS_PATH, json!([{ "external_id": "2024", "name": "2024/2025", "url": "/s/2024" }]));
    site.page(
        "/s/2024",
        json!([{ "external_id": "10", "name": "Первенство 2012 г.р.", "url": "/t/10", "birth_year": 2012 }]),
    );
    let teams: Vec<_> = (1..=5)
        .map(|n| json!({ "external_id": n.to_string(), "name": format!("Team {n}"), "url": format!("/team/{n}") }))
        .collect();
    site.page("/t/10", json!(teams));
    for n in 1..=5 {
        site.page(
            &format!("/team/{n}"),
            json!([
                { "player_external_id": format!("{n}01"), "full_name": format!("Forward {n}"), "jersey_number": 10 },
                { "player_external_id": format!("{n}02"), "full_name": format!("Goalie {n}"), "jersey_number": 1 },
            ]),
        );
    }
    site.fail("/team/3", 500);
    site
}

async fn crawler(site: Arc<FakeSite>, db: &DatabaseConnection, retry: RetryManager) -> FhspbCrawler {
    let mut config = SourceConfig::for_source(Source::Fhspb);
    config.workers.team = 2;
    let ctx = CrawlContext {
        source: Source::Fhspb,
        config: Arc::new(config),
        fetcher: site,
        repos: Repositories::sqlite(db.pool().clone()),
        retry,
        cancel: CancellationToken::new(),
        run_id: Uuid::new_v4(),
    };
    FhspbCrawler::new(ctx, Arc::new(JsonParser), ErrorHandler::new(&ErrorHandlerConfig::default()))
}

fn immediate_retry() -> RetryConfig {
    RetryConfig {
        base_delay_secs: 0,
        ..RetryConfig::default()
    }
}

#[tokio::test]
async fn failing_team_is_queued_while_siblings_complete() {
    let db = DatabaseConnection::in_memory().await.unwrap();
    let retry = RetryManager::new(db.pool().clone(), &immediate_retry());
    let site = five_team_site();
    let crawler = crawler(site.clone(), &db, retry.clone()).await;

    let summary = crawler.run().await.unwrap();

    assert_eq!(summary.seasons, 1);
    assert_eq!(summary.tournaments, 1);
    assert_eq!(summary.teams, 4);
    assert_eq!(summary.players, 8);
    assert_eq!(summary.roster_entries, 8);
    assert_eq!(summary.failed, 1);
    assert_eq!(site.hits("/team/3"), 1);

    let repos = Repositories::sqlite(db.pool().clone());
    assert_eq!(repos.players.count().await.unwrap(), 8);
    assert!(!repos.players.exists(Source::Fhspb, "301").await.unwrap());
    assert!(repos.players.exists(Source::Fhspb, "501").await.unwrap());

    let jobs = retry.get_jobs_due_at(None, 10, DateTime::<Utc>::MAX_UTC).await.unwrap();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.job_type, JobKind::Team);
    assert_eq!(job.source, Source::Fhspb);
    assert_eq!(job.external_id, "3");
    assert_eq!(job.url, "/team/3");
    assert_eq!(job.retry_count, 0);
    let tournament_key = EntityRef::scoped(Source::Fhspb, ["2024"], "10").unwrap().render();
    assert_eq!(job.meta("tournament_id"), Some(tournament_key.as_str()));
}

#[tokio::test]
async fn replay_completes_the_failed_team_after_recovery() {
    let db = DatabaseConnection::in_memory().await.unwrap();
    let retry = RetryManager::new(db.pool().clone(), &immediate_retry());
    let site = five_team_site();
    let crawler = Arc::new(crawler(site.clone(), &db, retry.clone()).await);
    crawler.run().await.unwrap();

    site.page(
        "/team/3",
        json!([{ "player_external_id": "301", "full_name": "Forward 3", "jersey_number": 10 }]),
    );

    let runner = RetryRunner::new(retry.clone(), PoolConfig::default(), 10).register(crawler);
    let report = runner.run(Some(Source::Fhspb), &CancellationToken::new()).await.unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.summary.players, 1);

    let repos = Repositories::sqlite(db.pool().clone());
    assert_eq!(repos.players.count().await.unwrap(), 9);
    assert!(repos.players.exists(Source::Fhspb, "301").await.unwrap());
    assert_eq!(retry.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn cancelled_run_queues_nothing() {
    let db = DatabaseConnection::in_memory().await.unwrap();
    let retry = RetryManager::new(db.pool().clone(), &immediate_retry());
    let site = five_team_site();
    let mut config = SourceConfig::for_source(Source::Fhspb);
    config.workers.team = 2;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = CrawlContext {
        source: Source::Fhspb,
        config: Arc::new(config),
        fetcher: site.clone(),
        repos: Repositories::sqlite(db.pool().clone()),
        retry: retry.clone(),
        cancel,
        run_id: Uuid::new_v4(),
    };
    let crawler = FhspbCrawler::new(ctx, Arc::new(JsonParser), ErrorHandler::new(&ErrorHandlerConfig::default()));

    assert!(crawler.run().await.is_err());
    assert_eq!(site.hits(SEASONS_PATH), 0);
    assert_eq!(retry.stats().await.unwrap().total, 0);
}

type Rows = (
    Vec<(String, String, Option<i64>)>,
    Vec<(String, String, Option<i64>)>,
    Vec<(String, Option<String>, Option<i64>, Option<i64>)>,
    Vec<(String, String, Option<String>)>,
);

async fn stored_rows(db: &DatabaseConnection) -> Rows {
    let pool = db.pool();
    let players = sqlx::query_as("SELECT id, full_name, birth_year FROM players ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap();
    let roster = sqlx::query_as(
        "SELECT player_id, team_id, jersey_number FROM roster_entries ORDER BY player_id, team_id",
    )
    .fetch_all(pool)
    .await
    .unwrap();
    let matches = sqlx::query_as("SELECT id, home_team_id, home_score, away_score FROM matches ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap();
    let teams = sqlx::query_as("SELECT id, name, tournament_id FROM teams ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap();
    (players, roster, matches, teams)
}

#[tokio::test]
async fn second_crawl_of_an_unchanged_site_changes_nothing() {
    let db = DatabaseConnection::in_memory().await.unwrap();
    let retry = RetryManager::new(db.pool().clone(), &immediate_retry());
    let site = five_team_site();
    site.page(
        "/team/3",
        json!([{ "player_external_id": "301", "full_name": "Forward 3", "jersey_number": 10 }]),
    );
    site.page(
        "/s/2024",
        json!([{
            "external_id": "10",
            "name": "Первенство 2012 г.р.",
            "url": "/t/10",
            "birth_year": 2012,
            "schedule_url": "/t/10/games",
        }]),
    );
    site.page(
        "/t/10/games",
        json!([
            { "external_id": "g1", "home_team_external_id": "1", "away_team_external_id": "2", "home_score": 3, "away_score": 1 },
            { "external_id": "g2", "home_team_external_id": "4", "away_team_external_id": "5" },
        ]),
    );
    let crawler = crawler(site.clone(), &db, retry.clone()).await;

    let first = crawler.run().await.unwrap();
    let after_first = stored_rows(&db).await;
    let second = crawler.run().await.unwrap();
    let after_second = stored_rows(&db).await;

    assert_eq!(first.failed, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(first.players, second.players);
    assert_eq!(first.matches, 2);
    assert_eq!(second.matches, 2);
    assert_eq!(after_first, after_second);

    let (players, roster, matches, teams) = after_second;
    assert_eq!(players.len(), 9);
    assert_eq!(roster.len(), 9);
    assert_eq!(matches.len(), 2);
    assert_eq!(teams.len(), 5);
    assert!(players.iter().any(|(id, name, _)| id == "spb:202" && name == "Goalie 2"));
    assert!(roster.iter().any(|(player, team, jersey)| player == "spb:102" && team == "spb:1" && *jersey == Some(1)));
    assert!(matches.iter().any(|(_, home, h, a)| home.as_deref() == Some("spb:1") && *h == Some(3) && *a == Some(1)));

    let repos = Repositories::sqlite(db.pool().clone());
    assert_eq!(repos.tournaments.count().await.unwrap(), 1);
    assert_eq!(site.hits("/team/1"), 2);
    assert_eq!(retry.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn unit_failures_carry_the_run_id() {
    let db = DatabaseConnection::in_memory().await.unwrap();
    let retry = RetryManager::new(db.pool().clone(), &immediate_retry());
    let run_id = Uuid::new_v4();
    let ctx = CrawlContext {
        source: Source::Fhspb,
        config: Arc::new(SourceConfig::for_source(Source::Fhspb)),
        fetcher: five_team_site(),
        repos: Repositories::sqlite(db.pool().clone()),
        retry: retry.clone(),
        cancel: CancellationToken::new(),
        run_id,
    };
    let job = ctx.unit_job(JobKind::Team, "3", "/team/3", &"3");

    let err = ctx
        .guarded(job, async { Err::<CrawlSummary, _>(DomainError::http_status("/team/3", 500)) })
        .await
        .unwrap_err();

    assert_eq!(err.trace_id(), Some(run_id.to_string().as_str()));
    let jobs = retry.get_jobs_due_at(None, 10, DateTime::<Utc>::MAX_UTC).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].meta(RUN_ID_KEY), err.trace_id());

    let tagged = DomainError::business("inner").with_trace_id("upstream");
    assert_eq!(ctx.traced(tagged).trace_id(), Some("upstream"));
}
