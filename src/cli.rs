//! Command-line entry point
//!
//! One subcommand per source plus the retry-queue operator commands.
//! SIGINT cancels the root token: no new unit starts, in-flight units finish.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::crawling::error_handler::ErrorHandler;
use crate::crawling::sources::fhspb::html::HtmlFhspbParser;
use crate::crawling::sources::junior::html::HtmlJuniorParser;
use crate::crawling::sources::mihf::html::HtmlMihfParser;
use crate::crawling::{CrawlContext, FhspbCrawler, JuniorCrawler, MihfCrawler, RetryRunner};
use crate::domain::{Repositories, Source};
use crate::infrastructure::config::{AppConfig, ConfigManager};
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::http_client::FetchClient;
use crate::infrastructure::logging::{init_logging_with_config, log_system_info};
use crate::infrastructure::retry_manager::RetryManager;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Parser)]
#[command(name = "hockey-stats-crawler", version, about)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, env = "HOCKEY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Crawl fhspb.ru
    Fhspb,
    /// Crawl stats.mihf.ru
    Mihf,
    /// Crawl junior.fhr.ru
    Junior,
    /// Replay due jobs from the retry queue
    Retry {
        #[arg(long)]
        source: Option<Source>,
    },
    /// Delete old and exhausted retry jobs
    Cleanup {
        #[arg(long)]
        older_than_days: Option<u64>,
    },
    /// List queued retry jobs, or dead letters with --dead
    FailedJobs {
        #[arg(long)]
        source: Option<Source>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long)]
        dead: bool,
    },
}

pub async fn run() -> Result<()> {
    execute(Cli::parse()).await
}

pub async fn execute(cli: Cli) -> Result<()> {
    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let config = manager.load_config().await.context("failed to load configuration")?;
    init_logging_with_config(&config.logging)?;
    log_system_info();

    let db = DatabaseConnection::from_config(&config.database)
        .await
        .context("failed to open database")?;
    db.migrate().await.context("failed to migrate database")?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let run_id = Uuid::new_v4();
    let span = info_span!("run", %run_id, command = ?cli.command);
    let result = dispatch(cli.command, &config, &db, &cancel, run_id)
        .instrument(span)
        .await;
    db.close().await;
    result
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, letting in-flight work finish");
            cancel.cancel();
        }
    });
}

async fn dispatch(
    command: Command,
    config: &AppConfig,
    db: &DatabaseConnection,
    cancel: &CancellationToken,
    run_id: Uuid,
) -> Result<()> {
    let retry = RetryManager::new(db.pool().clone(), &config.retry);

    match command {
        Command::Fhspb => {
            let summary = fhspb(config, db, cancel, run_id)?.run().await?;
            print_json(&summary)
        }
        Command::Mihf => {
            let summary = mihf(config, db, cancel, run_id)?.run().await?;
            print_json(&summary)
        }
        Command::Junior => {
            let summary = junior(config, db, cancel, run_id)?.run().await?;
            print_json(&summary)
        }
        Command::Retry { source } => {
            let runner = RetryRunner::new(retry, config.pool.clone(), config.retry.batch_limit)
                .register(Arc::new(fhspb(config, db, cancel, run_id)?))
                .register(Arc::new(mihf(config, db, cancel, run_id)?))
                .register(Arc::new(junior(config, db, cancel, run_id)?));
            let report = runner.run(source, cancel).await?;
            print_json(&report)
        }
        Command::Cleanup { older_than_days } => {
            let days = older_than_days.unwrap_or_else(|| u64::from(config.retry.cleanup_after_days));
            let removed = retry
                .cleanup_old_jobs(Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY)))
                .await?;
            info!("🧹 Removed {} retry jobs", removed);
            print_json(&serde_json::json!({ "removed": removed }))
        }
        Command::FailedJobs { source, limit, dead } => {
            let jobs = if dead {
                retry.list_dead_letters(source, limit).await?
            } else {
                retry.get_jobs_due_at(source, limit, DateTime::<Utc>::MAX_UTC).await?
            };
            let stats = retry.stats().await?;
            print_json(&serde_json::json!({ "stats": stats, "jobs": jobs }))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn context(
    source: Source,
    config: &AppConfig,
    db: &DatabaseConnection,
    cancel: &CancellationToken,
    run_id: Uuid,
) -> Result<CrawlContext> {
    let source_config = config.source(source).clone();
    let fetcher = FetchClient::new(&source_config, cancel.clone())
        .with_context(|| format!("failed to build HTTP client for {source}"))?;
    Ok(CrawlContext {
        source,
        config: Arc::new(source_config),
        fetcher: Arc::new(fetcher),
        repos: Repositories::sqlite(db.pool().clone()),
        retry: RetryManager::new(db.pool().clone(), &config.retry),
        cancel: cancel.clone(),
        run_id,
    })
}

fn fhspb(config: &AppConfig, db: &DatabaseConnection, cancel: &CancellationToken, run_id: Uuid) -> Result<FhspbCrawler> {
    Ok(FhspbCrawler::new(
        context(Source::Fhspb, config, db, cancel, run_id)?,
        Arc::new(HtmlFhspbParser::new()?),
        ErrorHandler::new(&config.error_handler),
    ))
}

fn mihf(config: &AppConfig, db: &DatabaseConnection, cancel: &CancellationToken, run_id: Uuid) -> Result<MihfCrawler> {
    Ok(MihfCrawler::new(
        context(Source::Mihf, config, db, cancel, run_id)?,
        Arc::new(HtmlMihfParser::new()?),
        ErrorHandler::new(&config.error_handler),
    ))
}

fn junior(config: &AppConfig, db: &DatabaseConnection, cancel: &CancellationToken, run_id: Uuid) -> Result<JuniorCrawler> {
    Ok(JuniorCrawler::new(
        context(Source::Junior, config, db, cancel, run_id)?,
        Arc::new(HtmlJuniorParser::new()?),
        ErrorHandler::new(&config.error_handler),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_subcommands() {
        let cli = Cli::try_parse_from(["hockey-stats-crawler", "failed-jobs", "--source", "mihf", "--dead"]).unwrap();
        match cli.command {
            Command::FailedJobs { source, limit, dead } => {
                assert_eq!(source, Some(Source::Mihf));
                assert_eq!(limit, 50);
                assert!(dead);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["hockey-stats-crawler", "--config", "/tmp/c.json", "cleanup"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        assert!(matches!(cli.command, Command::Cleanup { older_than_days: None }));
    }

    #[test]
    fn rejects_unknown_source() {
        assert!(Cli::try_parse_from(["hockey-stats-crawler", "retry", "--source", "nowhere"]).is_err());
    }
}
