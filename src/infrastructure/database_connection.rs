// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::infrastructure::config::DatabaseConfig;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS players (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        external_id TEXT NOT NULL,
        full_name TEXT NOT NULL,
        birth_date TEXT,
        birth_year INTEGER,
        position TEXT,
        handedness TEXT,
        height_cm INTEGER,
        weight_kg INTEGER,
        citizenship TEXT,
        photo_url TEXT,
        profile_url TEXT,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        external_id TEXT NOT NULL,
        tournament_id TEXT,
        name TEXT NOT NULL,
        city TEXT,
        logo_url TEXT,
        url TEXT,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tournaments (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        external_id TEXT NOT NULL,
        parent_id TEXT,
        season TEXT,
        name TEXT NOT NULL,
        group_name TEXT,
        birth_year INTEGER,
        url TEXT,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS matches (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        external_id TEXT NOT NULL,
        tournament_id TEXT NOT NULL,
        home_team_id TEXT,
        away_team_id TEXT,
        home_score INTEGER,
        away_score INTEGER,
        played_at TEXT,
        venue TEXT,
        url TEXT,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roster_entries (
        player_id TEXT NOT NULL,
        team_id TEXT NOT NULL,
        jersey_number INTEGER,
        position TEXT,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (player_id, team_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS player_statistics (
        player_id TEXT NOT NULL,
        tournament_id TEXT NOT NULL,
        team_id TEXT NOT NULL,
        games INTEGER,
        goals INTEGER,
        assists INTEGER,
        points INTEGER,
        penalty_minutes INTEGER,
        plus_minus INTEGER,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (player_id, tournament_id, team_id)
    )
    "#,
    // Timestamps are epoch milliseconds so due-job selection is an integer compare
    r#"
    CREATE TABLE IF NOT EXISTS failed_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_type TEXT NOT NULL,
        source TEXT NOT NULL,
        external_id TEXT NOT NULL,
        url TEXT NOT NULL,
        error_message TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL,
        next_retry_at INTEGER NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_teams_tournament ON teams (tournament_id)",
    "CREATE INDEX IF NOT EXISTS idx_tournaments_parent ON tournaments (parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_matches_tournament ON matches (tournament_id)",
    "CREATE INDEX IF NOT EXISTS idx_roster_team ON roster_entries (team_id)",
    "CREATE INDEX IF NOT EXISTS idx_failed_jobs_due ON failed_jobs (next_retry_at, retry_count)",
];

#[derive(Clone)]
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        let in_memory = db_path.starts_with(":memory:");

        // Create database file directory if it doesn't exist
        if !in_memory && let Some(parent) = Path::new(db_path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url: {database_url}"))?
            .create_if_missing(true)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            })
            .busy_timeout(BUSY_TIMEOUT);

        // Every connection to :memory: is its own database, so pin one
        let mut pool_options = SqlitePoolOptions::new();
        pool_options = if in_memory {
            pool_options.max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            pool_options.max_connections(max_connections)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to {database_url}"))?;

        info!("Connected to database: {}", database_url);
        Ok(Self { pool })
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::new(&config.url, config.max_connections).await
    }

    /// Migrated private in-memory database
    pub async fn in_memory() -> Result<Self> {
        let db = Self::new("sqlite::memory:", 1).await?;
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        debug!("Schema ready ({} statements)", SCHEMA.len());
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
