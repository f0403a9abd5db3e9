//! Configuration infrastructure
//!
//! Contains configuration loading and management for the hockey crawlers.
//!
//! Configuration is resolved in three layers, later layers winning:
//! 1. Compiled-in defaults (the `defaults` module below)
//! 2. The JSON config file (created with defaults on first run)
//! 3. `HOCKEY__*` environment variables, e.g.
//!    `HOCKEY__SOURCES__FHSPB__REQUEST_DELAY_MS=2500`

#![allow(clippy::derivable_impls)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::domain::Source;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Durable retry queue settings
    pub retry: RetryConfig,
    /// In-process retry settings for the generic error handler
    pub error_handler: ErrorHandlerConfig,
    /// Adaptive worker pool settings
    pub pool: PoolConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite:data/hockey_stats.db`
    pub url: String,
    pub max_connections: u32,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Log file name inside the log directory
    pub file_name: String,

    /// Overrides the default `<exe dir>/logs`
    pub log_dir: Option<PathBuf>,

    /// Number of rotated log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Module-specific log level filters (e.g., "sqlx": "warn", "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry ceiling stored on every new failed job
    pub max_retries: u32,
    /// Base delay for the linear backoff (`base * (retry_count + 1)`)
    pub base_delay_secs: u64,
    /// Upper bound of jobs fetched per `get_jobs_for_retry` call
    pub batch_limit: u32,
    /// Horizon for the dead-letter sweep
    pub cleanup_after_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlerConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers started with the pool
    pub worker_count: usize,
    /// Hard cap for adaptive scale-up
    pub max_workers: usize,
    /// Task channel capacity
    pub buffer_size: usize,
    /// Queue utilization (0, 1] above which the pool grows
    pub scale_threshold: f64,
    pub scale_interval_ms: u64,
    pub task_timeout_seconds: u64,
}

impl PoolConfig {
    #[must_use]
    pub const fn scale_interval(&self) -> Duration {
        Duration::from_millis(self.scale_interval_ms)
    }

    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub fhspb: SourceConfig,
    pub mihf: SourceConfig,
    pub junior: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            fhspb: SourceConfig::for_source(Source::Fhspb),
            mihf: SourceConfig::for_source(Source::Mihf),
            junior: SourceConfig::for_source(Source::Junior),
        }
    }
}

/// Curve used by the fetch client between transport-level retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// `attempt * base`
    Linear,
    /// `2^(attempt + 1) * base`
    Exponential,
}

/// Per-source settings. Immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    /// Minimum gap between the end of one request and the start of the next
    pub request_delay_ms: u64,
    pub request_timeout_seconds: u64,
    /// Total attempts for transport-level failures (1 = no retry)
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub backoff_base_ms: u64,
    pub user_agent: String,
    pub workers: StageWorkers,
    pub min_birth_year: Option<i32>,
    pub max_birth_year: Option<i32>,
}

impl SourceConfig {
    #[must_use]
    pub fn for_source(source: Source) -> Self {
        let (delay, backoff) = match source {
            Source::Fhspb => (defaults::FHSPB_REQUEST_DELAY_MS, BackoffKind::Linear),
            Source::Mihf => (defaults::MIHF_REQUEST_DELAY_MS, BackoffKind::Exponential),
            Source::Junior => (defaults::JUNIOR_REQUEST_DELAY_MS, BackoffKind::Linear),
        };
        Self {
            base_url: source.default_base_url().to_string(),
            request_delay_ms: delay,
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_attempts: defaults::FETCH_MAX_ATTEMPTS,
            backoff,
            backoff_base_ms: defaults::FETCH_BACKOFF_BASE_MS,
            user_agent: defaults::USER_AGENT.to_string(),
            workers: StageWorkers::default(),
            min_birth_year: None,
            max_birth_year: None,
        }
    }

    #[must_use]
    pub const fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// `None` bounds are open.
    #[must_use]
    pub fn accepts_birth_year(&self, year: Option<i32>) -> bool {
        let Some(year) = year else {
            return true;
        };
        self.min_birth_year.is_none_or(|min| year >= min) && self.max_birth_year.is_none_or(|max| year <= max)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::for_source(Source::Fhspb)
    }
}

/// Worker count per pipeline level
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageWorkers {
    pub season: usize,
    pub group: usize,
    pub tournament: usize,
    pub sub_tournament: usize,
    pub team: usize,
    pub player: usize,
}

impl Default for StageWorkers {
    fn default() -> Self {
        Self {
            season: defaults::SEASON_WORKERS,
            group: defaults::GROUP_WORKERS,
            tournament: defaults::TOURNAMENT_WORKERS,
            sub_tournament: defaults::SUB_TOURNAMENT_WORKERS,
            team: defaults::TEAM_WORKERS,
            player: defaults::PLAYER_WORKERS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{section}: worker count '{field}' must be greater than 0")]
    ZeroWorkers { section: String, field: &'static str },

    #[error("{section}: min_birth_year {min} is greater than max_birth_year {max}")]
    InvertedBirthYears { section: String, min: i32, max: i32 },

    #[error("pool: scale_threshold must be in (0, 1], got {0}")]
    InvalidScaleThreshold(f64),

    #[error("pool: max_workers ({max}) must be >= worker_count ({initial}) and buffer_size > 0")]
    InvalidPoolBounds { initial: usize, max: usize },

    #[error("{section}: max_attempts must be at least 1")]
    ZeroAttempts { section: String },
}

impl AppConfig {
    #[must_use]
    pub const fn source(&self, source: Source) -> &SourceConfig {
        match source {
            Source::Fhspb => &self.sources.fhspb,
            Source::Mihf => &self.sources.mihf,
            Source::Junior => &self.sources.junior,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for source in Source::ALL {
            let cfg = self.source(source);
            let section = format!("sources.{source}");
            let w = &cfg.workers;
            for (field, value) in [
                ("season", w.season),
                ("group", w.group),
                ("tournament", w.tournament),
                ("sub_tournament", w.sub_tournament),
                ("team", w.team),
                ("player", w.player),
            ] {
                if value == 0 {
                    return Err(ConfigError::ZeroWorkers { section, field });
                }
            }
            if cfg.max_attempts == 0 {
                return Err(ConfigError::ZeroAttempts { section });
            }
            if let (Some(min), Some(max)) = (cfg.min_birth_year, cfg.max_birth_year)
                && min > max
            {
                return Err(ConfigError::InvertedBirthYears { section, min, max });
            }
        }

        let pool = &self.pool;
        if !(pool.scale_threshold > 0.0 && pool.scale_threshold <= 1.0) {
            return Err(ConfigError::InvalidScaleThreshold(pool.scale_threshold));
        }
        if pool.worker_count == 0 || pool.max_workers < pool.worker_count || pool.buffer_size == 0 {
            return Err(ConfigError::InvalidPoolBounds {
                initial: pool.worker_count,
                max: pool.max_workers,
            });
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            retry: RetryConfig::default(),
            error_handler: ErrorHandlerConfig::default(),
            pool: PoolConfig::default(),
            sources: SourcesConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: defaults::DATABASE_URL.to_string(),
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: defaults::LOG_CONSOLE_OUTPUT,
            file_output: defaults::LOG_FILE_OUTPUT,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            log_dir: None,
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: defaults::LOG_AUTO_CLEANUP,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::RETRY_MAX_RETRIES,
            base_delay_secs: defaults::RETRY_BASE_DELAY_SECS,
            batch_limit: defaults::RETRY_BATCH_LIMIT,
            cleanup_after_days: defaults::RETRY_CLEANUP_AFTER_DAYS,
        }
    }
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::HANDLER_MAX_RETRIES,
            base_delay_ms: defaults::HANDLER_BASE_DELAY_MS,
            max_delay_ms: defaults::HANDLER_MAX_DELAY_MS,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: defaults::POOL_WORKER_COUNT,
            max_workers: defaults::POOL_MAX_WORKERS,
            buffer_size: defaults::POOL_BUFFER_SIZE,
            scale_threshold: defaults::POOL_SCALE_THRESHOLD,
            scale_interval_ms: defaults::POOL_SCALE_INTERVAL_MS,
            task_timeout_seconds: defaults::POOL_TASK_TIMEOUT_SECONDS,
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(defaults::APP_DIR_NAME);

        Ok(config_dir)
    }

    /// Config manager rooted at the per-user config directory
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self {
            config_path: config_dir.join(defaults::CONFIG_FILE_NAME),
        })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { config_path: path.into() }
    }

    /// Load configuration, creating the default file on first run
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("🎉 Configuration file not found, creating default: {:?}", self.config_path);
            self.save_config(&AppConfig::default()).await?;
        }

        let config = Self::layered(&self.config_path)?;
        config.validate().context("Invalid configuration")?;
        info!("Loaded configuration from: {:?}", self.config_path);
        Ok(config)
    }

    /// Defaults, then the file, then `HOCKEY__*` environment overrides
    fn layered(path: &Path) -> Result<AppConfig> {
        let defaults = config::Config::try_from(&AppConfig::default())
            .context("Failed to serialize default configuration")?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("HOCKEY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        settings
            .try_deserialize::<AppConfig>()
            .context("Failed to parse configuration")
    }

    /// Save configuration to file
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Get the configuration file path
    pub const fn config_path(&self) -> &PathBuf {
        &self.config_path
    }
}

/// Default crawling configuration values
pub mod defaults {
    pub const APP_DIR_NAME: &str = "hockey-stats-crawler";
    pub const CONFIG_FILE_NAME: &str = "config.json";

    pub const DATABASE_URL: &str = "sqlite:data/hockey_stats.db";
    pub const DB_MAX_CONNECTIONS: u32 = 10;

    /// Realistic desktop browser; the portals serve stripped pages to bots
    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

    pub const FHSPB_REQUEST_DELAY_MS: u64 = 1500;
    pub const MIHF_REQUEST_DELAY_MS: u64 = 1000;
    pub const JUNIOR_REQUEST_DELAY_MS: u64 = 500;
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const FETCH_MAX_ATTEMPTS: u32 = 3;
    pub const FETCH_BACKOFF_BASE_MS: u64 = 1000;

    pub const SEASON_WORKERS: usize = 3;
    pub const GROUP_WORKERS: usize = 2;
    pub const TOURNAMENT_WORKERS: usize = 3;
    pub const SUB_TOURNAMENT_WORKERS: usize = 2;
    pub const TEAM_WORKERS: usize = 5;
    pub const PLAYER_WORKERS: usize = 10;

    pub const RETRY_MAX_RETRIES: u32 = 5;
    pub const RETRY_BASE_DELAY_SECS: u64 = 300;
    pub const RETRY_BATCH_LIMIT: u32 = 50;
    pub const RETRY_CLEANUP_AFTER_DAYS: u32 = 30;

    pub const HANDLER_MAX_RETRIES: u32 = 3;
    pub const HANDLER_BASE_DELAY_MS: u64 = 500;
    pub const HANDLER_MAX_DELAY_MS: u64 = 30_000;

    pub const POOL_WORKER_COUNT: usize = 4;
    pub const POOL_MAX_WORKERS: usize = 16;
    pub const POOL_BUFFER_SIZE: usize = 100;
    pub const POOL_SCALE_THRESHOLD: f64 = 0.8;
    pub const POOL_SCALE_INTERVAL_MS: u64 = 5000;
    pub const POOL_TASK_TIMEOUT_SECONDS: u64 = 120;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = false;
    pub const LOG_CONSOLE_OUTPUT: bool = true;
    pub const LOG_FILE_OUTPUT: bool = true;
    pub const LOG_FILE_NAME: &str = "hockey-stats-crawler.log";
    pub const LOG_MAX_FILES: u32 = 10;
    pub const LOG_AUTO_CLEANUP: bool = true;
}
