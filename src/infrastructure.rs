//! Infrastructure layer: HTTP, SQLite, configuration and logging
//!
//! Implements the seams the domain and the crawl engine depend on.

pub mod backoff;
pub mod config;
pub mod database_connection;
pub mod html_extract;
pub mod http_client;
pub mod logging;
pub mod repositories;
pub mod retry_manager;

pub use config::{AppConfig, ConfigManager, SourceConfig};
pub use database_connection::DatabaseConnection;
pub use http_client::{FetchClient, PageFetcher};
pub use logging::{get_log_directory, init_logging_with_config};
pub use retry_manager::RetryManager;
