//! Hockey Stats Crawler
//!
//! Rate-limited, resumable ingestion of player, team, tournament, match and
//! statistics data from regional hockey stat portals into one SQLite schema.

pub mod cli;
pub mod crawling;
pub mod domain;
pub mod infrastructure;

pub use cli::run;
