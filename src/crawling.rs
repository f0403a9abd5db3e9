//! Crawl engine
//!
//! Generic primitives (bounded stages, the adaptive pool, in-process retry,
//! postback pagination) and the per-source orchestrators built on them.

pub mod bounded_stage;
pub mod context;
pub mod dto;
pub mod error_handler;
pub mod pagination;
pub mod retry_runner;
pub mod sources;
pub mod summary;
pub mod worker_pool;

pub use bounded_stage::{StageCounters, StageReport, run_bounded_stage};
pub use context::CrawlContext;
pub use error_handler::ErrorHandler;
pub use pagination::{PostbackState, collect_pages};
pub use retry_runner::{RetryRunReport, RetryRunner};
pub use sources::{FhspbCrawler, JobReplayer, JuniorCrawler, MihfCrawler};
pub use summary::CrawlSummary;
pub use worker_pool::{AdaptivePool, PoolMetrics, PoolTask, TaskResult};
