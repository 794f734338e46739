//! Crawler module: the engine proper
//!
//! This module contains the core run logic, including:
//! - Adaptive rate control shared by all workers
//! - A bounded-concurrency worker pool with per-item isolation
//! - Batch scheduling with bounded retry
//! - Overall run orchestration, checkpointing and resumption

mod orchestrator;
mod pool;
mod rate;
mod scheduler;

pub use orchestrator::{
    CrawlFailure, CrawlOrchestrator, Phase, RunOutcome, RunSummary, Termination,
};
pub use pool::WorkerPool;
pub use rate::{RateController, RatePolicy, ThrottleSignal};
pub use scheduler::{Batch, BatchReport, BatchScheduler};

use crate::config::Config;
use crate::sources::{build_http_client, HttpDownloader, UrlListLister};
use crate::EngineError;

/// Builds an orchestrator for a URL-list run described by a config file
///
/// The lister reads `source.url-list`, the downloader writes into
/// `output.content-dir`, and state lives in `output.state-dir`.
///
/// # Returns
///
/// * `Ok(CrawlOrchestrator)` - Ready to run
/// * `Err(EngineError)` - Invalid engine settings or the HTTP client could not be built
pub fn url_list_orchestrator(
    config: &Config,
) -> Result<CrawlOrchestrator<UrlListLister, HttpDownloader>, EngineError> {
    let client = build_http_client(&config.user_agent, config.engine.item_timeout())?;
    let lister = UrlListLister::new(&config.source.url_list);
    let downloader = HttpDownloader::new(client, &config.output.content_dir);

    CrawlOrchestrator::new(
        config.engine.clone(),
        &config.output.state_dir,
        lister,
        downloader,
    )
}
