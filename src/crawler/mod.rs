//! Crawl driver for multi-site asset searches
//!
//! This module wires the resilience services into a running search:
//! - HTTP fetching through optional egress proxies
//! - Pacing, outcome reporting and recovery per site
//! - Bounded-concurrency fan-out over the configured sites
//! - Background health and proxy tickers

mod coordinator;
mod extract;
mod fetcher;
mod services;
mod task;

pub use coordinator::{CancelHandle, Coordinator, JobSummary};
pub use extract::{PageExtractor, ResultExtractor, SearchHit};
pub use fetcher::{
    build_http_client, parse_retry_after, FetchRequest, FetchResult, FetchedPage, Fetcher,
    ReqwestFetcher,
};
pub use services::Services;
pub use task::{CrawlSettings, SiteOutcome, SiteStatus, SiteTask, FALLBACK_RULES};

use crate::config::Config;
use crate::HuntError;

/// Runs a single search with the production services
///
/// This is the main entry point for a one-shot search. It will:
/// 1. Build the services from the configuration
/// 2. Start the health and proxy tickers
/// 3. Search every enabled site
/// 4. Stop the tickers and return the summary
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `query` - The asset search text
///
/// # Returns
///
/// * `Ok(JobSummary)` - Per-site outcomes
/// * `Err(HuntError)` - The services could not be built
pub async fn search(config: &Config, query: &str) -> Result<JobSummary, HuntError> {
    let services = Services::from_config(config)?;
    let coordinator = Coordinator::new(config, services);
    let tickers = coordinator.start_background();
    let summary = coordinator.search(query).await;
    for ticker in tickers {
        ticker.stop().await;
    }
    summary
}
