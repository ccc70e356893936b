//! Search coordinator - fans a query out over the configured sites
//!
//! This module runs one `SiteTask` per enabled site under a concurrency
//! bound, owns the cancel flag shared by those tasks, and starts the
//! background tickers (health snapshots, proxy probe sweeps).

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::config::{Config, SiteConfig};
use crate::crawler::{CrawlSettings, SiteOutcome, SiteStatus, SiteTask, Services};
use crate::proxy::ProbeSettings;
use crate::ticker::Ticker;
use crate::HuntError;

/// Summary of one search across all sites
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: f64,

    /// Sites the search was started on
    pub total_sites: usize,

    /// Per-site outcomes in configuration order
    pub outcomes: Vec<SiteOutcome>,
}

impl JobSummary {
    pub fn succeeded(&self) -> usize {
        self.count(SiteStatus::Completed)
    }

    pub fn count(&self, status: SiteStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn total_hits(&self) -> usize {
        self.outcomes.iter().map(|o| o.hits.len()).sum()
    }

    pub fn outcome(&self, site_id: &str) -> Option<&SiteOutcome> {
        self.outcomes.iter().find(|o| o.site_id == site_id)
    }

    /// One-line result, e.g. "2/3 sites succeeded"
    pub fn summary_line(&self) -> String {
        format!("{}/{} sites succeeded", self.succeeded(), self.total_sites)
    }
}

/// Raises the cancel flag of a coordinator from anywhere
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Main search coordinator structure
pub struct Coordinator {
    services: Services,
    settings: CrawlSettings,
    max_concurrent_tasks: usize,
    sites: Vec<SiteConfig>,
    health_interval: Duration,
    proxy_check_interval: Duration,
    probe_settings: ProbeSettings,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl Coordinator {
    /// Creates a coordinator for the enabled sites in `config`
    pub fn new(config: &Config, services: Services) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            services,
            settings: CrawlSettings::from(&config.crawler),
            max_concurrent_tasks: config.crawler.max_concurrent_tasks.max(1) as usize,
            sites: config.enabled_sites().cloned().collect(),
            health_interval: config.health.check_interval(),
            proxy_check_interval: config.proxy.check_interval(),
            probe_settings: Services::probe_settings(config),
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn sites(&self) -> &[SiteConfig] {
        &self.sites
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Stops every running site task at its next await point
    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    /// Starts the health ticker and, when there are proxies, the probe sweep
    ///
    /// The tickers run until stopped or dropped.
    pub fn start_background(&self) -> Vec<Ticker> {
        let mut tickers = vec![self.services.health.start(self.health_interval)];
        if !self.services.proxies.is_empty() {
            tickers.push(self.services.proxies.spawn_health_checks(
                self.services.probe.clone(),
                self.probe_settings,
                self.proxy_check_interval,
            ));
        }
        tickers
    }

    /// Searches every enabled site for `query`
    ///
    /// At most `max-concurrent-tasks` sites are searched at once. Per-site
    /// failures are reported in the summary, never as an error; the only
    /// error is being cancelled before the search started.
    pub async fn search(&self, query: &str) -> Result<JobSummary, HuntError> {
        if *self.cancel_tx.borrow() {
            return Err(HuntError::Cancelled);
        }

        let started_at = Utc::now();
        let started = Instant::now();
        tracing::info!(
            "Searching {} sites for '{}' ({} at a time)",
            self.sites.len(),
            query,
            self.max_concurrent_tasks
        );

        let permits = Arc::new(Semaphore::new(self.max_concurrent_tasks));
        let mut set = JoinSet::new();

        for (index, site) in self.sites.iter().cloned().enumerate() {
            let permits = permits.clone();
            let task = SiteTask::new(
                self.services.clone(),
                self.settings,
                site,
                query,
                self.cancel_tx.subscribe(),
            );
            set.spawn(async move {
                // The semaphore is never closed, so this only waits
                let _permit = permits.acquire_owned().await.ok();
                (index, task.run().await)
            });
        }

        let mut indexed = Vec::with_capacity(self.sites.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(e) => tracing::error!("Site task aborted: {}", e),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);

        let summary = JobSummary {
            query: query.to_string(),
            started_at,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
            total_sites: self.sites.len(),
            outcomes: indexed.into_iter().map(|(_, outcome)| outcome).collect(),
        };

        tracing::info!(
            "Search for '{}' done: {}, {} results",
            query,
            summary.summary_line(),
            summary.total_hits()
        );
        Ok(summary)
    }

    /// Searches a single configured site
    pub async fn search_site(&self, site_id: &str, query: &str) -> Result<SiteOutcome, HuntError> {
        let site = self
            .sites
            .iter()
            .find(|s| s.id == site_id)
            .cloned()
            .ok_or_else(|| HuntError::UnknownSite(site_id.to_string()))?;

        if *self.cancel_tx.borrow() {
            return Err(HuntError::Cancelled);
        }

        let task = SiteTask::new(
            self.services.clone(),
            self.settings,
            site,
            query,
            self.cancel_tx.subscribe(),
        );
        Ok(task.run().await)
    }
}
