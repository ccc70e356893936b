//! Per-site search task
//!
//! One task searches one site: it waits for the rate limiter, picks an
//! egress proxy, fetches, reports the outcome everywhere it matters, and on
//! failure lets the recovery orchestrator decide what happens next.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{CrawlerConfig, SiteConfig};
use crate::crawler::{FetchRequest, FetchResult, SearchHit, Services};
use crate::metrics::TaskId;
use crate::proxy::ProxyRecord;
use crate::recovery::{RecoveryAction, RecoveryAttemptContext, RecoveryResult};
use crate::state::{CrawlingError, FailureKind};

/// Rule set name recorded once a task switches to fallback extraction
pub const FALLBACK_RULES: &str = "fallback";

/// Limits applied to every site task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSettings {
    pub request_timeout: Duration,

    /// Fetch attempts allowed per site per search
    pub max_attempts_per_site: u32,
}

impl From<&CrawlerConfig> for CrawlSettings {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            max_attempts_per_site: config.max_attempts_per_site,
        }
    }
}

/// How a site task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    /// Results were extracted
    Completed,

    /// Recovery gave the site up for this search
    Skipped,

    /// Attempts or recovery options ran out
    Failed,

    /// The search was cancelled
    Cancelled,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Completed => "completed",
            SiteStatus::Skipped => "skipped",
            SiteStatus::Failed => "failed",
            SiteStatus::Cancelled => "cancelled",
        }
    }
}

/// Result of searching one site
#[derive(Debug, Clone, Serialize)]
pub struct SiteOutcome {
    pub site_id: String,
    pub task: TaskId,
    pub status: SiteStatus,

    /// Fetch attempts made
    pub attempts: u32,

    pub hits: Vec<SearchHit>,

    /// Recovery strategies run, in order
    pub strategies: Vec<String>,

    pub last_error: Option<CrawlingError>,
    pub elapsed_ms: f64,
}

/// Searches a single site
pub struct SiteTask {
    services: Services,
    settings: CrawlSettings,
    site: SiteConfig,
    query: String,
    cancel: watch::Receiver<bool>,
}

impl SiteTask {
    pub fn new(
        services: Services,
        settings: CrawlSettings,
        site: SiteConfig,
        query: impl Into<String>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            services,
            settings,
            site,
            query: query.into(),
            cancel,
        }
    }

    /// Runs the task to completion; never fails
    pub async fn run(mut self) -> SiteOutcome {
        let started = Instant::now();
        let task = self.services.metrics.start_task(&self.site.id);
        let mut outcome = SiteOutcome {
            site_id: self.site.id.clone(),
            task,
            status: SiteStatus::Failed,
            attempts: 0,
            hits: Vec::new(),
            strategies: Vec::new(),
            last_error: None,
            elapsed_ms: 0.0,
        };

        outcome.status = self.drive(task, &mut outcome).await;
        outcome.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.services
            .metrics
            .finish_task(task, outcome.status == SiteStatus::Completed);

        match outcome.status {
            SiteStatus::Completed => info!(
                "{}: {} results after {} attempts",
                outcome.site_id,
                outcome.hits.len(),
                outcome.attempts
            ),
            SiteStatus::Cancelled => info!("{}: cancelled", outcome.site_id),
            status => warn!(
                "{}: {} after {} attempts ({})",
                outcome.site_id,
                status.as_str(),
                outcome.attempts,
                outcome
                    .last_error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default()
            ),
        }
        outcome
    }

    async fn drive(&mut self, task: TaskId, outcome: &mut SiteOutcome) -> SiteStatus {
        let url = match self.site.search_url_for(&self.query) {
            Ok(url) => url,
            Err(e) => {
                outcome.last_error = Some(CrawlingError::new(
                    FailureKind::Unknown,
                    format!("bad search URL: {}", e),
                ));
                return SiteStatus::Failed;
            }
        };

        let mut proxy = self.services.proxies.next();
        let mut use_fallback = false;
        let mut context = RecoveryAttemptContext::new(self.site.id.clone());

        while outcome.attempts < self.settings.max_attempts_per_site {
            if !self.pace().await {
                return SiteStatus::Cancelled;
            }

            outcome.attempts += 1;
            let request = FetchRequest {
                site_id: self.site.id.clone(),
                url: url.clone(),
                proxy: proxy.clone(),
                timeout: self.settings.request_timeout,
            };

            let fetch_started = Instant::now();
            let result = self.services.fetcher.fetch(&request).await;
            let latency = fetch_started.elapsed();
            self.report(task, &request, &result, latency);

            let error = match result.into_page() {
                Ok(page) => {
                    let parse_started = Instant::now();
                    let extracted = self
                        .services
                        .extractor
                        .extract(&self.site, &page, use_fallback);
                    self.services
                        .metrics
                        .record_parse(task, parse_started.elapsed(), extracted.is_ok());
                    match extracted {
                        Ok(hits) => {
                            self.services.metrics.record_results(task, hits.len() as u64);
                            outcome.hits = hits;
                            return SiteStatus::Completed;
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            debug!(
                "{}: attempt {} failed: {}",
                self.site.id, outcome.attempts, error
            );
            let decision = self.recover(&error, &mut context);
            outcome.strategies = context.previous_strategies.clone();
            outcome.last_error = Some(error);

            if !decision.should_retry {
                return match decision.action {
                    RecoveryAction::SkipSite => SiteStatus::Skipped,
                    _ => SiteStatus::Failed,
                };
            }

            if let Some(delay) = decision.delay {
                if !sleep_unless_cancelled(&mut self.cancel, delay).await {
                    return SiteStatus::Cancelled;
                }
            }

            match decision.action {
                RecoveryAction::Retry => {}
                RecoveryAction::SwitchProxy(next) => {
                    debug!(
                        "{}: switching egress to {}",
                        self.site.id,
                        next.as_ref().map(ProxyRecord::id).unwrap_or_else(|| "direct".to_string())
                    );
                    proxy = next;
                }
                RecoveryAction::UseFallbackRules => {
                    use_fallback = true;
                    context.rule_id = Some(FALLBACK_RULES.to_string());
                }
                RecoveryAction::RestartResource => self.services.fetcher.recycle().await,
                RecoveryAction::SkipSite => return SiteStatus::Skipped,
                RecoveryAction::Abort => return SiteStatus::Failed,
            }
        }

        SiteStatus::Failed
    }

    /// Waits until the rate limiter lets a request through
    ///
    /// Returns false if the search was cancelled while waiting.
    async fn pace(&mut self) -> bool {
        loop {
            if *self.cancel.borrow() {
                return false;
            }
            let decision = self.services.limiter.can_proceed(&self.site.id);
            if decision.allowed {
                return true;
            }
            let wait = decision.wait.max(Duration::from_millis(1));
            if !sleep_unless_cancelled(&mut self.cancel, wait).await {
                return false;
            }
        }
    }

    /// Runs strategies until one succeeds or recovery is exhausted
    fn recover(&self, error: &CrawlingError, context: &mut RecoveryAttemptContext) -> RecoveryResult {
        loop {
            let result = self.services.recovery.attempt_recovery(error, context);
            if !result.can_continue() {
                return result;
            }
            debug!(
                "{}: {} did not help ({}), trying the next strategy",
                self.site.id, result.strategy, result.message
            );
        }
    }

    /// Feeds one fetch result to the limiter, the proxy pool and metrics
    fn report(&self, task: TaskId, request: &FetchRequest, result: &FetchResult, latency: Duration) {
        self.services
            .limiter
            .record(&self.site.id, result.outcome(latency));
        self.services
            .metrics
            .record_request(task, latency, result.is_success(), result.bytes());

        if let Some(proxy) = &request.proxy {
            let blame = proxy_blame(result);
            self.services
                .proxies
                .report(&proxy.id(), blame.is_none(), latency, blame.as_deref());
        }
    }
}

/// The failure to charge to the egress proxy, if any
///
/// Ordinary HTTP errors are the site's business; refusals and transport
/// failures count against the proxy.
fn proxy_blame(result: &FetchResult) -> Option<String> {
    match result {
        FetchResult::Success(_) => None,
        FetchResult::HttpError { status_code, .. } => match status_code {
            403 | 407 | 429 => Some(format!("HTTP {}", status_code)),
            _ => None,
        },
        FetchResult::NetworkError { error, .. } => Some(error.clone()),
    }
}

/// Sleeps for `wait` unless the cancel flag is raised first
///
/// Returns true if the full wait elapsed.
pub(crate) async fn sleep_unless_cancelled(cancel: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    if *cancel.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(wait);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow() => return false,
                Ok(()) => continue,
                Err(_) => {
                    // Sender gone; nobody can cancel any more
                    (&mut sleep).await;
                    return true;
                }
            },
        }
    }
}
