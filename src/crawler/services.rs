use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::crawler::{Fetcher, PageExtractor, ReqwestFetcher, ResultExtractor};
use crate::health::{HealthAggregator, MeminfoProbe, ResourceProbe};
use crate::limiter::RateLimiter;
use crate::metrics::PerformanceRecorder;
use crate::proxy::{HttpProbe, ProbeSettings, ProxyPool, ProxyProbe};
use crate::recovery::RecoveryOrchestrator;

/// Every shared service a search needs, wired together
///
/// Built once per process from the configuration and handed to the
/// coordinator. Cloning is cheap; all clones share state.
#[derive(Clone)]
pub struct Services {
    pub limiter: RateLimiter,
    pub proxies: ProxyPool,
    pub metrics: PerformanceRecorder,
    pub health: HealthAggregator,
    pub recovery: RecoveryOrchestrator,
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn ResultExtractor>,
    pub probe: Arc<dyn ProxyProbe>,
}

impl Services {
    /// Builds the production services: reqwest fetcher, HTTP proxy probe and
    /// `/proc/meminfo` resource probe
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let fetcher = Arc::new(ReqwestFetcher::new(config.user_agent.clone())?);
        let probe = Arc::new(HttpProbe::new(
            config.proxy.check_url.clone(),
            config.proxy.probe_timeout(),
            config.user_agent.header_value(),
        ));
        Ok(Self::assemble(
            config,
            fetcher,
            Arc::new(PageExtractor),
            probe,
            Some(Arc::new(MeminfoProbe::default())),
        ))
    }

    /// Builds the services around caller-supplied collaborators
    pub fn with_collaborators(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn ResultExtractor>,
        probe: Arc<dyn ProxyProbe>,
    ) -> Self {
        Self::assemble(config, fetcher, extractor, probe, None)
    }

    fn assemble(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn ResultExtractor>,
        probe: Arc<dyn ProxyProbe>,
        resources: Option<Arc<dyn ResourceProbe>>,
    ) -> Self {
        let limiter = RateLimiter::with_defaults(
            config.rate_limit.defaults.clone(),
            config.rate_limit.adaptive.clone(),
        );
        for site in config.sites.iter().filter(|s| s.rate_limit.is_some()) {
            limiter.set_policy(&site.id, config.policy_for_site(site));
        }

        let proxies = ProxyPool::new();
        if config.proxy.enabled {
            proxies.import(&config.proxy.list);
        }

        let metrics = PerformanceRecorder::new();
        let mut health = HealthAggregator::new(
            config.health.thresholds.clone(),
            metrics.clone(),
            proxies.clone(),
        );
        if let Some(resources) = resources {
            health = health.with_resource_probe(resources);
        }
        let recovery = RecoveryOrchestrator::new(limiter.clone(), proxies.clone())
            .with_max_attempts(config.crawler.max_recovery_attempts)
            .with_health(health.clone());

        info!(
            "Services ready: {} sites, {} proxies, strategies [{}]",
            config.enabled_sites().count(),
            proxies.len(),
            recovery.strategy_names().join(", ")
        );

        Self {
            limiter,
            proxies,
            metrics,
            health,
            recovery,
            fetcher,
            extractor,
            probe,
        }
    }

    /// Probe limits taken from the proxy configuration
    pub fn probe_settings(config: &Config) -> ProbeSettings {
        ProbeSettings {
            timeout: config.proxy.probe_timeout(),
            max_concurrent: config.proxy.max_concurrent_probes.max(1) as usize,
        }
    }
}
