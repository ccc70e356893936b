use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::health::HealthThresholds;
use crate::limiter::{AdaptiveTuning, RateLimitPolicy};

/// Config file format version understood by this build
pub const CONFIG_VERSION: u32 = 1;

/// Placeholder replaced by the encoded query in a site's search URL
pub const QUERY_PLACEHOLDER: &str = "{query}";

/// Main configuration structure for Meshhunt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// File format version; must equal `CONFIG_VERSION`
    pub version: u32,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,

    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,

    #[serde(rename = "site", default)]
    pub sites: Vec<SiteConfig>,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

impl Config {
    /// Looks up a configured site by id
    pub fn site(&self, id: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.id == id)
    }

    /// Sites that take part in searches
    pub fn enabled_sites(&self) -> impl Iterator<Item = &SiteConfig> {
        self.sites.iter().filter(|s| s.enabled)
    }

    /// Effective pacing policy for a site: global defaults plus its override
    pub fn policy_for_site(&self, site: &SiteConfig) -> RateLimitPolicy {
        match &site.rate_limit {
            Some(over) => over.merge_onto(&self.rate_limit.defaults),
            None => self.rate_limit.defaults.clone(),
        }
    }
}

/// Crawl driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of site tasks running at once
    #[serde(rename = "max-concurrent-tasks", default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,

    /// Per-request timeout (milliseconds)
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Recovery attempts allowed per failure chain
    #[serde(rename = "max-recovery-attempts", default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Fetch attempts allowed per site per search
    #[serde(rename = "max-attempts-per-site", default = "default_max_attempts_per_site")]
    pub max_attempts_per_site: u32,
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            request_timeout: default_request_timeout(),
            max_recovery_attempts: default_max_recovery_attempts(),
            max_attempts_per_site: default_max_attempts_per_site(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Renders the `User-Agent` header value
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Global pacing defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Policy applied to sites without an override
    #[serde(flatten)]
    pub defaults: RateLimitPolicy,

    /// Adaptive pacing knobs
    #[serde(default)]
    pub adaptive: AdaptiveTuning,
}

/// Partial rate limit policy given on a single site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitOverride {
    pub requests_per_second: Option<f64>,
    pub requests_per_minute: Option<u32>,
    pub requests_per_hour: Option<u32>,
    pub burst_allowance: Option<u32>,
    pub adaptive_delay: Option<bool>,
    pub respect_retry_after: Option<bool>,
}

impl RateLimitOverride {
    /// Applies the fields set here on top of `base`
    pub fn merge_onto(&self, base: &RateLimitPolicy) -> RateLimitPolicy {
        RateLimitPolicy {
            requests_per_second: self.requests_per_second.unwrap_or(base.requests_per_second),
            requests_per_minute: self.requests_per_minute.unwrap_or(base.requests_per_minute),
            requests_per_hour: self.requests_per_hour.unwrap_or(base.requests_per_hour),
            burst_allowance: self.burst_allowance.unwrap_or(base.burst_allowance),
            adaptive_delay: self.adaptive_delay.unwrap_or(base.adaptive_delay),
            respect_retry_after: self.respect_retry_after.unwrap_or(base.respect_retry_after),
        }
    }
}

/// One searchable asset site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Stable identifier used for pacing, metrics and logs
    pub id: String,

    /// Display name; defaults to the id
    #[serde(default)]
    pub name: Option<String>,

    /// Search URL template containing `{query}`
    #[serde(rename = "search-url")]
    pub search_url: String,

    #[serde(rename = "rate-limit", default)]
    pub rate_limit: Option<RateLimitOverride>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SiteConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Builds the search URL for `query`, form-encoding the query text
    pub fn search_url_for(&self, query: &str) -> Result<Url, url::ParseError> {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        Url::parse(&self.search_url.replace(QUERY_PLACEHOLDER, &encoded))
    }
}

/// Egress proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Connection strings (`protocol://[user:pass@]host:port`)
    #[serde(default)]
    pub list: Vec<String>,

    /// URL fetched through each proxy by the health probe
    #[serde(rename = "check-url", default = "default_check_url")]
    pub check_url: String,

    /// Time between probe sweeps (milliseconds)
    #[serde(rename = "check-interval", default = "default_proxy_check_interval")]
    pub check_interval: u64,

    /// Upper bound on a single probe (milliseconds)
    #[serde(rename = "probe-timeout", default = "default_probe_timeout")]
    pub probe_timeout: u64,

    #[serde(rename = "max-concurrent-probes", default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: u32,
}

impl ProxyConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            list: Vec::new(),
            check_url: default_check_url(),
            check_interval: default_proxy_check_interval(),
            probe_timeout: default_probe_timeout(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

/// Health aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Time between health snapshots (milliseconds)
    #[serde(rename = "check-interval", default = "default_health_check_interval")]
    pub check_interval: u64,

    #[serde(flatten)]
    pub thresholds: HealthThresholds,
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: default_health_check_interval(),
            thresholds: HealthThresholds::default(),
        }
    }
}

fn default_max_concurrent_tasks() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_max_attempts_per_site() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_check_url() -> String {
    "https://httpbin.org/ip".to_string()
}

fn default_proxy_check_interval() -> u64 {
    300_000
}

fn default_probe_timeout() -> u64 {
    10_000
}

fn default_max_concurrent_probes() -> u32 {
    10
}

fn default_health_check_interval() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(search_url: &str) -> SiteConfig {
        SiteConfig {
            id: "printables".to_string(),
            name: None,
            search_url: search_url.to_string(),
            rate_limit: None,
            enabled: true,
        }
    }

    #[test]
    fn test_merge_onto_only_touches_set_fields() {
        let base = RateLimitPolicy::default();
        let over = RateLimitOverride {
            requests_per_second: Some(0.5),
            burst_allowance: Some(2),
            ..Default::default()
        };

        let merged = over.merge_onto(&base);
        assert_eq!(merged.requests_per_second, 0.5);
        assert_eq!(merged.burst_allowance, 2);
        assert_eq!(merged.requests_per_minute, base.requests_per_minute);
        assert_eq!(merged.requests_per_hour, base.requests_per_hour);
        assert!(merged.adaptive_delay);
    }

    #[test]
    fn test_empty_override_is_identity() {
        let base = RateLimitPolicy::default();
        assert_eq!(RateLimitOverride::default().merge_onto(&base), base);
    }

    #[test]
    fn test_search_url_for_encodes_query() {
        let url = site("https://www.printables.com/search/models?q={query}")
            .search_url_for("benchy boat & hull")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.printables.com/search/models?q=benchy+boat+%26+hull"
        );
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let mut s = site("https://example.com/?q={query}");
        assert_eq!(s.display_name(), "printables");
        s.name = Some("Printables".to_string());
        assert_eq!(s.display_name(), "Printables");
    }

    #[test]
    fn test_user_agent_header_value() {
        let ua = UserAgentConfig {
            crawler_name: "MeshHunt".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/bot".to_string(),
            contact_email: "bot@example.com".to_string(),
        };
        assert_eq!(
            ua.header_value(),
            "MeshHunt/1.0 (+https://example.com/bot; bot@example.com)"
        );
    }
}
