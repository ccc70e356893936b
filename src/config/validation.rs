use std::collections::HashSet;

use crate::config::types::{
    Config, CrawlerConfig, HealthConfig, ProxyConfig, SiteConfig, UserAgentConfig, CONFIG_VERSION,
    QUERY_PLACEHOLDER,
};
use crate::limiter::{AdaptiveTuning, RateLimitPolicy};
use crate::proxy::ProxyRecord;
use crate::ConfigError;
use url::Url;

/// Largest accepted `requests-per-hour`; the limiter keeps one timestamp per
/// granted request for an hour
pub const MAX_REQUESTS_PER_HOUR: u32 = 1_000_000;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion {
            found: config.version,
            expected: CONFIG_VERSION,
        });
    }

    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_policy("rate-limit", &config.rate_limit.defaults)?;
    validate_tuning(&config.rate_limit.adaptive)?;
    validate_sites(config)?;
    validate_proxy_config(&config.proxy)?;
    validate_health_config(&config.health)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_tasks < 1 || config.max_concurrent_tasks > 20 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-tasks must be between 1 and 20, got {}",
            config.max_concurrent_tasks
        )));
    }

    if config.request_timeout < 100 {
        return Err(ConfigError::Validation(format!(
            "request-timeout must be >= 100ms, got {}ms",
            config.request_timeout
        )));
    }

    if config.max_recovery_attempts < 1 {
        return Err(ConfigError::Validation(
            "max-recovery-attempts must be >= 1".to_string(),
        ));
    }

    if config.max_attempts_per_site < 1 {
        return Err(ConfigError::Validation(format!(
            "max-attempts-per-site must be >= 1, got {}",
            config.max_attempts_per_site
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates a pacing policy; `origin` names where it came from
fn validate_policy(origin: &str, policy: &RateLimitPolicy) -> Result<(), ConfigError> {
    if !policy.requests_per_second.is_finite() || policy.requests_per_second <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "{}: requests-per-second must be a positive number, got {}",
            origin, policy.requests_per_second
        )));
    }

    if policy.requests_per_minute < 1 || policy.requests_per_hour < 1 {
        return Err(ConfigError::Validation(format!(
            "{}: requests-per-minute and requests-per-hour must be >= 1",
            origin
        )));
    }

    if policy.requests_per_hour > MAX_REQUESTS_PER_HOUR {
        return Err(ConfigError::Validation(format!(
            "{}: requests-per-hour must be <= {}, got {}",
            origin, MAX_REQUESTS_PER_HOUR, policy.requests_per_hour
        )));
    }

    if policy.requests_per_hour < policy.requests_per_minute {
        return Err(ConfigError::Validation(format!(
            "{}: requests-per-hour ({}) is below requests-per-minute ({})",
            origin, policy.requests_per_hour, policy.requests_per_minute
        )));
    }

    if policy.burst_allowance < 1 {
        return Err(ConfigError::Validation(format!(
            "{}: burst-allowance must be >= 1",
            origin
        )));
    }

    Ok(())
}

/// Validates adaptive pacing knobs
fn validate_tuning(tuning: &AdaptiveTuning) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&tuning.success_decay) {
        return Err(ConfigError::Validation(format!(
            "rate-limit.adaptive: success-decay must be within 0..=1, got {}",
            tuning.success_decay
        )));
    }

    if tuning.max_delay_ms.is_nan() || tuning.max_delay_ms <= 0.0 {
        return Err(ConfigError::Validation(
            "rate-limit.adaptive: max-delay-ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates site entries and their overrides
fn validate_sites(config: &Config) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for site in &config.sites {
        validate_site(site)?;

        if !seen.insert(site.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate site id '{}'",
                site.id
            )));
        }

        let origin = format!("site '{}'", site.id);
        validate_policy(&origin, &config.policy_for_site(site))?;
    }

    Ok(())
}

fn validate_site(site: &SiteConfig) -> Result<(), ConfigError> {
    if site.id.is_empty() {
        return Err(ConfigError::Validation("Site id cannot be empty".to_string()));
    }

    if !site
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "Site id '{}' must contain only ASCII letters, digits, '-' and '_'",
            site.id
        )));
    }

    if !site.search_url.contains(QUERY_PLACEHOLDER) {
        return Err(ConfigError::Validation(format!(
            "Site '{}' search-url must contain {}",
            site.id, QUERY_PLACEHOLDER
        )));
    }

    let url = site.search_url_for("probe").map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid search-url for site '{}': {}", site.id, e))
    })?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::Validation(format!(
            "Site '{}' search-url must use http or https",
            site.id
        )));
    }

    Ok(())
}

/// Validates proxy configuration
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    for entry in &config.list {
        ProxyRecord::parse(entry)?;
    }

    Url::parse(&config.check_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy check-url: {}", e)))?;

    if config.check_interval < 1000 {
        return Err(ConfigError::Validation(format!(
            "proxy check-interval must be >= 1000ms, got {}ms",
            config.check_interval
        )));
    }

    if config.probe_timeout < 100 {
        return Err(ConfigError::Validation(format!(
            "proxy probe-timeout must be >= 100ms, got {}ms",
            config.probe_timeout
        )));
    }

    if config.max_concurrent_probes < 1 {
        return Err(ConfigError::Validation(
            "proxy max-concurrent-probes must be >= 1".to_string(),
        ));
    }

    if config.enabled && config.list.is_empty() {
        return Err(ConfigError::Validation(
            "proxy is enabled but the list is empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates health thresholds
fn validate_health_config(config: &HealthConfig) -> Result<(), ConfigError> {
    if config.check_interval < 1000 {
        return Err(ConfigError::Validation(format!(
            "health check-interval must be >= 1000ms, got {}ms",
            config.check_interval
        )));
    }

    let t = &config.thresholds;
    let ascending = [
        ("usage", t.usage_warning_percent, t.usage_critical_percent),
        ("response", t.response_warning_ms, t.response_critical_ms),
        ("error-rate", t.error_rate_warning, t.error_rate_critical),
    ];
    for (name, warning, critical) in ascending {
        if warning >= critical {
            return Err(ConfigError::Validation(format!(
                "health {} warning threshold ({}) must be below critical ({})",
                name, warning, critical
            )));
        }
    }

    // Hit rates degrade downwards
    if t.cache_hit_warning <= t.cache_hit_critical {
        return Err(ConfigError::Validation(format!(
            "health cache-hit warning threshold ({}) must be above critical ({})",
            t.cache_hit_warning, t.cache_hit_critical
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact-email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::RateLimitOverride;

    fn site(id: &str, search_url: &str) -> SiteConfig {
        SiteConfig {
            id: id.to_string(),
            name: None,
            search_url: search_url.to_string(),
            rate_limit: None,
            enabled: true,
        }
    }

    #[test]
    fn test_validate_site() {
        assert!(validate_site(&site("thingiverse", "https://www.thingiverse.com/search?q={query}")).is_ok());
        assert!(validate_site(&site("cults_3d", "http://cults3d.com/en/search?q={query}")).is_ok());

        assert!(validate_site(&site("", "https://a.com/?q={query}")).is_err());
        assert!(validate_site(&site("bad id", "https://a.com/?q={query}")).is_err());
        assert!(validate_site(&site("noquery", "https://a.com/search")).is_err());
        assert!(validate_site(&site("ftp", "ftp://a.com/{query}")).is_err());
        assert!(validate_site(&site("relative", "/search?q={query}")).is_err());
    }

    #[test]
    fn test_validate_policy() {
        assert!(validate_policy("test", &RateLimitPolicy::default()).is_ok());

        let zero_rps = RateLimitPolicy {
            requests_per_second: 0.0,
            ..Default::default()
        };
        assert!(validate_policy("test", &zero_rps).is_err());

        let inverted = RateLimitPolicy {
            requests_per_minute: 100,
            requests_per_hour: 50,
            ..Default::default()
        };
        assert!(validate_policy("test", &inverted).is_err());

        let no_burst = RateLimitPolicy {
            burst_allowance: 0,
            ..Default::default()
        };
        assert!(validate_policy("test", &no_burst).is_err());

        let busy = RateLimitPolicy {
            requests_per_minute: 1000,
            requests_per_hour: MAX_REQUESTS_PER_HOUR,
            ..Default::default()
        };
        assert!(validate_policy("test", &busy).is_ok());

        let too_busy = RateLimitPolicy {
            requests_per_hour: MAX_REQUESTS_PER_HOUR + 1,
            ..busy
        };
        assert!(validate_policy("test", &too_busy).is_err());
    }

    #[test]
    fn test_site_override_is_validated_after_merge() {
        let mut s = site("myminifactory", "https://www.myminifactory.com/search/?query={query}");
        s.rate_limit = Some(RateLimitOverride {
            requests_per_second: Some(-1.0),
            ..Default::default()
        });
        let policy = s
            .rate_limit
            .as_ref()
            .map(|o| o.merge_onto(&RateLimitPolicy::default()))
            .unwrap();
        let err = validate_policy("site 'myminifactory'", &policy).unwrap_err();
        assert!(err.to_string().contains("myminifactory"));
    }

    #[test]
    fn test_validate_proxy_config() {
        let mut config = ProxyConfig::default();
        assert!(validate_proxy_config(&config).is_ok());

        config.enabled = true;
        assert!(validate_proxy_config(&config).is_err());

        config.list = vec!["http://10.0.0.1:8080".to_string()];
        assert!(validate_proxy_config(&config).is_ok());

        config.list.push("gopher://10.0.0.2:70".to_string());
        assert!(matches!(
            validate_proxy_config(&config),
            Err(ConfigError::InvalidProxy(_))
        ));
    }

    #[test]
    fn test_validate_health_thresholds() {
        let mut config = HealthConfig::default();
        assert!(validate_health_config(&config).is_ok());

        config.thresholds.error_rate_warning = 0.5;
        assert!(validate_health_config(&config).is_err());

        let mut config = HealthConfig::default();
        config.thresholds.cache_hit_warning = 0.3;
        assert!(validate_health_config(&config).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("admin@sub.example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }
}
