//! Failure recovery
//!
//! Maps a classified crawl failure onto a remediation strategy, runs it, and
//! tells the crawl task what to do next. Strategies are tried in priority
//! order, each at most once per failure chain, under a hard ceiling on the
//! number of attempts.
//!
//! # Built-in strategies
//!
//! | Priority | Name | Handles | Effect |
//! |----------|------|---------|--------|
//! | 1 | `network_retry` | network, timeout, refused, DNS | exponential backoff |
//! | 2 | `proxy_switch` | blocked, banned, rate limited | next proxy from the pool |
//! | 3 | `rate_adjustment` | rate limited, blocked | slows the site's policy |
//! | 4 | `rule_repair` | selector, parse, invalid content | fallback extraction rules |
//! | 5 | `restart_resource` | crash, out of memory | recycle the fetcher |
//! | 6 | `graceful_degradation` | everything | skip the site |

mod orchestrator;
mod stats;
mod strategy;

use std::time::Duration;

use crate::limiter::RateLimitPolicy;
use crate::proxy::ProxyRecord;
use crate::state::CrawlingError;

pub use orchestrator::{RecoveryOrchestrator, DEFAULT_MAX_RECOVERY_ATTEMPTS};
pub use stats::{RecoveryAttemptRecord, RecoveryStats, StrategyStats};
pub use strategy::{
    builtin_strategies, GracefulDegradation, NetworkRetry, ProxySwitch, RateAdjustment,
    RecoveryEnv, RecoveryStrategy, RestartResource, RuleRepair,
};

/// Strategy name reported when no strategy applies
pub const NO_STRATEGY_AVAILABLE: &str = "no_strategy_available";

/// Strategy name reported when the attempt ceiling was hit
pub const MAX_ATTEMPTS_EXCEEDED: &str = "max_attempts_exceeded";

/// Errors remembered per failure chain
const MAX_ERROR_HISTORY: usize = 10;

/// State of one failure chain, owned by the crawl task
#[derive(Debug, Clone, Default)]
pub struct RecoveryAttemptContext {
    pub site_id: String,

    /// Extraction rule set in use, if the caller has several
    pub rule_id: Option<String>,

    /// Recovery attempts made so far in this chain
    pub retry_count: u32,

    /// Strategies already tried, in order
    pub previous_strategies: Vec<String>,

    /// Most recent errors, oldest first
    pub error_history: Vec<CrawlingError>,
}

impl RecoveryAttemptContext {
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            ..Default::default()
        }
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    pub fn has_tried(&self, strategy: &str) -> bool {
        self.previous_strategies.iter().any(|s| s == strategy)
    }

    /// Advances the chain after a strategy ran
    pub(crate) fn advance(&mut self, strategy: &str, error: &CrawlingError) {
        self.retry_count += 1;
        self.previous_strategies.push(strategy.to_string());
        self.error_history.push(error.clone());
        if self.error_history.len() > MAX_ERROR_HISTORY {
            self.error_history.remove(0);
        }
    }
}

/// What the crawl task should do after a recovery attempt
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// Try the same request again after the delay
    Retry,

    /// Retry through another egress; `None` means go direct
    SwitchProxy(Option<ProxyRecord>),

    /// Retry with the fallback extraction rules
    UseFallbackRules,

    /// Recycle the execution resource, then retry
    RestartResource,

    /// Give up on this site for the current job
    SkipSite,

    /// Stop recovering; the failure stands
    Abort,
}

/// Outcome of one recovery attempt
#[derive(Debug, Clone)]
pub struct RecoveryResult {
    /// Whether the strategy did what it set out to do
    pub success: bool,

    /// Name of the strategy that ran, or an exhaustion marker
    pub strategy: String,

    pub message: String,

    /// Whether the caller should try the request again
    pub should_retry: bool,

    /// How long the caller should wait before acting
    pub delay: Option<Duration>,

    /// Policy change applied to the site, if any
    pub config_patch: Option<RateLimitPolicy>,

    pub action: RecoveryAction,
}

impl RecoveryResult {
    /// A successful strategy asking for a retry
    pub fn retry(strategy: &str, message: impl Into<String>, action: RecoveryAction) -> Self {
        Self {
            success: true,
            strategy: strategy.to_string(),
            message: message.into(),
            should_retry: true,
            delay: None,
            config_patch: None,
            action,
        }
    }

    /// A strategy that could not do its job
    pub fn failed(strategy: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            strategy: strategy.to_string(),
            message: message.into(),
            should_retry: false,
            delay: None,
            config_patch: None,
            action: RecoveryAction::Abort,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_patch(mut self, policy: RateLimitPolicy) -> Self {
        self.config_patch = Some(policy);
        self
    }

    /// True once no further recovery is possible for this chain
    pub fn is_exhausted(&self) -> bool {
        self.strategy == NO_STRATEGY_AVAILABLE || self.strategy == MAX_ATTEMPTS_EXCEEDED
    }

    /// True if a failed strategy left room for the next one
    pub fn can_continue(&self) -> bool {
        !self.success && !self.is_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FailureKind;

    #[test]
    fn test_context_advance_caps_history() {
        let mut context = RecoveryAttemptContext::new("thingiverse").with_rule("default");
        let error = CrawlingError::new(FailureKind::Timeout, "timed out");

        for _ in 0..(MAX_ERROR_HISTORY + 3) {
            context.advance("network_retry", &error);
        }

        assert_eq!(context.retry_count, MAX_ERROR_HISTORY as u32 + 3);
        assert_eq!(context.error_history.len(), MAX_ERROR_HISTORY);
        assert!(context.has_tried("network_retry"));
        assert!(!context.has_tried("proxy_switch"));
        assert_eq!(context.rule_id.as_deref(), Some("default"));
    }

    #[test]
    fn test_result_markers() {
        let exhausted = RecoveryResult::failed(NO_STRATEGY_AVAILABLE, "nothing left");
        assert!(exhausted.is_exhausted());
        assert!(!exhausted.can_continue());

        let failed = RecoveryResult::failed("proxy_switch", "no proxy");
        assert!(!failed.is_exhausted());
        assert!(failed.can_continue());

        let ok = RecoveryResult::retry("network_retry", "backing off", RecoveryAction::Retry)
            .with_delay(Duration::from_secs(2));
        assert!(ok.should_retry);
        assert!(!ok.can_continue());
        assert_eq!(ok.delay, Some(Duration::from_secs(2)));
    }
}
