use std::sync::Arc;
use std::time::Duration;

use crate::limiter::RateLimiter;
use crate::proxy::ProxyPool;
use crate::recovery::{RecoveryAction, RecoveryAttemptContext, RecoveryResult};
use crate::state::{CrawlingError, FailureClass, FailureKind};
use crate::RecoveryError;

/// Shared services a strategy may act on
#[derive(Debug, Clone)]
pub struct RecoveryEnv {
    pub limiter: RateLimiter,
    pub proxies: ProxyPool,
}

/// A named remediation for one or more failure kinds
///
/// `execute` should only adjust shared state and describe what the caller
/// must do; it never sleeps. Any `Err` it returns is reported to the caller
/// as a failed attempt.
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first
    fn priority(&self) -> u32;

    fn handles(&self, kind: FailureKind) -> bool;

    /// The strategy is only eligible while the chain's retry count is below this
    fn max_retries(&self) -> u32;

    fn execute(
        &self,
        error: &CrawlingError,
        context: &RecoveryAttemptContext,
        env: &RecoveryEnv,
    ) -> Result<RecoveryResult, RecoveryError>;
}

/// Retries transient network failures with exponential backoff
#[derive(Debug, Clone)]
pub struct NetworkRetry {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for NetworkRetry {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl NetworkRetry {
    /// `min(base * 2^retry_count, max)`
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl RecoveryStrategy for NetworkRetry {
    fn name(&self) -> &str {
        "network_retry"
    }

    fn priority(&self) -> u32 {
        1
    }

    fn handles(&self, kind: FailureKind) -> bool {
        kind.class() == FailureClass::TransientNetwork
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn execute(
        &self,
        error: &CrawlingError,
        context: &RecoveryAttemptContext,
        _env: &RecoveryEnv,
    ) -> Result<RecoveryResult, RecoveryError> {
        let delay = self.backoff(context.retry_count);
        Ok(RecoveryResult::retry(
            self.name(),
            format!("{} on {}, retrying in {:?}", error.kind, context.site_id, delay),
            RecoveryAction::Retry,
        )
        .with_delay(delay))
    }
}

/// Moves a blocked site onto another egress proxy
#[derive(Debug, Clone)]
pub struct ProxySwitch {
    pub settle_delay: Duration,
    pub max_retries: u32,
}

impl Default for ProxySwitch {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            max_retries: 2,
        }
    }
}

impl RecoveryStrategy for ProxySwitch {
    fn name(&self) -> &str {
        "proxy_switch"
    }

    fn priority(&self) -> u32 {
        2
    }

    fn handles(&self, kind: FailureKind) -> bool {
        matches!(
            kind,
            FailureKind::BlockedBySite | FailureKind::IpBanned | FailureKind::RateLimited
        )
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn execute(
        &self,
        _error: &CrawlingError,
        context: &RecoveryAttemptContext,
        env: &RecoveryEnv,
    ) -> Result<RecoveryResult, RecoveryError> {
        let proxy = env.proxies.next().ok_or(RecoveryError::NoProxyAvailable)?;
        Ok(RecoveryResult::retry(
            self.name(),
            format!("switching {} to proxy {}", context.site_id, proxy.id()),
            RecoveryAction::SwitchProxy(Some(proxy)),
        )
        .with_delay(self.settle_delay))
    }
}

/// Slows a site down after it pushed back
#[derive(Debug, Clone)]
pub struct RateAdjustment {
    /// Multiplier for requests per second
    pub rps_factor: f64,

    /// Multiplier for requests per minute
    pub rpm_factor: f64,

    pub settle_delay: Duration,
    pub max_retries: u32,
}

impl Default for RateAdjustment {
    fn default() -> Self {
        Self {
            rps_factor: 0.5,
            rpm_factor: 0.7,
            settle_delay: Duration::from_secs(5),
            max_retries: 2,
        }
    }
}

impl RecoveryStrategy for RateAdjustment {
    fn name(&self) -> &str {
        "rate_adjustment"
    }

    fn priority(&self) -> u32 {
        3
    }

    fn handles(&self, kind: FailureKind) -> bool {
        matches!(kind, FailureKind::RateLimited | FailureKind::BlockedBySite)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn execute(
        &self,
        _error: &CrawlingError,
        context: &RecoveryAttemptContext,
        env: &RecoveryEnv,
    ) -> Result<RecoveryResult, RecoveryError> {
        let policy = env
            .limiter
            .adjust_policy(&context.site_id, self.rps_factor, self.rpm_factor);
        Ok(RecoveryResult::retry(
            self.name(),
            format!(
                "{} slowed to {:.2} req/s, {} req/min",
                context.site_id, policy.requests_per_second, policy.requests_per_minute
            ),
            RecoveryAction::Retry,
        )
        .with_delay(self.settle_delay)
        .with_patch(policy))
    }
}

/// Switches extraction to the fallback rule set
#[derive(Debug, Clone)]
pub struct RuleRepair {
    pub max_retries: u32,
}

impl Default for RuleRepair {
    fn default() -> Self {
        Self { max_retries: 1 }
    }
}

impl RecoveryStrategy for RuleRepair {
    fn name(&self) -> &str {
        "rule_repair"
    }

    fn priority(&self) -> u32 {
        4
    }

    fn handles(&self, kind: FailureKind) -> bool {
        kind.class() == FailureClass::Structural
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn execute(
        &self,
        error: &CrawlingError,
        context: &RecoveryAttemptContext,
        _env: &RecoveryEnv,
    ) -> Result<RecoveryResult, RecoveryError> {
        let rules = context.rule_id.as_deref().unwrap_or("default");
        Ok(RecoveryResult::retry(
            self.name(),
            format!("{} with rules '{}', using fallback rules", error.kind, rules),
            RecoveryAction::UseFallbackRules,
        ))
    }
}

/// Recycles the execution resource after a crash
#[derive(Debug, Clone)]
pub struct RestartResource {
    pub settle_delay: Duration,
    pub max_retries: u32,
}

impl Default for RestartResource {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(10),
            max_retries: 1,
        }
    }
}

impl RecoveryStrategy for RestartResource {
    fn name(&self) -> &str {
        "restart_resource"
    }

    fn priority(&self) -> u32 {
        5
    }

    fn handles(&self, kind: FailureKind) -> bool {
        kind.class() == FailureClass::ResourceExhaustion
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn execute(
        &self,
        error: &CrawlingError,
        _context: &RecoveryAttemptContext,
        _env: &RecoveryEnv,
    ) -> Result<RecoveryResult, RecoveryError> {
        Ok(RecoveryResult::retry(
            self.name(),
            format!("{}, recycling resource", error.kind),
            RecoveryAction::RestartResource,
        )
        .with_delay(self.settle_delay))
    }
}

/// Gives up on the site for this job
///
/// Handles every kind and is never capped, so a chain always ends here
/// unless the attempt ceiling is reached first.
#[derive(Debug, Clone, Default)]
pub struct GracefulDegradation;

impl RecoveryStrategy for GracefulDegradation {
    fn name(&self) -> &str {
        "graceful_degradation"
    }

    fn priority(&self) -> u32 {
        6
    }

    fn handles(&self, _kind: FailureKind) -> bool {
        true
    }

    fn max_retries(&self) -> u32 {
        u32::MAX
    }

    fn execute(
        &self,
        error: &CrawlingError,
        context: &RecoveryAttemptContext,
        _env: &RecoveryEnv,
    ) -> Result<RecoveryResult, RecoveryError> {
        Ok(RecoveryResult {
            success: true,
            strategy: self.name().to_string(),
            message: format!("skipping {} for this search: {}", context.site_id, error.message),
            should_retry: false,
            delay: None,
            config_patch: None,
            action: RecoveryAction::SkipSite,
        })
    }
}

/// The six built-in strategies with default settings
pub fn builtin_strategies() -> Vec<Arc<dyn RecoveryStrategy>> {
    vec![
        Arc::new(NetworkRetry::default()),
        Arc::new(ProxySwitch::default()),
        Arc::new(RateAdjustment::default()),
        Arc::new(RuleRepair::default()),
        Arc::new(RestartResource::default()),
        Arc::new(GracefulDegradation),
    ]
}
