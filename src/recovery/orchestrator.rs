use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::health::{ErrorEvent, HealthAggregator};
use crate::limiter::RateLimiter;
use crate::proxy::ProxyPool;
use crate::recovery::{
    builtin_strategies, RecoveryAttemptContext, RecoveryEnv, RecoveryResult, RecoveryStats,
    RecoveryStrategy, MAX_ATTEMPTS_EXCEEDED, NO_STRATEGY_AVAILABLE,
};
use crate::state::CrawlingError;
use crate::RecoveryError;

/// Attempts allowed per failure chain unless configured otherwise
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// Chooses and runs recovery strategies for failed crawl requests
///
/// Holds no per-chain state: the caller owns the `RecoveryAttemptContext`.
/// Cloning is cheap and every clone shares strategies and statistics.
#[derive(Clone)]
pub struct RecoveryOrchestrator {
    max_attempts: u32,
    env: RecoveryEnv,
    strategies: Arc<RwLock<Vec<Arc<dyn RecoveryStrategy>>>>,
    stats: Arc<Mutex<RecoveryStats>>,
    health: Option<HealthAggregator>,
}

impl RecoveryOrchestrator {
    /// Creates an orchestrator with the built-in strategies
    pub fn new(limiter: RateLimiter, proxies: ProxyPool) -> Self {
        let mut strategies = builtin_strategies();
        strategies.sort_by_key(|s| s.priority());
        Self {
            max_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            env: RecoveryEnv { limiter, proxies },
            strategies: Arc::new(RwLock::new(strategies)),
            stats: Arc::new(Mutex::new(RecoveryStats::default())),
            health: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Forwards every attempt to `health` as an error event
    pub fn with_health(mut self, health: HealthAggregator) -> Self {
        self.health = Some(health);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Adds a strategy, keeping the list ordered by priority
    ///
    /// A strategy with the same name replaces the existing one. Among equal
    /// priorities, earlier registrations run first.
    pub fn register_strategy(&self, strategy: Arc<dyn RecoveryStrategy>) {
        let mut strategies = self
            .strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        strategies.retain(|s| s.name() != strategy.name());
        let pos = strategies
            .iter()
            .position(|s| s.priority() > strategy.priority())
            .unwrap_or(strategies.len());
        debug!("Registered recovery strategy {} at priority {}", strategy.name(), strategy.priority());
        strategies.insert(pos, strategy);
    }

    /// Names of the registered strategies, in the order they are tried
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    fn lock_stats(&self) -> MutexGuard<'_, RecoveryStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the first eligible strategy for `error`
    ///
    /// Never fails. Once `context.retry_count` reaches the attempt ceiling the
    /// result is `max_attempts_exceeded`; when no strategy handles the
    /// failure, or all that do were tried or are capped, it is
    /// `no_strategy_available`. Both have `should_retry == false` and leave
    /// the context untouched. Otherwise the chosen strategy runs, an `Err`
    /// from it becomes a failed result, and the context records the attempt.
    pub fn attempt_recovery(
        &self,
        error: &CrawlingError,
        context: &mut RecoveryAttemptContext,
    ) -> RecoveryResult {
        let started = Instant::now();

        if context.retry_count >= self.max_attempts {
            let result = RecoveryResult::failed(
                MAX_ATTEMPTS_EXCEEDED,
                format!(
                    "{} recovery attempts made for {}",
                    context.retry_count, context.site_id
                ),
            );
            self.finish(error, context, &result, started);
            return result;
        }

        let Some(strategy) = self.select(error, context) else {
            let result = RecoveryResult::failed(
                NO_STRATEGY_AVAILABLE,
                format!("no untried strategy handles {}", error.kind),
            );
            self.finish(error, context, &result, started);
            return result;
        };

        debug!(
            "Recovering {} on {} with {} (attempt {})",
            error.kind,
            context.site_id,
            strategy.name(),
            context.retry_count + 1
        );

        let executed = panic::catch_unwind(AssertUnwindSafe(|| {
            strategy.execute(error, context, &self.env)
        }))
        .unwrap_or_else(|payload| {
            Err(RecoveryError::StrategyFailed {
                strategy: strategy.name().to_string(),
                reason: panic_reason(payload.as_ref()),
            })
        });

        let result = match executed {
            Ok(result) => result,
            Err(e) => {
                warn!("Recovery strategy {} failed: {}", strategy.name(), e);
                RecoveryResult::failed(strategy.name(), e.to_string())
            }
        };

        context.advance(strategy.name(), error);
        self.finish(error, context, &result, started);
        result
    }

    fn select(
        &self,
        error: &CrawlingError,
        context: &RecoveryAttemptContext,
    ) -> Option<Arc<dyn RecoveryStrategy>> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| {
                s.handles(error.kind)
                    && !context.has_tried(s.name())
                    && s.max_retries() > context.retry_count
            })
            .cloned()
    }

    fn finish(
        &self,
        error: &CrawlingError,
        context: &RecoveryAttemptContext,
        result: &RecoveryResult,
        started: Instant,
    ) {
        self.lock_stats().record(
            &context.site_id,
            error.kind,
            &result.strategy,
            result.success,
            result.is_exhausted(),
            started.elapsed(),
        );

        if result.is_exhausted() {
            info!("Giving up on {} for {}: {}", error.kind, context.site_id, result.message);
        }

        if let Some(health) = &self.health {
            health.record_error_event(ErrorEvent {
                timestamp: Utc::now(),
                site_id: context.site_id.clone(),
                kind: error.kind,
                severity: error.severity,
                message: error.message.clone(),
                strategy: result.strategy.clone(),
                recovered: result.success && result.should_retry,
            });
        }
    }

    /// A copy of the recovery statistics
    pub fn stats(&self) -> RecoveryStats {
        self.lock_stats().clone()
    }
}

/// Best-effort text of a panic payload
fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
