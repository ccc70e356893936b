//! Adaptive per-site rate limiter.
//!
//! Decides whether a request to a site may fire now or how long the caller
//! must wait, and adapts pacing from observed outcomes. The limiter never
//! sleeps and never fails: callers wait `RateDecision::wait` themselves,
//! outside of any lock, and ask again.

mod policy;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::state::{RequestOutcome, SiteRateState};

pub use policy::{AdaptiveTuning, RateLimitPolicy, MIN_REQUESTS_PER_SECOND};

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Longest `Retry-After` the limiter will honor, in seconds
pub const MAX_RETRY_AFTER_SECS: u64 = 86_400;

/// Which constraint held a request back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleReason {
    PerSecond,
    PerMinute,
    PerHour,
    MinInterval,
    AdaptiveDelay,
    RetryAfter,
}

/// Answer to "may I send a request to this site now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// True only if no constraint is violated
    pub allowed: bool,

    /// The longest wait among violated constraints
    pub wait: Duration,

    /// The constraint that produced `wait`
    pub reason: Option<ThrottleReason>,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            wait: Duration::ZERO,
            reason: None,
        }
    }

    /// Wait time in whole milliseconds
    pub fn wait_millis(&self) -> u64 {
        self.wait.as_millis() as u64
    }
}

/// Point-in-time pacing statistics for one site
#[derive(Debug, Clone, Serialize)]
pub struct SiteRateStats {
    pub requests_last_second: usize,
    pub requests_last_minute: usize,
    pub requests_last_hour: usize,
    pub adaptive_delay_ms: u64,
    pub retry_after_remaining_ms: Option<u64>,
    pub recent_success_rate: Option<f64>,
    pub recent_latency_ms: Option<f64>,
    pub total_requests: u64,
    pub total_failures: u64,
    pub policy: RateLimitPolicy,
}

#[derive(Debug, Default)]
struct LimiterInner {
    policies: HashMap<String, RateLimitPolicy>,
    sites: HashMap<String, SiteRateState>,
}

/// Per-site request pacer shared by all crawl tasks
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    default_policy: RateLimitPolicy,
    tuning: AdaptiveTuning,
    inner: Arc<Mutex<LimiterInner>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the default global policy.
    pub fn new() -> Self {
        Self::with_defaults(RateLimitPolicy::default(), AdaptiveTuning::default())
    }

    /// Create a new rate limiter with a custom global policy and tuning.
    pub fn with_defaults(default_policy: RateLimitPolicy, tuning: AdaptiveTuning) -> Self {
        Self {
            default_policy,
            tuning,
            inner: Arc::new(Mutex::new(LimiterInner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The global fallback policy
    pub fn default_policy(&self) -> &RateLimitPolicy {
        &self.default_policy
    }

    /// Installs or replaces the policy for a site.
    pub fn set_policy(&self, site_id: &str, policy: RateLimitPolicy) {
        debug!("Rate limit policy for {}: {:?}", site_id, policy);
        self.lock().policies.insert(site_id.to_string(), policy);
    }

    /// The policy in force for a site, falling back to the global default.
    pub fn policy_for(&self, site_id: &str) -> RateLimitPolicy {
        self.lock()
            .policies
            .get(site_id)
            .cloned()
            .unwrap_or_else(|| self.default_policy.clone())
    }

    /// Scales a site's caps down and returns the new policy.
    pub fn adjust_policy(&self, site_id: &str, rps_factor: f64, rpm_factor: f64) -> RateLimitPolicy {
        let mut inner = self.lock();
        let current = inner
            .policies
            .get(site_id)
            .cloned()
            .unwrap_or_else(|| self.default_policy.clone());
        let adjusted = current.scaled(rps_factor, rpm_factor);
        info!(
            "Slowing {}: {:.2} -> {:.2} req/s, {} -> {} req/min",
            site_id,
            current.requests_per_second,
            adjusted.requests_per_second,
            current.requests_per_minute,
            adjusted.requests_per_minute
        );
        inner.policies.insert(site_id.to_string(), adjusted.clone());
        adjusted
    }

    /// Check whether a request to `site_id` may fire now.
    pub fn can_proceed(&self, site_id: &str) -> RateDecision {
        self.can_proceed_at(site_id, Instant::now())
    }

    /// Check whether a request to `site_id` may fire at `now`.
    ///
    /// Constraints are evaluated in order: per-second, per-minute and per-hour
    /// caps, the minimum inter-request interval, then the adaptive delay (or a
    /// pending `Retry-After`). When allowed, the request is reserved so that
    /// concurrent callers see it in the rolling counts.
    pub fn can_proceed_at(&self, site_id: &str, now: Instant) -> RateDecision {
        let mut inner = self.lock();
        let policy = inner
            .policies
            .get(site_id)
            .cloned()
            .unwrap_or_else(|| self.default_policy.clone());
        let state = inner
            .sites
            .entry(site_id.to_string())
            .or_insert_with(SiteRateState::new);
        state.prune(now);

        let decision = evaluate(&policy, state, now);
        if decision.allowed {
            state.record_request(now);
        } else {
            debug!(
                "Throttling {}: wait {:?} ({:?})",
                site_id, decision.wait, decision.reason
            );
        }
        decision
    }

    /// Records the outcome of a request and adapts pacing.
    pub fn record(&self, site_id: &str, outcome: RequestOutcome) {
        let mut inner = self.lock();
        let policy = inner
            .policies
            .get(site_id)
            .cloned()
            .unwrap_or_else(|| self.default_policy.clone());
        let state = inner
            .sites
            .entry(site_id.to_string())
            .or_insert_with(SiteRateState::new);

        let timestamp = outcome.timestamp;
        let success = outcome.success;
        let status_code = outcome.status_code;
        let retry_after = outcome.retry_after_secs;
        state.push_outcome(outcome);

        // A honored Retry-After replaces the computed delay outright.
        if policy.respect_retry_after {
            if let Some(seconds) = retry_after {
                let seconds = seconds.min(MAX_RETRY_AFTER_SECS);
                let until = timestamp
                    .checked_add(Duration::from_secs(seconds))
                    .unwrap_or(timestamp);
                warn!("{} asked us to retry after {}s", site_id, seconds);
                state.retry_after_until = Some(
                    state
                        .retry_after_until
                        .map_or(until, |existing| existing.max(until)),
                );
                state.adaptive_delay_ms = 0.0;
                return;
            }
        }

        if !policy.adaptive_delay {
            return;
        }

        let mut delay = state.adaptive_delay_ms;
        if success {
            delay *= self.tuning.success_decay;
            if delay < 1.0 {
                delay = 0.0;
            }
        } else {
            delay += self.tuning.failure_penalty(status_code);
        }

        let floor = self
            .tuning
            .stress_floor(state.recent_summary(self.tuning.sample_size));
        let delay = delay.max(floor).min(self.tuning.max_delay_ms);

        if !success {
            debug!(
                "Adaptive delay for {} now {:.0}ms (status {:?})",
                site_id, delay, status_code
            );
        }
        state.adaptive_delay_ms = delay;
    }

    /// Forgets all pacing history for a site (its policy is kept).
    pub fn reset_site(&self, site_id: &str) {
        if self.lock().sites.remove(site_id).is_some() {
            info!("Reset rate limit state for {}", site_id);
        }
    }

    /// Pacing statistics for one site, if it has been seen.
    pub fn site_stats(&self, site_id: &str) -> Option<SiteRateStats> {
        self.site_stats_at(site_id, Instant::now())
    }

    pub fn site_stats_at(&self, site_id: &str, now: Instant) -> Option<SiteRateStats> {
        let inner = self.lock();
        let state = inner.sites.get(site_id)?;
        let policy = inner
            .policies
            .get(site_id)
            .cloned()
            .unwrap_or_else(|| self.default_policy.clone());
        Some(build_stats(state, policy, &self.tuning, now))
    }

    /// Pacing statistics for every site seen so far.
    pub fn all_stats(&self) -> HashMap<String, SiteRateStats> {
        let now = Instant::now();
        let inner = self.lock();
        inner
            .sites
            .iter()
            .map(|(site, state)| {
                let policy = inner
                    .policies
                    .get(site)
                    .cloned()
                    .unwrap_or_else(|| self.default_policy.clone());
                (site.clone(), build_stats(state, policy, &self.tuning, now))
            })
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies every pacing constraint and keeps the longest wait.
fn evaluate(policy: &RateLimitPolicy, state: &SiteRateState, now: Instant) -> RateDecision {
    let mut decision = RateDecision::allow();
    let mut violate = |wait: Duration, reason: ThrottleReason| {
        if decision.allowed || wait > decision.wait {
            decision.wait = wait;
            decision.reason = Some(reason);
        }
        decision.allowed = false;
    };

    if let Some(wait) = state.window_wait(SECOND, policy.per_second_cap(), now) {
        violate(wait, ThrottleReason::PerSecond);
    }
    if let Some(wait) = state.window_wait(MINUTE, policy.requests_per_minute, now) {
        violate(wait, ThrottleReason::PerMinute);
    }
    if let Some(wait) = state.window_wait(HOUR, policy.requests_per_hour, now) {
        violate(wait, ThrottleReason::PerHour);
    }

    let interval = policy.min_interval();
    if let Some(elapsed) = state.since_last_request(now) {
        let in_interval = state.requests_within(interval, now);
        if elapsed < interval && in_interval >= policy.burst_allowance.max(1) as usize {
            violate(interval - elapsed, ThrottleReason::MinInterval);
        }
    }

    match state.retry_after_until {
        Some(until) if until > now => {
            violate(until - now, ThrottleReason::RetryAfter);
        }
        _ => {
            if policy.adaptive_delay && state.adaptive_delay_ms >= 1.0 {
                if let Some(elapsed) = state.since_last_request(now) {
                    let target = interval + Duration::from_millis(state.adaptive_delay_ms as u64);
                    if elapsed < target {
                        violate(target - elapsed, ThrottleReason::AdaptiveDelay);
                    }
                }
            }
        }
    }

    decision
}

fn build_stats(
    state: &SiteRateState,
    policy: RateLimitPolicy,
    tuning: &AdaptiveTuning,
    now: Instant,
) -> SiteRateStats {
    let summary = state.recent_summary(tuning.sample_size);
    SiteRateStats {
        requests_last_second: state.requests_within(SECOND, now),
        requests_last_minute: state.requests_within(MINUTE, now),
        requests_last_hour: state.requests_within(HOUR, now),
        adaptive_delay_ms: state.adaptive_delay_ms as u64,
        retry_after_remaining_ms: state
            .retry_after_until
            .filter(|until| *until > now)
            .map(|until| (until - now).as_millis() as u64),
        recent_success_rate: summary.map(|(_, rate, _)| rate),
        recent_latency_ms: summary.map(|(_, _, latency)| latency),
        total_requests: state.total_requests,
        total_failures: state.total_failures,
        policy,
    }
}
