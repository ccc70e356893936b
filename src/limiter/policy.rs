//! Rate limit policies and adaptive pacing tunables

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lowest per-second rate a policy can be adjusted down to
pub const MIN_REQUESTS_PER_SECOND: f64 = 0.05;

/// Pacing limits for one site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimitPolicy {
    /// Sustained request rate; also sets the minimum interval between requests
    pub requests_per_second: f64,

    /// Cap on requests in any trailing minute
    pub requests_per_minute: u32,

    /// Cap on requests in any trailing hour
    pub requests_per_hour: u32,

    /// Requests allowed back-to-back before the minimum interval applies
    pub burst_allowance: u32,

    /// Whether observed outcomes adjust pacing
    pub adaptive_delay: bool,

    /// Whether a server `Retry-After` hint overrides the computed delay
    pub respect_retry_after: bool,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            requests_per_minute: 30,
            requests_per_hour: 500,
            burst_allowance: 1,
            adaptive_delay: true,
            respect_retry_after: true,
        }
    }
}

impl RateLimitPolicy {
    /// Maximum number of requests in any trailing second
    pub fn per_second_cap(&self) -> u32 {
        (self.requests_per_second.ceil() as u32).max(1)
    }

    /// Minimum spacing between two requests (`1000 / requests_per_second` ms)
    pub fn min_interval(&self) -> Duration {
        if self.requests_per_second <= 0.0 || !self.requests_per_second.is_finite() {
            return Duration::from_secs(1);
        }
        Duration::from_secs_f64(1.0 / self.requests_per_second)
    }

    /// Returns a copy with both rate caps scaled down
    ///
    /// The per-second rate never drops below `MIN_REQUESTS_PER_SECOND` and
    /// the per-minute cap never drops below one.
    pub fn scaled(&self, rps_factor: f64, rpm_factor: f64) -> Self {
        let requests_per_second = (self.requests_per_second * rps_factor).max(MIN_REQUESTS_PER_SECOND);
        let requests_per_minute = ((self.requests_per_minute as f64 * rpm_factor).round() as u32).max(1);
        Self {
            requests_per_second,
            requests_per_minute,
            ..self.clone()
        }
    }
}

/// Numeric knobs for adaptive pacing
///
/// These started life as hand-tuned constants; they are exposed so that a
/// deployment can adjust them from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AdaptiveTuning {
    /// Multiplier applied to the delay after every success
    pub success_decay: f64,

    /// Added after an HTTP 429 (ms)
    pub rate_limited_penalty_ms: f64,

    /// Added after an HTTP 403 or 503 (ms)
    pub blocked_penalty_ms: f64,

    /// Added after any other 5xx (ms)
    pub server_error_penalty_ms: f64,

    /// Added after any other 4xx (ms)
    pub client_error_penalty_ms: f64,

    /// Added after a failure without a status code (ms)
    pub network_error_penalty_ms: f64,

    /// Number of recent outcomes considered for the stress floor
    pub sample_size: usize,

    /// Outcomes needed before the success-rate term applies
    pub min_samples: usize,

    /// Success rate below which the delay grows
    pub target_success_rate: f64,

    /// Cap on the success-rate contribution (ms)
    pub max_success_penalty_ms: f64,

    /// Mean latency above which the delay grows (ms)
    pub latency_threshold_ms: f64,

    /// Milliseconds of delay per millisecond of excess latency
    pub latency_factor: f64,

    /// Cap on the latency contribution (ms)
    pub max_latency_penalty_ms: f64,

    /// Cap on the total adaptive delay (ms)
    pub max_delay_ms: f64,
}

impl Default for AdaptiveTuning {
    fn default() -> Self {
        Self {
            success_decay: 0.9,
            rate_limited_penalty_ms: 5000.0,
            blocked_penalty_ms: 3000.0,
            server_error_penalty_ms: 2000.0,
            client_error_penalty_ms: 1000.0,
            network_error_penalty_ms: 1500.0,
            sample_size: 20,
            min_samples: 5,
            target_success_rate: 0.8,
            max_success_penalty_ms: 10_000.0,
            latency_threshold_ms: 5000.0,
            latency_factor: 2.0,
            max_latency_penalty_ms: 10_000.0,
            max_delay_ms: 30_000.0,
        }
    }
}

impl AdaptiveTuning {
    /// Delay increment for a failed request with the given status
    pub fn failure_penalty(&self, status_code: Option<u16>) -> f64 {
        match status_code {
            Some(429) => self.rate_limited_penalty_ms,
            Some(403) | Some(503) => self.blocked_penalty_ms,
            Some(500..=599) => self.server_error_penalty_ms,
            Some(400..=499) => self.client_error_penalty_ms,
            Some(_) => self.client_error_penalty_ms,
            None => self.network_error_penalty_ms,
        }
    }

    /// Delay floor derived from recent success rate and latency
    ///
    /// `summary` is `(sample_count, success_rate, mean_latency_ms)`.
    pub fn stress_floor(&self, summary: Option<(usize, f64, f64)>) -> f64 {
        let Some((count, success_rate, mean_latency_ms)) = summary else {
            return 0.0;
        };

        let mut floor = 0.0;
        if count >= self.min_samples && success_rate < self.target_success_rate {
            let shortfall = (self.target_success_rate - success_rate) / self.target_success_rate;
            floor += (shortfall * self.max_success_penalty_ms).min(self.max_success_penalty_ms);
        }
        if mean_latency_ms > self.latency_threshold_ms {
            let excess = mean_latency_ms - self.latency_threshold_ms;
            floor += (excess * self.latency_factor).min(self.max_latency_penalty_ms);
        }
        floor.min(self.max_delay_ms)
    }
}
