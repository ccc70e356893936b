use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcomes and request timestamps older than this are dropped
pub const HISTORY_WINDOW: Duration = Duration::from_secs(3600);

/// Hard cap on the outcome log, independent of the time window
const MAX_OUTCOMES: usize = 1000;

/// A single observed request result
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    /// When the request completed
    pub timestamp: Instant,

    /// Whether the request produced a usable response
    pub success: bool,

    /// How long the request took
    pub latency: Duration,

    /// HTTP status, if a response arrived
    pub status_code: Option<u16>,

    /// Server-supplied `Retry-After` value in seconds
    pub retry_after_secs: Option<u64>,
}

impl RequestOutcome {
    /// A successful outcome observed now
    pub fn success(latency: Duration) -> Self {
        Self {
            timestamp: Instant::now(),
            success: true,
            latency,
            status_code: Some(200),
            retry_after_secs: None,
        }
    }

    /// A failed outcome observed now
    pub fn failure(latency: Duration, status_code: Option<u16>) -> Self {
        Self {
            timestamp: Instant::now(),
            success: false,
            latency,
            status_code,
            retry_after_secs: None,
        }
    }

    pub fn at(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }
}

/// Tracks the pacing state of one site
///
/// Holds the request log used for the rolling second/minute/hour counts, the
/// outcome log used for adaptive pacing, and the adaptive extra delay itself.
/// Only the rate limiter mutates this.
#[derive(Debug, Clone)]
pub struct SiteRateState {
    /// Timestamp of the last request granted for this site
    pub last_request_time: Option<Instant>,

    /// Granted request timestamps, oldest first
    requests: VecDeque<Instant>,

    /// Observed outcomes, oldest first
    outcomes: VecDeque<RequestOutcome>,

    /// Current adaptive extra delay in milliseconds
    pub adaptive_delay_ms: f64,

    /// Requests may not resume before this instant (server `Retry-After`)
    pub retry_after_until: Option<Instant>,

    /// Number of requests granted over the lifetime of this state
    pub total_requests: u64,

    /// Number of failed outcomes over the lifetime of this state
    pub total_failures: u64,
}

impl SiteRateState {
    /// Creates a new SiteRateState with default values
    pub fn new() -> Self {
        Self {
            last_request_time: None,
            requests: VecDeque::new(),
            outcomes: VecDeque::new(),
            adaptive_delay_ms: 0.0,
            retry_after_until: None,
            total_requests: 0,
            total_failures: 0,
        }
    }

    /// Records that a request was granted at `now`
    ///
    /// The log is bounded by time only. Only granted requests land here, so
    /// the hourly cap of the site's policy bounds its length.
    pub fn record_request(&mut self, now: Instant) {
        self.requests.push_back(now);
        self.last_request_time = Some(now);
        self.total_requests += 1;
    }

    /// Appends an outcome to the log
    pub fn push_outcome(&mut self, outcome: RequestOutcome) {
        if !outcome.success {
            self.total_failures += 1;
        }
        let now = outcome.timestamp;
        self.outcomes.push_back(outcome);
        if self.outcomes.len() > MAX_OUTCOMES {
            self.outcomes.pop_front();
        }
        self.prune(now);
    }

    /// Drops request and outcome entries older than the history window
    pub fn prune(&mut self, now: Instant) {
        while let Some(front) = self.requests.front() {
            if now.saturating_duration_since(*front) >= HISTORY_WINDOW {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        while let Some(front) = self.outcomes.front() {
            if now.saturating_duration_since(front.timestamp) >= HISTORY_WINDOW {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
        if let Some(until) = self.retry_after_until {
            if until <= now {
                self.retry_after_until = None;
            }
        }
    }

    /// Counts granted requests inside the trailing `window`
    pub fn requests_within(&self, window: Duration, now: Instant) -> usize {
        self.requests
            .iter()
            .rev()
            .take_while(|t| now.saturating_duration_since(**t) < window)
            .count()
    }

    /// Time until the trailing `window` holds fewer than `cap` requests
    ///
    /// Returns None if a request fits in the window right now.
    pub fn window_wait(&self, window: Duration, cap: u32, now: Instant) -> Option<Duration> {
        let cap = cap.max(1) as usize;
        let count = self.requests_within(window, now);
        if count < cap {
            return None;
        }

        // The request that has to expire before the count drops below `cap`.
        let idx = self.requests.len() - cap;
        let expires_at = self.requests[idx] + window;
        Some(expires_at.saturating_duration_since(now))
    }

    /// Time elapsed since the last granted request
    pub fn since_last_request(&self, now: Instant) -> Option<Duration> {
        self.last_request_time
            .map(|last| now.saturating_duration_since(last))
    }

    /// The most recent `n` outcomes, newest first
    pub fn recent_outcomes(&self, n: usize) -> impl Iterator<Item = &RequestOutcome> {
        self.outcomes.iter().rev().take(n)
    }

    /// Success rate and mean latency of the most recent `n` outcomes
    ///
    /// Returns None when no outcomes have been observed.
    pub fn recent_summary(&self, n: usize) -> Option<(usize, f64, f64)> {
        let mut count = 0usize;
        let mut successes = 0usize;
        let mut latency_ms = 0.0;
        for outcome in self.recent_outcomes(n) {
            count += 1;
            if outcome.success {
                successes += 1;
            }
            latency_ms += outcome.latency.as_secs_f64() * 1000.0;
        }
        if count == 0 {
            return None;
        }
        Some((
            count,
            successes as f64 / count as f64,
            latency_ms / count as f64,
        ))
    }

    /// Number of outcomes currently retained
    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }
}

impl Default for SiteRateState {
    fn default() -> Self {
        Self::new()
    }
}
