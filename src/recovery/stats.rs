use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::FailureKind;

/// Attempts kept in the rolling window
const MAX_RECENT_ATTEMPTS: usize = 100;

/// Counters for one strategy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StrategyStats {
    pub attempts: u64,
    pub successes: u64,
}

impl StrategyStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.successes as f64 / self.attempts as f64
    }
}

/// One recorded recovery attempt
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub site_id: String,
    pub kind: FailureKind,
    pub strategy: String,
    pub success: bool,
    pub latency_ms: f64,
}

/// Aggregate recovery statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryStats {
    pub total_attempts: u64,
    pub successful_attempts: u64,

    /// Attempts that found no strategy or hit the attempt ceiling
    pub exhausted: u64,

    /// Running mean time spent choosing and running a strategy (ms)
    pub avg_latency_ms: f64,

    pub by_strategy: BTreeMap<String, StrategyStats>,

    /// Most recent attempts, oldest first
    pub recent: VecDeque<RecoveryAttemptRecord>,
}

impl RecoveryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        self.successful_attempts as f64 / self.total_attempts as f64
    }

    pub(crate) fn record(
        &mut self,
        site_id: &str,
        kind: FailureKind,
        strategy: &str,
        success: bool,
        exhausted: bool,
        latency: Duration,
    ) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        self.total_attempts += 1;
        if success {
            self.successful_attempts += 1;
        }
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / self.total_attempts as f64;

        if exhausted {
            self.exhausted += 1;
        } else {
            let entry = self.by_strategy.entry(strategy.to_string()).or_default();
            entry.attempts += 1;
            if success {
                entry.successes += 1;
            }
        }

        self.recent.push_back(RecoveryAttemptRecord {
            timestamp: Utc::now(),
            site_id: site_id.to_string(),
            kind,
            strategy: strategy.to_string(),
            success,
            latency_ms,
        });
        if self.recent.len() > MAX_RECENT_ATTEMPTS {
            self.recent.pop_front();
        }
    }
}
