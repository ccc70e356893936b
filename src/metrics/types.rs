use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Handle for one crawl task's metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Counters for a single crawl task
#[derive(Debug, Clone, Serialize)]
pub struct TaskMetrics {
    pub id: TaskId,
    pub site_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub(crate) started: Instant,

    /// Wall time from start to finish (ms)
    pub duration_ms: Option<f64>,

    pub requests: u64,
    pub failed_requests: u64,
    pub bytes: u64,

    /// Running mean request latency (ms)
    pub avg_request_ms: f64,

    pub parses: u64,
    pub failed_parses: u64,

    /// Running mean parse duration (ms)
    pub avg_parse_ms: f64,

    pub results: u64,

    /// None while the task is still running
    pub success: Option<bool>,
}

impl TaskMetrics {
    pub(crate) fn new(id: TaskId, site_id: &str) -> Self {
        Self {
            id,
            site_id: site_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            started: Instant::now(),
            duration_ms: None,
            requests: 0,
            failed_requests: 0,
            bytes: 0,
            avg_request_ms: 0.0,
            parses: 0,
            failed_parses: 0,
            avg_parse_ms: 0.0,
            results: 0,
            success: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.success.is_some()
    }
}

/// Aggregates for one site across all of its tasks
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteStats {
    pub site_id: String,
    pub tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    pub requests: u64,
    pub failed_requests: u64,

    /// Running mean response time (ms)
    pub avg_response_ms: f64,

    /// Requests behind the two figures below, at most `RECENT_REQUEST_WINDOW`
    pub recent_requests: usize,

    /// Error rate over the most recent requests
    pub recent_error_rate: f64,

    /// Mean response time over the most recent requests (ms)
    pub recent_avg_response_ms: f64,

    pub total_results: u64,
}

impl SiteStats {
    pub(crate) fn new(site_id: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            ..Default::default()
        }
    }

    /// Fraction of finished tasks that succeeded
    pub fn success_rate(&self) -> f64 {
        let finished = self.successful_tasks + self.failed_tasks;
        if finished == 0 {
            return 0.0;
        }
        self.successful_tasks as f64 / finished as f64
    }

    pub fn avg_results_per_task(&self) -> f64 {
        if self.tasks == 0 {
            return 0.0;
        }
        self.total_results as f64 / self.tasks as f64
    }
}

/// Process-wide performance figures
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemMetrics {
    pub uptime_secs: u64,
    pub active_tasks: usize,
    pub completed_tasks: u64,
    pub successful_tasks: u64,
    pub total_requests: u64,
    pub failed_requests: u64,

    /// Failed over total requests, 0 when nothing was sent
    pub error_rate: f64,

    /// Running mean response time (ms)
    pub avg_response_ms: f64,

    /// Requests behind the two figures below, at most `RECENT_REQUEST_WINDOW`
    pub recent_requests: usize,

    /// Error rate over the most recent requests
    pub recent_error_rate: f64,

    /// Mean response time over the most recent requests (ms)
    pub recent_avg_response_ms: f64,

    /// Requests per minute since the recorder was created
    pub throughput_per_minute: f64,

    pub total_bytes: u64,
    pub total_results: u64,
    pub cache_lookups: u64,
    pub cache_hits: u64,

    /// None until the first cache lookup
    pub cache_hit_rate: Option<f64>,
}

/// Everything the recorder knows, ready for printing or JSON output
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub system: SystemMetrics,

    /// Per-site aggregates, slowest first
    pub sites: Vec<SiteStats>,

    /// Most recently finished tasks, newest first
    pub recent_tasks: Vec<TaskMetrics>,
}
