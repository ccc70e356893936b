//! Performance recording for crawl tasks
//!
//! Accumulates per-task, per-site and process-wide counters. Averages are
//! kept as running means so no update ever rescans history.

mod types;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

pub use types::{PerformanceReport, SiteStats, SystemMetrics, TaskId, TaskMetrics};

/// Finished tasks kept for reporting
const MAX_COMPLETED_TASKS: usize = 100;

/// Recent tasks included in a report
const REPORT_RECENT_TASKS: usize = 20;

/// Requests in the sliding window behind the `recent_*` figures
pub const RECENT_REQUEST_WINDOW: usize = 100;

fn running_mean(avg: f64, sample: f64, n: u64) -> f64 {
    avg + (sample - avg) / n as f64
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[derive(Debug, Default)]
struct Totals {
    requests: u64,
    failed_requests: u64,
    avg_response_ms: f64,
    bytes: u64,
    results: u64,
    completed_tasks: u64,
    successful_tasks: u64,
    cache_lookups: u64,
    cache_hits: u64,
}

#[derive(Debug, Clone, Copy)]
struct RequestSample {
    latency_ms: f64,
    success: bool,
}

#[derive(Debug)]
struct RecorderInner {
    next_id: u64,
    created: Instant,
    active: HashMap<TaskId, TaskMetrics>,
    completed: VecDeque<TaskMetrics>,
    sites: HashMap<String, SiteStats>,
    totals: Totals,
    recent: VecDeque<RequestSample>,
}

/// Shared performance recorder
///
/// Cloning is cheap and every clone shares the same counters. Updates for
/// unknown or already finished tasks are ignored.
#[derive(Debug, Clone)]
pub struct PerformanceRecorder {
    inner: Arc<Mutex<RecorderInner>>,
}

impl Default for PerformanceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceRecorder {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecorderInner {
                next_id: 1,
                created: Instant::now(),
                active: HashMap::new(),
                completed: VecDeque::new(),
                sites: HashMap::new(),
                totals: Totals::default(),
                recent: VecDeque::with_capacity(RECENT_REQUEST_WINDOW),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecorderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens metrics for a new task against `site_id`
    pub fn start_task(&self, site_id: &str) -> TaskId {
        let mut inner = self.lock();
        let id = TaskId(inner.next_id);
        inner.next_id += 1;
        inner.active.insert(id, TaskMetrics::new(id, site_id));
        inner
            .sites
            .entry(site_id.to_string())
            .or_insert_with(|| SiteStats::new(site_id))
            .tasks += 1;
        debug!("Started {} for {}", id, site_id);
        id
    }

    /// Records one network request made by a task
    pub fn record_request(&self, task: TaskId, latency: Duration, success: bool, bytes: u64) {
        let mut inner = self.lock();
        let RecorderInner {
            active,
            sites,
            totals,
            recent,
            ..
        } = &mut *inner;

        let Some(metrics) = active.get_mut(&task) else {
            debug!("Ignoring request for unknown {}", task);
            return;
        };
        let sample = millis(latency);

        metrics.requests += 1;
        metrics.bytes += bytes;
        metrics.avg_request_ms = running_mean(metrics.avg_request_ms, sample, metrics.requests);
        if !success {
            metrics.failed_requests += 1;
        }

        if let Some(site) = sites.get_mut(&metrics.site_id) {
            site.requests += 1;
            site.avg_response_ms = running_mean(site.avg_response_ms, sample, site.requests);
            if !success {
                site.failed_requests += 1;
            }
        }

        totals.requests += 1;
        totals.bytes += bytes;
        totals.avg_response_ms = running_mean(totals.avg_response_ms, sample, totals.requests);
        if !success {
            totals.failed_requests += 1;
        }

        if recent.len() == RECENT_REQUEST_WINDOW {
            recent.pop_front();
        }
        recent.push_back(RequestSample {
            latency_ms: sample,
            success,
        });
    }

    /// Records one extraction pass over a fetched page
    pub fn record_parse(&self, task: TaskId, duration: Duration, success: bool) {
        let mut inner = self.lock();
        let Some(metrics) = inner.active.get_mut(&task) else {
            return;
        };
        metrics.parses += 1;
        metrics.avg_parse_ms = running_mean(metrics.avg_parse_ms, millis(duration), metrics.parses);
        if !success {
            metrics.failed_parses += 1;
        }
    }

    /// Adds extracted results to a task
    pub fn record_results(&self, task: TaskId, count: u64) {
        let mut inner = self.lock();
        let RecorderInner {
            active,
            sites,
            totals,
            ..
        } = &mut *inner;
        let Some(metrics) = active.get_mut(&task) else {
            return;
        };
        metrics.results += count;
        if let Some(site) = sites.get_mut(&metrics.site_id) {
            site.total_results += count;
        }
        totals.results += count;
    }

    /// Closes a task and returns its final metrics
    pub fn finish_task(&self, task: TaskId, success: bool) -> Option<TaskMetrics> {
        let mut inner = self.lock();
        let mut metrics = inner.active.remove(&task)?;

        metrics.success = Some(success);
        metrics.finished_at = Some(Utc::now());
        metrics.duration_ms = Some(millis(metrics.started.elapsed()));

        if let Some(site) = inner.sites.get_mut(&metrics.site_id) {
            if success {
                site.successful_tasks += 1;
            } else {
                site.failed_tasks += 1;
            }
        }
        inner.totals.completed_tasks += 1;
        if success {
            inner.totals.successful_tasks += 1;
        }

        inner.completed.push_back(metrics.clone());
        if inner.completed.len() > MAX_COMPLETED_TASKS {
            inner.completed.pop_front();
        }
        debug!(
            "Finished {} for {} (success: {}, {} results)",
            task, metrics.site_id, success, metrics.results
        );
        Some(metrics)
    }

    /// Records a result-cache lookup made by the caller
    pub fn record_cache_lookup(&self, hit: bool) {
        let mut inner = self.lock();
        inner.totals.cache_lookups += 1;
        if hit {
            inner.totals.cache_hits += 1;
        }
    }

    /// Metrics for a running or recently finished task
    pub fn task_metrics(&self, task: TaskId) -> Option<TaskMetrics> {
        let inner = self.lock();
        inner
            .active
            .get(&task)
            .or_else(|| inner.completed.iter().find(|m| m.id == task))
            .cloned()
    }

    pub fn site_stats(&self, site_id: &str) -> Option<SiteStats> {
        self.lock().sites.get(site_id).cloned()
    }

    pub fn system_metrics(&self) -> SystemMetrics {
        let inner = self.lock();
        system_metrics(&inner)
    }

    pub fn report(&self) -> PerformanceReport {
        let inner = self.lock();

        let mut sites: Vec<SiteStats> = inner.sites.values().cloned().collect();
        sites.sort_by(|a, b| {
            b.avg_response_ms
                .total_cmp(&a.avg_response_ms)
                .then_with(|| a.site_id.cmp(&b.site_id))
        });

        PerformanceReport {
            generated_at: Utc::now(),
            system: system_metrics(&inner),
            sites,
            recent_tasks: inner
                .completed
                .iter()
                .rev()
                .take(REPORT_RECENT_TASKS)
                .cloned()
                .collect(),
        }
    }
}

fn system_metrics(inner: &RecorderInner) -> SystemMetrics {
    let totals = &inner.totals;
    let uptime = inner.created.elapsed();
    let minutes = uptime.as_secs_f64().max(1.0) / 60.0;

    let recent = inner.recent.len();
    let (recent_error_rate, recent_avg_response_ms) = if recent == 0 {
        (0.0, 0.0)
    } else {
        let failed = inner.recent.iter().filter(|s| !s.success).count();
        let total_ms: f64 = inner.recent.iter().map(|s| s.latency_ms).sum();
        (failed as f64 / recent as f64, total_ms / recent as f64)
    };

    SystemMetrics {
        uptime_secs: uptime.as_secs(),
        active_tasks: inner.active.len(),
        completed_tasks: totals.completed_tasks,
        successful_tasks: totals.successful_tasks,
        total_requests: totals.requests,
        failed_requests: totals.failed_requests,
        error_rate: if totals.requests == 0 {
            0.0
        } else {
            totals.failed_requests as f64 / totals.requests as f64
        },
        avg_response_ms: totals.avg_response_ms,
        recent_requests: recent,
        recent_error_rate,
        recent_avg_response_ms,
        throughput_per_minute: totals.requests as f64 / minutes,
        total_bytes: totals.bytes,
        total_results: totals.results,
        cache_lookups: totals.cache_lookups,
        cache_hits: totals.cache_hits,
        cache_hit_rate: if totals.cache_lookups == 0 {
            None
        } else {
            Some(totals.cache_hits as f64 / totals.cache_lookups as f64)
        },
    }
}
