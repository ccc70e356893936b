//! System health aggregation
//!
//! Folds performance metrics, proxy pool health, recovery outcomes and host
//! resource usage into one scored snapshot, and raises operator alerts for
//! every component that is not healthy.
//!
//! # Components
//!
//! | Name | Derived from |
//! |------|--------------|
//! | `network` | response time and error rate over the most recent requests |
//! | `proxies` | mean active proxy score weighted by the active share |
//! | `recovery` | share of recent failures that a strategy recovered |
//! | `cache` | result cache hit rate |
//! | `storage` | memory and storage usage from a `ResourceProbe` |

mod alerts;
mod resources;
mod snapshot;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::{PerformanceRecorder, SystemMetrics};
use crate::proxy::{ProxyPool, ProxyPoolStats};
use crate::state::{FailureKind, Severity};
use crate::ticker::Ticker;

pub use alerts::{Alert, AlertBook, AlertSeverity, MAX_ALERTS};
pub use resources::{MeminfoProbe, ResourceProbe, ResourceUsage};
pub use snapshot::{
    ComponentHealth, HealthMetrics, HealthStatus, SystemHealthSnapshot, CRITICAL_SCORE,
    HEALTHY_SCORE,
};

/// Recovery events kept for the recovery component
const MAX_ERROR_EVENTS: usize = 100;

pub const NETWORK: &str = "network";
pub const PROXIES: &str = "proxies";
pub const RECOVERY: &str = "recovery";
pub const CACHE: &str = "cache";
pub const STORAGE: &str = "storage";

/// Thresholds used to grade components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HealthThresholds {
    /// Memory or storage usage (%) that raises a warning
    pub usage_warning_percent: f64,

    /// Memory or storage usage (%) that is critical
    pub usage_critical_percent: f64,

    /// Mean response time (ms) that raises a warning
    pub response_warning_ms: f64,

    /// Mean response time (ms) that is critical
    pub response_critical_ms: f64,

    /// Request error rate (0-1) that raises a warning
    pub error_rate_warning: f64,

    /// Request error rate (0-1) that is critical
    pub error_rate_critical: f64,

    /// Cache hit rate (0-1) below which a warning is raised
    pub cache_hit_warning: f64,

    /// Cache hit rate (0-1) below which the cache is critical
    pub cache_hit_critical: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            usage_warning_percent: 70.0,
            usage_critical_percent: 90.0,
            response_warning_ms: 5000.0,
            response_critical_ms: 10_000.0,
            error_rate_warning: 0.10,
            error_rate_critical: 0.25,
            cache_hit_warning: 0.60,
            cache_hit_critical: 0.40,
        }
    }
}

impl HealthThresholds {
    fn grade_above(value: f64, warning: f64, critical: f64) -> HealthStatus {
        if value >= critical {
            HealthStatus::Critical
        } else if value >= warning {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn grade_usage(&self, percent: f64) -> HealthStatus {
        Self::grade_above(percent, self.usage_warning_percent, self.usage_critical_percent)
    }

    pub fn grade_response(&self, millis: f64) -> HealthStatus {
        Self::grade_above(millis, self.response_warning_ms, self.response_critical_ms)
    }

    pub fn grade_error_rate(&self, rate: f64) -> HealthStatus {
        Self::grade_above(rate, self.error_rate_warning, self.error_rate_critical)
    }

    pub fn grade_cache(&self, hit_rate: f64) -> HealthStatus {
        if hit_rate < self.cache_hit_critical {
            HealthStatus::Critical
        } else if hit_rate < self.cache_hit_warning {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }
}

/// A failure and what recovery made of it
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub site_id: String,
    pub kind: FailureKind,
    pub severity: Severity,
    pub message: String,

    /// Strategy that handled the failure, or the exhaustion marker
    pub strategy: String,

    pub recovered: bool,
}

#[derive(Debug, Default)]
struct HealthInner {
    alerts: AlertBook,
    errors: VecDeque<ErrorEvent>,
    last_snapshot: Option<SystemHealthSnapshot>,
}

/// Produces system health snapshots and owns the alert book
///
/// Cloning is cheap and every clone shares the same alerts and events.
#[derive(Clone)]
pub struct HealthAggregator {
    thresholds: HealthThresholds,
    metrics: PerformanceRecorder,
    proxies: ProxyPool,
    resources: Option<Arc<dyn ResourceProbe>>,
    inner: Arc<Mutex<HealthInner>>,
}

impl HealthAggregator {
    pub fn new(thresholds: HealthThresholds, metrics: PerformanceRecorder, proxies: ProxyPool) -> Self {
        Self {
            thresholds,
            metrics,
            proxies,
            resources: None,
            inner: Arc::new(Mutex::new(HealthInner::default())),
        }
    }

    /// Attaches a probe that feeds the storage component
    pub fn with_resource_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.resources = Some(probe);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HealthInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Records a failure handled by the recovery orchestrator
    ///
    /// An unrecovered critical failure raises an alert that stays until an
    /// operator acknowledges it.
    pub fn record_error_event(&self, event: ErrorEvent) {
        let mut inner = self.lock();
        if event.severity == Severity::Critical && !event.recovered {
            warn!(
                "Critical {} on {} not recovered: {}",
                event.kind, event.site_id, event.message
            );
            inner.alerts.raise(
                RECOVERY,
                AlertSeverity::Critical,
                format!("Unrecovered {} failure", event.kind),
                format!("{}: {}", event.site_id, event.message),
                false,
            );
        }
        inner.errors.push_back(event);
        if inner.errors.len() > MAX_ERROR_EVENTS {
            inner.errors.pop_front();
        }
    }

    /// Recomputes every component and the overall status
    ///
    /// Components are graded independently; one that cannot be checked
    /// reports `unknown` with a score of 0 rather than failing the check.
    /// Alerts are raised for every component that is not healthy and
    /// auto-resolving alerts are dropped for components that recovered.
    pub fn perform_health_check(&self) -> SystemHealthSnapshot {
        let system = self.metrics.system_metrics();
        let proxy_stats = self.proxies.stats();
        let resources = self.resources.as_ref().map(|probe| probe.usage());

        let mut inner = self.lock();
        let recovered_share = recovery_rate(&inner.errors);

        let mut components = BTreeMap::new();
        components.insert(NETWORK.to_string(), self.network_component(&system));
        components.insert(PROXIES.to_string(), proxies_component(&proxy_stats));
        components.insert(RECOVERY.to_string(), recovery_component(recovered_share, inner.errors.len()));
        components.insert(CACHE.to_string(), self.cache_component(&system));
        components.insert(STORAGE.to_string(), self.storage_component(resources.as_ref()));

        let score = components.values().map(|c| c.score as f64).sum::<f64>() / components.len() as f64;
        let status = HealthStatus::from_score(score);

        for (name, component) in &components {
            match component.status {
                HealthStatus::Healthy => {
                    let resolved = inner.alerts.resolve_component(name);
                    if resolved > 0 {
                        info!("{} is healthy again ({} alerts resolved)", name, resolved);
                    }
                }
                other => {
                    let severity = match other {
                        HealthStatus::Critical => AlertSeverity::Critical,
                        HealthStatus::Warning => AlertSeverity::Warning,
                        _ => AlertSeverity::Info,
                    };
                    inner.alerts.raise(
                        name,
                        severity,
                        format!("{} is {}", name, other),
                        component.message.clone(),
                        true,
                    );
                }
            }
        }

        let snapshot = SystemHealthSnapshot {
            timestamp: Utc::now(),
            status,
            score,
            components,
            alerts: inner.alerts.active(),
            metrics: HealthMetrics {
                system,
                proxies: proxy_stats,
                recovery_rate: recovered_share,
                resources: resources.and_then(Result::ok),
            },
        };

        debug!("Health check: {} ({:.1})", snapshot.status, snapshot.score);
        inner.last_snapshot = Some(snapshot.clone());
        snapshot
    }

    fn network_component(&self, system: &SystemMetrics) -> ComponentHealth {
        if system.recent_requests == 0 {
            return ComponentHealth::no_data();
        }
        let status = self
            .thresholds
            .grade_response(system.recent_avg_response_ms)
            .worst(self.thresholds.grade_error_rate(system.recent_error_rate));
        ComponentHealth::new(
            status,
            format!(
                "avg response {:.0} ms, error rate {:.1}% over the last {} requests",
                system.recent_avg_response_ms,
                system.recent_error_rate * 100.0,
                system.recent_requests
            ),
        )
    }

    fn cache_component(&self, system: &SystemMetrics) -> ComponentHealth {
        match system.cache_hit_rate {
            None => ComponentHealth::no_data(),
            Some(rate) => ComponentHealth::new(
                self.thresholds.grade_cache(rate),
                format!("hit rate {:.1}%", rate * 100.0),
            ),
        }
    }

    fn storage_component(&self, usage: Option<&Result<ResourceUsage, String>>) -> ComponentHealth {
        match usage {
            None => ComponentHealth::no_data(),
            Some(Err(e)) => {
                warn!("Resource probe failed: {}", e);
                ComponentHealth::new(HealthStatus::Unknown, format!("probe failed: {}", e))
            }
            Some(Ok(usage)) => {
                let mut status = HealthStatus::Healthy;
                let mut parts = Vec::new();
                if let Some(memory) = usage.memory_percent {
                    status = status.worst(self.thresholds.grade_usage(memory));
                    parts.push(format!("memory {:.0}%", memory));
                }
                if let Some(storage) = usage.storage_percent {
                    status = status.worst(self.thresholds.grade_usage(storage));
                    parts.push(format!("storage {:.0}%", storage));
                }
                if parts.is_empty() {
                    return ComponentHealth::no_data();
                }
                ComponentHealth::new(status, parts.join(", "))
            }
        }
    }

    /// Marks an alert as seen; returns false if the id is unknown
    pub fn acknowledge_alert(&self, id: Uuid) -> bool {
        self.lock().alerts.acknowledge(id)
    }

    /// Drops every alert; calling it again is a no-op
    pub fn clear_all_alerts(&self) {
        self.lock().alerts.clear_all();
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.lock().alerts.active()
    }

    pub fn last_snapshot(&self) -> Option<SystemHealthSnapshot> {
        self.lock().last_snapshot.clone()
    }

    pub fn recent_errors(&self) -> Vec<ErrorEvent> {
        self.lock().errors.iter().cloned().collect()
    }

    /// Runs `perform_health_check` every `interval` until the ticker stops
    pub fn start(&self, interval: Duration) -> Ticker {
        let aggregator = self.clone();
        Ticker::spawn("health-check", interval, move || {
            let aggregator = aggregator.clone();
            async move {
                let snapshot = aggregator.perform_health_check();
                if snapshot.status != HealthStatus::Healthy {
                    warn!(
                        "System {} (score {:.1}, {} active alerts)",
                        snapshot.status,
                        snapshot.score,
                        snapshot.alerts.len()
                    );
                }
            }
        })
    }
}

fn recovery_rate(errors: &VecDeque<ErrorEvent>) -> Option<f64> {
    if errors.is_empty() {
        return None;
    }
    let recovered = errors.iter().filter(|e| e.recovered).count();
    Some(recovered as f64 / errors.len() as f64)
}

fn recovery_component(rate: Option<f64>, events: usize) -> ComponentHealth {
    match rate {
        None => ComponentHealth::no_data(),
        Some(rate) => ComponentHealth::scored(
            rate * 100.0,
            format!("{:.0}% of {} recent failures recovered", rate * 100.0, events),
        ),
    }
}

fn proxies_component(stats: &ProxyPoolStats) -> ComponentHealth {
    if stats.total == 0 {
        return ComponentHealth::new(HealthStatus::Healthy, "no proxies configured");
    }
    let active_share = stats.active as f64 / stats.total as f64;
    ComponentHealth::scored(
        stats.avg_active_health * active_share,
        format!(
            "{}/{} active, mean score {:.0}",
            stats.active, stats.total, stats.avg_active_health
        ),
    )
}
