use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use rand::seq::IteratorRandom;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::proxy::{ProbeSettings, ProxyHealthRules, ProxyProbe, ProxyRecord};
use crate::ticker::Ticker;

/// Idle time beyond which a proxy earns no further selection bonus
const MAX_IDLE_BONUS: Duration = Duration::from_secs(300);

/// Result of importing a list of connection strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub added: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

/// Result of one probe sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthCheckSummary {
    pub checked: usize,
    pub healthy: usize,
    pub failed: usize,
    pub reactivated: usize,
    pub deactivated: usize,
}

/// Aggregate view of the pool
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProxyPoolStats {
    pub total: usize,
    pub active: usize,

    /// Mean health score across all proxies
    pub avg_health: f64,

    /// Mean health score across active proxies
    pub avg_active_health: f64,

    /// Mean latency across proxies that have served a request (ms)
    pub avg_latency_ms: f64,
}

/// Shared set of egress proxies
///
/// Cloning is cheap and every clone shares the same records. Selection and
/// reporting never fail: an empty or fully deactivated pool simply yields
/// `None`, and reports for unknown proxies are ignored.
#[derive(Debug, Clone)]
pub struct ProxyPool {
    rules: ProxyHealthRules,
    records: Arc<Mutex<Vec<ProxyRecord>>>,
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyPool {
    pub fn new() -> Self {
        Self::with_rules(ProxyHealthRules::default())
    }

    pub fn with_rules(rules: ProxyHealthRules) -> Self {
        Self {
            rules,
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProxyRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn rules(&self) -> &ProxyHealthRules {
        &self.rules
    }

    /// Adds a proxy; returns false if one with the same id is already known
    pub fn add(&self, record: ProxyRecord) -> bool {
        let mut records = self.lock();
        let id = record.id();
        if records.iter().any(|r| r.id() == id) {
            return false;
        }
        debug!("Added proxy {}", id);
        records.push(record);
        true
    }

    pub fn remove(&self, id: &str) -> Option<ProxyRecord> {
        let mut records = self.lock();
        let idx = records.iter().position(|r| r.id() == id)?;
        Some(records.remove(idx))
    }

    /// A snapshot of one record
    pub fn get(&self, id: &str) -> Option<ProxyRecord> {
        self.lock().iter().find(|r| r.id() == id).cloned()
    }

    /// Snapshots of every record, in insertion order
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.lock().iter().filter(|r| r.is_active).count()
    }

    /// Picks the best active proxy and marks it used
    pub fn next(&self) -> Option<ProxyRecord> {
        self.next_at(Instant::now())
    }

    /// Picks the best active proxy as of `now` and marks it used
    ///
    /// Priority is the health score plus one point per ten seconds idle, up
    /// to 30 points. Proxies that were never used get the full bonus. Ties go
    /// to the earliest added.
    pub fn next_at(&self, now: Instant) -> Option<ProxyRecord> {
        let mut records = self.lock();

        let mut best: Option<(usize, f64)> = None;
        for (idx, record) in records.iter().enumerate() {
            if !record.is_active {
                continue;
            }
            let priority = selection_priority(record, now);
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((idx, priority));
            }
        }

        let (idx, _) = best?;
        let record = &mut records[idx];
        record.last_used = Some(now);
        Some(record.clone())
    }

    /// Picks a uniformly random active proxy and marks it used
    pub fn random(&self) -> Option<ProxyRecord> {
        let mut records = self.lock();
        let record = records
            .iter_mut()
            .filter(|r| r.is_active)
            .choose(&mut rand::thread_rng())?;
        record.last_used = Some(Instant::now());
        Some(record.clone())
    }

    /// Applies a request outcome to a proxy
    ///
    /// Returns false if the proxy is unknown.
    pub fn report(&self, id: &str, success: bool, latency: Duration, error: Option<&str>) -> bool {
        let mut records = self.lock();
        let Some(record) = records.iter_mut().find(|r| r.id() == id) else {
            debug!("Ignoring report for unknown proxy {}", id);
            return false;
        };

        if success {
            record.apply_success(latency, &self.rules);
        } else if record.apply_failure(error, &self.rules) {
            warn!(
                "Deactivated proxy {} after {} failures (score {})",
                id, record.failure_count, record.health_score
            );
        }
        true
    }

    /// Restores a proxy to a perfect, active state
    pub fn reset_proxy(&self, id: &str) -> bool {
        let mut records = self.lock();
        match records.iter_mut().find(|r| r.id() == id) {
            Some(record) => {
                record.reset();
                info!("Reset proxy {}", id);
                true
            }
            None => false,
        }
    }

    /// Adds proxies from connection strings
    ///
    /// Blank lines and lines starting with `#` are skipped. Invalid entries
    /// are logged and counted, never fatal.
    pub fn import<I, S>(&self, lines: I) -> ImportSummary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut summary = ImportSummary::default();
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match ProxyRecord::parse(line) {
                Ok(record) => {
                    if self.add(record) {
                        summary.added += 1;
                    } else {
                        summary.duplicates += 1;
                    }
                }
                Err(e) => {
                    warn!("Skipping proxy entry: {}", e);
                    summary.invalid += 1;
                }
            }
        }
        info!(
            "Imported {} proxies ({} duplicates, {} invalid)",
            summary.added, summary.duplicates, summary.invalid
        );
        summary
    }

    /// Connection strings for every proxy, in insertion order
    pub fn export(&self) -> Vec<String> {
        self.lock().iter().map(ProxyRecord::connection_string).collect()
    }

    /// Removes inactive proxies whose score stayed low; returns how many
    pub fn cleanup_inactive(&self) -> usize {
        let threshold = self.rules.deactivate_below_score;
        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| r.is_active || r.health_score >= threshold);
        let removed = before - records.len();
        if removed > 0 {
            info!("Removed {} dead proxies", removed);
        }
        removed
    }

    pub fn stats(&self) -> ProxyPoolStats {
        let records = self.lock();
        if records.is_empty() {
            return ProxyPoolStats::default();
        }

        let total = records.len();
        let active: Vec<&ProxyRecord> = records.iter().filter(|r| r.is_active).collect();
        let avg_health =
            records.iter().map(|r| r.health_score as f64).sum::<f64>() / total as f64;
        let avg_active_health = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|r| r.health_score as f64).sum::<f64>() / active.len() as f64
        };

        let served: Vec<f64> = records
            .iter()
            .filter(|r| r.success_count > 0)
            .map(|r| r.avg_latency_ms)
            .collect();
        let avg_latency_ms = if served.is_empty() {
            0.0
        } else {
            served.iter().sum::<f64>() / served.len() as f64
        };

        ProxyPoolStats {
            total,
            active: active.len(),
            avg_health,
            avg_active_health,
            avg_latency_ms,
        }
    }

    /// Probes every proxy concurrently and updates their state
    ///
    /// At most `settings.max_concurrent` probes run at once and each is cut
    /// off after `settings.timeout`. A passing probe reactivates the proxy
    /// with a score of at least the reactivation score and clears its failure
    /// count. A failing probe deactivates it and applies the failure penalty.
    pub async fn health_check(&self, probe: &dyn ProxyProbe, settings: ProbeSettings) -> HealthCheckSummary {
        let targets = self.snapshot();
        if targets.is_empty() {
            return HealthCheckSummary::default();
        }

        let timeout = settings.timeout;
        let results: Vec<(String, Result<Duration, String>)> = stream::iter(targets)
            .map(move |record| async move {
                let outcome = match tokio::time::timeout(timeout, probe.probe(&record)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(format!("probe timed out after {:?}", timeout)),
                };
                (record.id(), outcome)
            })
            .buffer_unordered(settings.max_concurrent.max(1))
            .collect()
            .await;

        let now = Instant::now();
        let mut summary = HealthCheckSummary::default();
        let mut records = self.lock();
        for (id, outcome) in results {
            // Removed while the sweep was running
            let Some(record) = records.iter_mut().find(|r| r.id() == id) else {
                continue;
            };
            summary.checked += 1;
            record.last_checked = Some(now);
            let was_active = record.is_active;

            match outcome {
                Ok(latency) => {
                    summary.healthy += 1;
                    record.is_active = true;
                    record.failure_count = 0;
                    record.last_error = None;
                    record.health_score = record.health_score.max(self.rules.reactivation_score);
                    if !was_active {
                        summary.reactivated += 1;
                        info!("Proxy {} reactivated ({:?})", id, latency);
                    }
                }
                Err(error) => {
                    summary.failed += 1;
                    record.failure_count += 1;
                    record.health_score = record.health_score.saturating_sub(self.rules.failure_decrement);
                    record.is_active = false;
                    if was_active {
                        summary.deactivated += 1;
                        warn!("Proxy {} failed health check: {}", id, error);
                    }
                    record.last_error = Some(error);
                }
            }
        }

        info!(
            "Proxy sweep: {}/{} healthy, {} reactivated, {} deactivated",
            summary.healthy, summary.checked, summary.reactivated, summary.deactivated
        );
        summary
    }

    /// Runs `health_check` every `period` until the ticker is stopped
    pub fn spawn_health_checks(
        &self,
        probe: Arc<dyn ProxyProbe>,
        settings: ProbeSettings,
        period: Duration,
    ) -> Ticker {
        let pool = self.clone();
        Ticker::spawn("proxy-health", period, move || {
            let pool = pool.clone();
            let probe = probe.clone();
            async move {
                pool.health_check(probe.as_ref(), settings).await;
            }
        })
    }
}

fn selection_priority(record: &ProxyRecord, now: Instant) -> f64 {
    let idle = record
        .last_used
        .map(|t| now.saturating_duration_since(t).min(MAX_IDLE_BONUS))
        .unwrap_or(MAX_IDLE_BONUS);
    record.health_score as f64 + idle.as_secs_f64() / 10.0
}
