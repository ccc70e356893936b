//! Plain-text reports for the terminal
//!
//! This module prints search summaries and service statistics to stdout.

use crate::crawler::{JobSummary, SiteStatus};
use crate::health::SystemHealthSnapshot;
use crate::metrics::PerformanceReport;
use crate::proxy::ProxyRecord;
use crate::recovery::RecoveryStats;

/// Prints the per-site outcome of a search
///
/// # Arguments
///
/// * `summary` - The finished search
pub fn print_search_summary(summary: &JobSummary) {
    println!("=== Search: '{}' ===\n", summary.query);

    for outcome in &summary.outcomes {
        let detail = match (&outcome.status, &outcome.last_error) {
            (SiteStatus::Completed, _) => format!("{} results", outcome.hits.len()),
            (_, Some(error)) => error.to_string(),
            (_, None) => String::new(),
        };
        println!(
            "  {:<20} {:<10} {} attempts, {:.0} ms  {}",
            outcome.site_id,
            outcome.status.as_str(),
            outcome.attempts,
            outcome.elapsed_ms,
            detail
        );
        if !outcome.strategies.is_empty() {
            println!("  {:<20} recovery: {}", "", outcome.strategies.join(" -> "));
        }
    }
    println!();

    println!(
        "{} ({} results, {:.1}s)",
        summary.summary_line(),
        summary.total_hits(),
        summary.elapsed_ms / 1000.0
    );
}

/// Prints a health snapshot with its components and active alerts
pub fn print_health(snapshot: &SystemHealthSnapshot) {
    println!("=== System Health ===\n");
    println!("Status: {} (score {:.1})", snapshot.status, snapshot.score);
    println!();

    println!("Components:");
    for (name, component) in &snapshot.components {
        println!(
            "  {:<10} {:<8} {:>3}  {}",
            name,
            component.status.as_str(),
            component.score,
            component.message
        );
    }
    println!();

    if !snapshot.alerts.is_empty() {
        println!("Active Alerts ({}):", snapshot.alerts.len());
        for alert in &snapshot.alerts {
            let repeats = if alert.occurrences > 1 {
                format!(" (x{})", alert.occurrences)
            } else {
                String::new()
            };
            println!(
                "  [{}] {}: {}{}",
                alert.severity, alert.title, alert.message, repeats
            );
        }
        println!();
    }
}

/// Prints request, task and per-site performance figures
pub fn print_performance(report: &PerformanceReport) {
    let system = &report.system;
    println!("=== Performance ===\n");

    println!("Overview:");
    println!("  Uptime: {}s", system.uptime_secs);
    println!(
        "  Tasks: {} completed ({} successful), {} active",
        system.completed_tasks, system.successful_tasks, system.active_tasks
    );
    println!(
        "  Requests: {} ({} failed, {})",
        system.total_requests,
        system.failed_requests,
        percent(system.error_rate)
    );
    println!("  Mean response: {:.0} ms", system.avg_response_ms);
    println!("  Throughput: {:.1} requests/min", system.throughput_per_minute);
    if let Some(hit_rate) = system.cache_hit_rate {
        println!("  Cache hit rate: {}", percent(hit_rate));
    }
    println!();

    if !report.sites.is_empty() {
        println!("Sites (slowest first):");
        for site in &report.sites {
            println!(
                "  {:<20} {:>6.0} ms  {} requests  {} success  {:.1} results/task",
                site.site_id,
                site.avg_response_ms,
                site.requests,
                percent(site.success_rate()),
                site.avg_results_per_task()
            );
        }
        println!();
    }
}

/// Prints recovery statistics per strategy
pub fn print_recovery(stats: &RecoveryStats) {
    if stats.total_attempts == 0 {
        return;
    }

    println!("=== Recovery ===\n");
    println!(
        "Attempts: {} ({} successful, {} exhausted), mean {:.2} ms",
        stats.total_attempts, stats.successful_attempts, stats.exhausted, stats.avg_latency_ms
    );
    for (name, strategy) in &stats.by_strategy {
        println!(
            "  {:<22} {:>4} attempts  {}",
            name,
            strategy.attempts,
            percent(strategy.success_rate())
        );
    }
    println!();
}

/// Prints every proxy with its health
pub fn print_proxies(records: &[ProxyRecord]) {
    println!("=== Proxies ({}) ===\n", records.len());

    for record in records {
        println!(
            "  {:<8} {:<24} {:<8} score {:>3}  {} ok / {} failed  {:.0} ms{}",
            record.protocol.as_str(),
            record.id(),
            if record.is_active { "active" } else { "inactive" },
            record.health_score,
            record.success_count,
            record.failure_count,
            record.avg_latency_ms,
            record
                .last_error
                .as_ref()
                .map(|e| format!("  ({})", e))
                .unwrap_or_default()
        );
    }
    println!();
}

/// Formats a 0-1 ratio as a percentage
pub(crate) fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}
