//! Markdown report generation
//!
//! This module renders a run report as markdown: the search outcome per
//! site, system health with alerts, recovery activity and performance.

use crate::output::stats::percent;
use crate::output::RunReport;
use crate::HuntError;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes a markdown report to `output_path`
///
/// # Arguments
///
/// * `report` - The collected run report
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the report
/// * `Err(HuntError)` - Failed to write the file
pub fn write_markdown_report(report: &RunReport, output_path: &Path) -> Result<(), HuntError> {
    let markdown = format_markdown_report(report);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run report as markdown
pub fn format_markdown_report(report: &RunReport) -> String {
    let mut md = String::new();

    md.push_str("# Meshhunt Run Report\n\n");
    md.push_str(&format!("- **Generated**: {}\n", report.generated_at.to_rfc3339()));
    if let Some(hash) = &report.config_hash {
        md.push_str(&format!("- **Config Hash**: {}\n", hash));
    }
    md.push('\n');

    if let Some(search) = &report.search {
        md.push_str(&format!("## Search: `{}`\n\n", search.query));
        md.push_str(&format!(
            "{}, {} results in {:.1}s\n\n",
            search.summary_line(),
            search.total_hits(),
            search.elapsed_ms / 1000.0
        ));

        md.push_str("| Site | Status | Attempts | Results | Recovery | Last Error |\n");
        md.push_str("|------|--------|----------|---------|----------|------------|\n");
        for outcome in &search.outcomes {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                outcome.site_id,
                outcome.status.as_str(),
                outcome.attempts,
                outcome.hits.len(),
                if outcome.strategies.is_empty() {
                    "-".to_string()
                } else {
                    outcome.strategies.join(", ")
                },
                outcome
                    .last_error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "-".to_string())
            ));
        }
        md.push('\n');
    }

    // Health
    let health = &report.health;
    md.push_str("## System Health\n\n");
    md.push_str(&format!(
        "**Status**: {} (score {:.1})\n\n",
        health.status, health.score
    ));
    md.push_str("| Component | Status | Score | Detail |\n");
    md.push_str("|-----------|--------|-------|--------|\n");
    for (name, component) in &health.components {
        md.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            name, component.status, component.score, component.message
        ));
    }
    md.push('\n');

    if !health.alerts.is_empty() {
        md.push_str("### Active Alerts\n\n");
        for alert in &health.alerts {
            md.push_str(&format!(
                "- **[{}] {}**: {} ({})\n",
                alert.severity,
                alert.title,
                alert.message,
                alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        md.push('\n');
    }

    // Recovery
    let recovery = &report.recovery;
    if recovery.total_attempts > 0 {
        md.push_str("## Recovery\n\n");
        md.push_str(&format!(
            "- **Attempts**: {} ({} successful, {} exhausted)\n\n",
            recovery.total_attempts, recovery.successful_attempts, recovery.exhausted
        ));
        md.push_str("| Strategy | Attempts | Success Rate |\n");
        md.push_str("|----------|----------|--------------|\n");
        for (name, stats) in &recovery.by_strategy {
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                name,
                stats.attempts,
                percent(stats.success_rate())
            ));
        }
        md.push('\n');
    }

    // Performance
    let system = &report.performance.system;
    md.push_str("## Performance\n\n");
    md.push_str(&format!("- **Requests**: {}\n", system.total_requests));
    md.push_str(&format!("- **Error Rate**: {}\n", percent(system.error_rate)));
    md.push_str(&format!(
        "- **Mean Response**: {:.0} ms\n",
        system.avg_response_ms
    ));
    md.push_str(&format!(
        "- **Proxies**: {} active of {}\n\n",
        report.proxies.active, report.proxies.total
    ));

    if !report.performance.sites.is_empty() {
        md.push_str("| Site | Mean Response (ms) | Requests | Task Success |\n");
        md.push_str("|------|--------------------|----------|--------------|\n");
        for site in &report.performance.sites {
            md.push_str(&format!(
                "| {} | {:.0} | {} | {} |\n",
                site.site_id,
                site.avg_response_ms,
                site.requests,
                percent(site.success_rate())
            ));
        }
        md.push('\n');
    }

    md
}
