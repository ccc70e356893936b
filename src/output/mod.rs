//! Output module for search results and service reports
//!
//! This module handles:
//! - Collecting a run report from the live services
//! - Printing summaries to stdout
//! - Writing markdown reports and JSON

mod markdown;
pub mod stats;

pub use markdown::{format_markdown_report, write_markdown_report};
pub use stats::{print_health, print_performance, print_proxies, print_recovery, print_search_summary};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::crawler::{JobSummary, Services};
use crate::health::SystemHealthSnapshot;
use crate::metrics::PerformanceReport;
use crate::proxy::ProxyPoolStats;
use crate::recovery::RecoveryStats;
use crate::HuntError;

/// Everything worth reporting after a search
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,

    /// SHA-256 of the config file the run used
    pub config_hash: Option<String>,

    pub search: Option<JobSummary>,
    pub health: SystemHealthSnapshot,
    pub performance: PerformanceReport,
    pub recovery: RecoveryStats,
    pub proxies: ProxyPoolStats,
}

impl RunReport {
    /// Takes a fresh health snapshot and copies every service's figures
    pub fn collect(services: &Services, search: Option<JobSummary>, config_hash: Option<String>) -> Self {
        Self {
            generated_at: Utc::now(),
            config_hash,
            search,
            health: services.health.perform_health_check(),
            performance: services.metrics.report(),
            recovery: services.recovery.stats(),
            proxies: services.proxies.stats(),
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, HuntError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
