use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::{Alert, ResourceUsage};
use crate::metrics::SystemMetrics;
use crate::proxy::ProxyPoolStats;

/// Score at or above which the system is healthy
pub const HEALTHY_SCORE: f64 = 80.0;

/// Score below which the system is critical
pub const CRITICAL_SCORE: f64 = 50.0;

/// Health of the whole system or one of its components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,

    /// The component could not be checked
    Unknown,
}

impl HealthStatus {
    /// Score a component contributes to the overall mean
    pub fn score(&self) -> u8 {
        match self {
            Self::Healthy => 100,
            Self::Warning => 60,
            Self::Critical => 20,
            Self::Unknown => 0,
        }
    }

    /// Maps a 0-100 score onto a status with the overall cut-offs
    pub fn from_score(score: f64) -> Self {
        if score < CRITICAL_SCORE {
            Self::Critical
        } else if score < HEALTHY_SCORE {
            Self::Warning
        } else {
            Self::Healthy
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Unknown => 1,
            Self::Warning => 2,
            Self::Critical => 3,
        }
    }

    /// The more severe of two statuses
    pub fn worst(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a single component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub score: u8,
    pub message: String,
}

impl ComponentHealth {
    /// A component with the default score for its status
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            score: status.score(),
            message: message.into(),
        }
    }

    /// A component scored directly, with the status derived from the score
    pub fn scored(score: f64, message: impl Into<String>) -> Self {
        let score = if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 100.0).round()
        };
        Self {
            status: HealthStatus::from_score(score),
            score: score as u8,
            message: message.into(),
        }
    }

    pub fn no_data() -> Self {
        Self::new(HealthStatus::Healthy, "no data")
    }
}

/// Raw figures the component scores were derived from
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub system: SystemMetrics,
    pub proxies: ProxyPoolStats,

    /// Share of recent failures that a strategy recovered
    pub recovery_rate: Option<f64>,

    pub resources: Option<ResourceUsage>,
}

/// Immutable result of one health check
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealthSnapshot {
    pub timestamp: DateTime<Utc>,

    /// Overall status, never `Unknown`
    pub status: HealthStatus,

    /// Mean of the component scores
    pub score: f64,

    pub components: BTreeMap<String, ComponentHealth>,

    /// Unacknowledged alerts, most severe first
    pub alerts: Vec<Alert>,

    pub metrics: HealthMetrics,
}

impl SystemHealthSnapshot {
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_score_cutoffs() {
        assert_eq!(HealthStatus::from_score(100.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(80.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(79.9), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(50.0), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(49.9), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(0.0), HealthStatus::Critical);
    }

    #[test]
    fn test_worst() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Warning),
            HealthStatus::Warning
        );
        assert_eq!(
            HealthStatus::Critical.worst(HealthStatus::Unknown),
            HealthStatus::Critical
        );
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Unknown),
            HealthStatus::Unknown
        );
    }

    #[test]
    fn test_scored_component() {
        let component = ComponentHealth::scored(72.4, "degraded");
        assert_eq!(component.status, HealthStatus::Warning);
        assert_eq!(component.score, 72);

        let clamped = ComponentHealth::scored(140.0, "");
        assert_eq!(clamped.score, 100);
    }

    #[test]
    fn test_scored_status_matches_rounded_score() {
        let edge = ComponentHealth::scored(79.6, "");
        assert_eq!(edge.score, 80);
        assert_eq!(edge.status, HealthStatus::Healthy);

        let low = ComponentHealth::scored(49.5, "");
        assert_eq!(low.score, 50);
        assert_eq!(low.status, HealthStatus::Warning);

        let below = ComponentHealth::scored(79.4, "");
        assert_eq!(below.score, 79);
        assert_eq!(below.status, HealthStatus::Warning);

        let nan = ComponentHealth::scored(f64::NAN, "");
        assert_eq!(nan.score, 0);
        assert_eq!(nan.status, HealthStatus::Critical);
    }
}
