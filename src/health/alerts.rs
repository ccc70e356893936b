//! Operator alerts raised by the health aggregator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Alerts kept before the oldest are evicted
pub const MAX_ALERTS: usize = 100;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// One operator-facing alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,

    /// Health component that raised the alert
    pub component: String,

    /// When the alert was raised or last refreshed
    pub timestamp: DateTime<Utc>,

    pub acknowledged: bool,

    /// Removed automatically once the component is healthy again
    pub auto_resolve: bool,

    /// How many times the condition was observed while the alert was open
    pub occurrences: u32,
}

/// Bounded, deduplicated alert store
///
/// At most one unacknowledged alert exists per (component, severity); a
/// repeat refreshes it in place.
#[derive(Debug, Clone, Default)]
pub struct AlertBook {
    alerts: Vec<Alert>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises or refreshes an alert and returns its id
    pub fn raise(
        &mut self,
        component: &str,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
        auto_resolve: bool,
    ) -> Uuid {
        let now = Utc::now();
        if let Some(existing) = self
            .alerts
            .iter_mut()
            .find(|a| !a.acknowledged && a.component == component && a.severity == severity)
        {
            existing.message = message.into();
            existing.timestamp = now;
            existing.occurrences += 1;
            // A manual raise pins the alert
            existing.auto_resolve &= auto_resolve;
            return existing.id;
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            severity,
            title: title.into(),
            message: message.into(),
            component: component.to_string(),
            timestamp: now,
            acknowledged: false,
            auto_resolve,
            occurrences: 1,
        };
        let id = alert.id;
        self.alerts.push(alert);
        self.evict();
        id
    }

    fn evict(&mut self) {
        while self.alerts.len() > MAX_ALERTS {
            let victim = oldest(self.alerts.iter().enumerate().filter(|(_, a)| a.acknowledged))
                .or_else(|| oldest(self.alerts.iter().enumerate()));
            match victim {
                Some(idx) => {
                    self.alerts.remove(idx);
                }
                None => break,
            }
        }
    }

    /// Marks an alert as acknowledged; returns false if the id is unknown
    pub fn acknowledge(&mut self, id: Uuid) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Drops every alert; clearing an empty book is a no-op
    pub fn clear_all(&mut self) {
        self.alerts.clear();
    }

    /// Removes auto-resolving alerts for a component; returns how many
    pub fn resolve_component(&mut self, component: &str) -> usize {
        let before = self.alerts.len();
        self.alerts
            .retain(|a| !(a.auto_resolve && a.component == component));
        before - self.alerts.len()
    }

    /// Unacknowledged alerts, most severe first, then newest first
    pub fn active(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        active
    }

    pub fn all(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

fn oldest<'a>(alerts: impl Iterator<Item = (usize, &'a Alert)>) -> Option<usize> {
    alerts.min_by_key(|(_, a)| a.timestamp).map(|(idx, _)| idx)
}
