//! Meshhunt: a resilient multi-site crawler core for 3D asset search
//!
//! This crate implements the machinery that keeps a multi-site asset scraper
//! polite and self-healing: per-site request pacing, egress proxy rotation,
//! failure recovery strategies, and aggregated health reporting.

pub mod config;
pub mod crawler;
pub mod health;
pub mod limiter;
pub mod metrics;
pub mod output;
pub mod proxy;
pub mod recovery;
pub mod state;
pub mod ticker;

use thiserror::Error;

/// Main error type for Meshhunt operations
#[derive(Debug, Error)]
pub enum HuntError {
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Unknown site: {0}")]
    UnknownSite(String),

    #[error("Search was cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unsupported config version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid proxy entry: {0}")]
    InvalidProxy(#[from] ProxyError),
}

/// Proxy connection string and client errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid proxy connection string '{0}'")]
    InvalidConnectionString(String),

    #[error("Unsupported proxy protocol '{0}'")]
    UnsupportedProtocol(String),

    #[error("Missing port in proxy '{0}'")]
    MissingPort(String),

    #[error("Failed to build proxied client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Errors raised inside a recovery strategy
///
/// The orchestrator turns these into failed `RecoveryResult`s; they never
/// reach the crawl task.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("No active proxy available")]
    NoProxyAvailable,

    #[error("Strategy '{strategy}' failed: {reason}")]
    StrategyFailed { strategy: String, reason: String },
}

/// Result type alias for Meshhunt operations
pub type Result<T> = std::result::Result<T, HuntError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, Services};
pub use health::{HealthAggregator, SystemHealthSnapshot};
pub use limiter::{RateDecision, RateLimitPolicy, RateLimiter};
pub use metrics::PerformanceRecorder;
pub use proxy::{ProxyPool, ProxyRecord};
pub use recovery::{RecoveryAttemptContext, RecoveryOrchestrator, RecoveryResult};
pub use state::{CrawlingError, FailureKind, RequestOutcome, Severity};
