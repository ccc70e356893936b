//! State module for tracking request outcomes and failures
//!
//! This module provides the shared vocabulary used by every part of the
//! resilience core.
//!
//! # Components
//!
//! - `FailureKind`: The failure taxonomy consumed by recovery and health
//! - `CrawlingError`: A classified failure reported by a crawl task
//! - `RequestOutcome`: One observed request result
//! - `SiteRateState`: Per-site pacing state owned by the rate limiter

mod failure;
mod site_state;

// Re-export main types
pub use failure::{classify_message, classify_status, CrawlingError, FailureClass, FailureKind, Severity};
pub use site_state::{RequestOutcome, SiteRateState};
