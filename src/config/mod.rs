//! Configuration module for Meshhunt
//!
//! This module handles loading, parsing, and validating versioned TOML
//! configuration files: crawler limits, pacing defaults, the searched sites,
//! egress proxies and health thresholds.
//!
//! # Example
//!
//! ```no_run
//! use meshhunt::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("meshhunt.toml")).unwrap();
//! for site in config.enabled_sites() {
//!     println!("{}: {:?}", site.id, config.policy_for_site(site));
//! }
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CrawlerConfig, HealthConfig, ProxyConfig, RateLimitConfig, RateLimitOverride,
    SiteConfig, UserAgentConfig, CONFIG_VERSION, QUERY_PLACEHOLDER,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
