//! Integration tests for the crawl driver
//!
//! `crawl_tests` drives full searches through a scripted fetcher so recovery
//! paths are deterministic; `http_tests` runs the real reqwest fetcher
//! against wiremock servers.

mod crawl_tests;
mod http_tests;
mod support;
