//! Failure taxonomy for crawl requests
//!
//! Every failed request or extraction is reduced to one `FailureKind`. The
//! recovery orchestrator selects strategies by kind and the health aggregator
//! tallies them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a crawl failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    // ===== Transient Network =====
    /// Generic network failure (reset connection, broken body, 5xx)
    NetworkError,

    /// The request did not complete in time
    Timeout,

    /// The remote host refused the connection
    ConnectionRefused,

    /// The host name could not be resolved
    DnsError,

    // ===== Blocking =====
    /// The site answered with a block page or HTTP 403
    BlockedBySite,

    /// The egress address has been banned
    IpBanned,

    /// HTTP 429 or an explicit throttling response
    RateLimited,

    // ===== Structural =====
    /// The extraction rules found nothing to extract
    SelectorNotFound,

    /// The response body could not be parsed
    ParseError,

    /// The response was not the expected kind of content
    InvalidContent,

    // ===== Resource Exhaustion =====
    /// The execution resource (browser, worker) crashed
    ResourceCrash,

    /// The execution resource ran out of memory
    OutOfMemory,

    // ===== Everything Else =====
    /// Anything that does not fit the categories above
    Unknown,
}

/// Coarse grouping of failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Retryable with backoff
    TransientNetwork,
    /// Retryable with a proxy or pacing change
    Blocking,
    /// Retryable with fallback extraction rules
    Structural,
    /// Retryable after recycling the execution resource
    ResourceExhaustion,
    /// Terminal for the site; the job continues with other sites
    Other,
}

impl FailureKind {
    /// All failure kinds, in declaration order
    pub const ALL: [FailureKind; 13] = [
        Self::NetworkError,
        Self::Timeout,
        Self::ConnectionRefused,
        Self::DnsError,
        Self::BlockedBySite,
        Self::IpBanned,
        Self::RateLimited,
        Self::SelectorNotFound,
        Self::ParseError,
        Self::InvalidContent,
        Self::ResourceCrash,
        Self::OutOfMemory,
        Self::Unknown,
    ];

    /// Returns the class this kind belongs to
    pub fn class(&self) -> FailureClass {
        match self {
            Self::NetworkError | Self::Timeout | Self::ConnectionRefused | Self::DnsError => {
                FailureClass::TransientNetwork
            }
            Self::BlockedBySite | Self::IpBanned | Self::RateLimited => FailureClass::Blocking,
            Self::SelectorNotFound | Self::ParseError | Self::InvalidContent => {
                FailureClass::Structural
            }
            Self::ResourceCrash | Self::OutOfMemory => FailureClass::ResourceExhaustion,
            Self::Unknown => FailureClass::Other,
        }
    }

    /// Returns true if some strategy other than degradation may fix this kind
    pub fn is_retryable(&self) -> bool {
        !matches!(self.class(), FailureClass::Other)
    }

    /// Severity assigned when the caller does not supply one
    pub fn default_severity(&self) -> Severity {
        match self.class() {
            FailureClass::TransientNetwork | FailureClass::Structural => Severity::Medium,
            FailureClass::Blocking => Severity::High,
            FailureClass::ResourceExhaustion => Severity::Critical,
            FailureClass::Other => Severity::Medium,
        }
    }

    /// Converts the kind to its snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection_refused",
            Self::DnsError => "dns_error",
            Self::BlockedBySite => "blocked_by_site",
            Self::IpBanned => "ip_banned",
            Self::RateLimited => "rate_limited",
            Self::SelectorNotFound => "selector_not_found",
            Self::ParseError => "parse_error",
            Self::InvalidContent => "invalid_content",
            Self::ResourceCrash => "resource_crash",
            Self::OutOfMemory => "out_of_memory",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a kind from its snake_case name
    ///
    /// Returns None if the string doesn't match any known kind.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a failure is for the running job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A classified failure handed to the recovery orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlingError {
    /// The failure category
    pub kind: FailureKind,

    /// How severe the failure is
    pub severity: Severity,

    /// Human readable description
    pub message: String,

    /// HTTP status, when the failure came from a response
    pub status_code: Option<u16>,
}

impl CrawlingError {
    /// Creates an error with the kind's default severity
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            status_code: None,
        }
    }

    /// Builds an error from an HTTP status code
    pub fn from_status(status_code: u16) -> Self {
        let kind = classify_status(status_code);
        Self {
            kind,
            severity: kind.default_severity(),
            message: format!("HTTP {}", status_code),
            status_code: Some(status_code),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

impl fmt::Display for CrawlingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.severity, self.message)
    }
}

impl std::error::Error for CrawlingError {}

/// Maps an HTTP status code to a failure kind
///
/// | Status | Kind |
/// |--------|------|
/// | 429 | RateLimited |
/// | 401, 403, 451 | BlockedBySite |
/// | 407 | IpBanned (proxy rejected us) |
/// | 408, 504 | Timeout |
/// | 5xx | NetworkError |
/// | 415, 422 | InvalidContent |
/// | other | Unknown |
pub fn classify_status(status_code: u16) -> FailureKind {
    match status_code {
        429 => FailureKind::RateLimited,
        401 | 403 | 451 => FailureKind::BlockedBySite,
        407 => FailureKind::IpBanned,
        408 | 504 => FailureKind::Timeout,
        500..=599 => FailureKind::NetworkError,
        415 | 422 => FailureKind::InvalidContent,
        _ => FailureKind::Unknown,
    }
}

/// Guesses a failure kind from free-form error text
///
/// Used for errors surfaced by collaborators that only report a message.
pub fn classify_message(message: &str) -> FailureKind {
    let msg = message.to_ascii_lowercase();

    // Order matters: "timed out" beats "connection" and so on.
    const RULES: &[(&[&str], FailureKind)] = &[
        (&["out of memory", "oomkilled", "heap limit"], FailureKind::OutOfMemory),
        (&["crash", "target closed", "browser closed"], FailureKind::ResourceCrash),
        (&["timeout", "timed out"], FailureKind::Timeout),
        (&["dns", "name not resolved", "failed to lookup"], FailureKind::DnsError),
        (&["connection refused", "econnrefused"], FailureKind::ConnectionRefused),
        (&["too many requests", "rate limit", "429"], FailureKind::RateLimited),
        (&["banned", "blacklisted"], FailureKind::IpBanned),
        (&["captcha", "access denied", "forbidden", "blocked"], FailureKind::BlockedBySite),
        (&["selector", "no results found"], FailureKind::SelectorNotFound),
        (&["parse", "unexpected token", "malformed"], FailureKind::ParseError),
        (&["invalid content", "content-type", "unexpected content"], FailureKind::InvalidContent),
        (&["network", "connection reset", "socket", "econnreset"], FailureKind::NetworkError),
    ];

    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| msg.contains(n)))
        .map(|(_, kind)| *kind)
        .unwrap_or(FailureKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        for kind in FailureKind::ALL {
            assert_eq!(FailureKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FailureKind::parse("bogus"), None);
    }

    #[test]
    fn test_classes() {
        assert_eq!(FailureKind::Timeout.class(), FailureClass::TransientNetwork);
        assert_eq!(FailureKind::IpBanned.class(), FailureClass::Blocking);
        assert_eq!(FailureKind::ParseError.class(), FailureClass::Structural);
        assert_eq!(FailureKind::OutOfMemory.class(), FailureClass::ResourceExhaustion);
        assert_eq!(FailureKind::Unknown.class(), FailureClass::Other);
        assert!(!FailureKind::Unknown.is_retryable());
        assert!(FailureKind::RateLimited.is_retryable());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(429), FailureKind::RateLimited);
        assert_eq!(classify_status(403), FailureKind::BlockedBySite);
        assert_eq!(classify_status(503), FailureKind::NetworkError);
        assert_eq!(classify_status(504), FailureKind::Timeout);
        assert_eq!(classify_status(404), FailureKind::Unknown);
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(classify_message("operation timed out"), FailureKind::Timeout);
        assert_eq!(
            classify_message("getaddrinfo: DNS lookup failed"),
            FailureKind::DnsError
        );
        assert_eq!(
            classify_message("Connection refused (os error 111)"),
            FailureKind::ConnectionRefused
        );
        assert_eq!(
            classify_message("Selector '.result-card' matched nothing"),
            FailureKind::SelectorNotFound
        );
        assert_eq!(classify_message("JavaScript heap out of memory"), FailureKind::OutOfMemory);
        assert_eq!(classify_message("something odd"), FailureKind::Unknown);
    }

    #[test]
    fn test_from_status_sets_code() {
        let err = CrawlingError::from_status(429);
        assert_eq!(err.kind, FailureKind::RateLimited);
        assert_eq!(err.status_code, Some(429));
        assert_eq!(err.severity, Severity::High);
    }

    #[test]
    fn test_display() {
        let err = CrawlingError::new(FailureKind::Timeout, "no answer");
        assert_eq!(err.to_string(), "timeout (medium): no answer");
    }
}
