//! HTTP fetcher implementation
//!
//! This module handles the network side of a site search:
//! - Building HTTP clients with proper user agent strings
//! - One pooled client per egress proxy
//! - Turning responses and transport errors into classified failures
//! - Reading `Retry-After` hints

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client};
use tracing::debug;
use url::Url;

use crate::config::UserAgentConfig;
use crate::limiter::MAX_RETRY_AFTER_SECS;
use crate::proxy::ProxyRecord;
use crate::state::{classify_message, CrawlingError, FailureKind, RequestOutcome};
use crate::ProxyError;

/// Maximum redirect hops followed for one request
const MAX_REDIRECTS: usize = 10;

/// One request the crawl task wants made
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub site_id: String,
    pub url: Url,

    /// Egress proxy; `None` goes direct
    pub proxy: Option<ProxyRecord>,

    pub timeout: Duration,
}

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    /// HTTP status code
    pub status_code: u16,
    /// Content-Type header value
    pub content_type: String,
    /// Page body content
    pub body: String,
}

/// Result of a fetch operation
#[derive(Debug, Clone)]
pub enum FetchResult {
    /// The site answered with a 2xx response
    Success(FetchedPage),

    /// The site answered with an error status
    HttpError {
        /// The HTTP status code
        status_code: u16,
        /// `Retry-After` hint in seconds, if the server sent one
        retry_after: Option<u64>,
    },

    /// No usable response arrived (timeout, refused, DNS, broken body)
    NetworkError {
        /// Classified failure kind
        kind: FailureKind,
        /// Error description
        error: String,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchResult::Success(page) => Some(page.status_code),
            FetchResult::HttpError { status_code, .. } => Some(*status_code),
            FetchResult::NetworkError { .. } => None,
        }
    }

    /// Body size in bytes; zero for failures
    pub fn bytes(&self) -> u64 {
        match self {
            FetchResult::Success(page) => page.body.len() as u64,
            _ => 0,
        }
    }

    /// The outcome reported to the rate limiter
    pub fn outcome(&self, latency: Duration) -> RequestOutcome {
        match self {
            FetchResult::Success(page) => RequestOutcome {
                status_code: Some(page.status_code),
                ..RequestOutcome::success(latency)
            },
            FetchResult::HttpError {
                status_code,
                retry_after,
            } => {
                let outcome = RequestOutcome::failure(latency, Some(*status_code));
                match retry_after {
                    Some(secs) => outcome.with_retry_after(*secs),
                    None => outcome,
                }
            }
            FetchResult::NetworkError { .. } => RequestOutcome::failure(latency, None),
        }
    }

    /// Splits into the page or a classified error
    pub fn into_page(self) -> Result<FetchedPage, CrawlingError> {
        match self {
            FetchResult::Success(page) => Ok(page),
            FetchResult::HttpError { status_code, .. } => Err(CrawlingError::from_status(status_code)),
            FetchResult::NetworkError { kind, error } => Err(CrawlingError::new(kind, error)),
        }
    }
}

/// Performs network requests for crawl tasks
///
/// Implementations must not panic on network failure; every failure is a
/// `FetchResult` variant.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult;

    /// Drops and rebuilds whatever execution resource the fetcher holds
    async fn recycle(&self) {}
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `proxy` - Egress proxy to route every request through, if any
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(ProxyError)` - The proxy was unusable or the client failed to build
///
/// # Example
///
/// ```no_run
/// use meshhunt::config::UserAgentConfig;
/// use meshhunt::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "MeshHunt".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, None).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    proxy: Option<&ProxyRecord>,
) -> Result<Client, ProxyError> {
    let mut builder = Client::builder()
        .user_agent(config.header_value())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy.to_reqwest_proxy()?);
    }

    Ok(builder.build()?)
}

/// `Fetcher` backed by reqwest
///
/// Keeps one client per proxy so connection pools are reused across
/// requests. `recycle` drops every client.
pub struct ReqwestFetcher {
    user_agent: UserAgentConfig,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestFetcher {
    pub fn new(user_agent: UserAgentConfig) -> Result<Self, ProxyError> {
        let direct = build_http_client(&user_agent, None)?;
        let mut clients = HashMap::new();
        clients.insert(None, direct);
        Ok(Self {
            user_agent,
            clients: Mutex::new(clients),
        })
    }

    fn client_for(&self, proxy: Option<&ProxyRecord>) -> Result<Client, ProxyError> {
        let key = proxy.map(ProxyRecord::id);
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = build_http_client(&self.user_agent, proxy)?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        let client = match self.client_for(request.proxy.as_ref()) {
            Ok(client) => client,
            Err(e) => {
                return FetchResult::NetworkError {
                    kind: FailureKind::NetworkError,
                    error: e.to_string(),
                }
            }
        };

        let response = match client
            .get(request.url.clone())
            .timeout(request.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_transport_error(&e),
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            debug!("{} answered HTTP {}", request.site_id, status.as_u16());
            return FetchResult::HttpError {
                status_code: status.as_u16(),
                retry_after,
            };
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        match response.text().await {
            Ok(body) => FetchResult::Success(FetchedPage {
                final_url,
                status_code: status.as_u16(),
                content_type,
                body,
            }),
            Err(e) => classify_transport_error(&e),
        }
    }

    async fn recycle(&self) {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = clients.len();
        clients.clear();
        debug!("Recycled {} HTTP clients", dropped);
    }
}

/// Maps a reqwest error onto a failure kind
fn classify_transport_error(error: &reqwest::Error) -> FetchResult {
    // reqwest's Display hides the cause, so walk the source chain
    let mut text = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }

    let kind = if error.is_timeout() {
        FailureKind::Timeout
    } else {
        match classify_message(&text) {
            FailureKind::Unknown => FailureKind::NetworkError,
            kind => kind,
        }
    };

    FetchResult::NetworkError { kind, error: text }
}

/// Parses a `Retry-After` value: delta seconds or an HTTP date
///
/// The result is capped at [`MAX_RETRY_AFTER_SECS`].
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs.min(MAX_RETRY_AFTER_SECS));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let secs = (at.with_timezone(&Utc) - now).num_seconds();
    Some((secs.max(0) as u64).min(MAX_RETRY_AFTER_SECS))
}
