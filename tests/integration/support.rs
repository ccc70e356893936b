//! Shared fixtures for the integration tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meshhunt::config::{parse_config, Config, SiteConfig};
use meshhunt::crawler::{
    FetchRequest, FetchResult, FetchedPage, Fetcher, PageExtractor, ResultExtractor, SearchHit,
    Services,
};
use meshhunt::proxy::{ProxyProbe, ProxyRecord};
use meshhunt::state::{CrawlingError, FailureKind};

/// Builds a validated config with fast pacing for the given sites
///
/// Each site is `(id, search_url)`. Adaptive pacing is off so failures do
/// not slow the tests down.
pub fn test_config(sites: &[(&str, &str)], proxies: &[&str], max_concurrent: u32) -> Config {
    let mut toml = format!(
        r#"
version = 1

[crawler]
max-concurrent-tasks = {}
request-timeout = 2000
max-attempts-per-site = 5

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[rate-limit]
requests-per-second = 100.0
requests-per-minute = 1000
requests-per-hour = 10000
burst-allowance = 10
adaptive-delay = false
"#,
        max_concurrent
    );

    for (id, url) in sites {
        toml.push_str(&format!(
            "\n[[site]]\nid = \"{}\"\nsearch-url = \"{}\"\n",
            id, url
        ));
    }

    if !proxies.is_empty() {
        let list: Vec<String> = proxies.iter().map(|p| format!("\"{}\"", p)).collect();
        toml.push_str(&format!(
            "\n[proxy]\nenabled = true\nlist = [{}]\n",
            list.join(", ")
        ));
    }

    parse_config(&toml).expect("test config is valid")
}

/// Services around a scripted fetcher
pub fn scripted_services(config: &Config, fetcher: Arc<ScriptedFetcher>) -> Services {
    Services::with_collaborators(config, fetcher, Arc::new(PageExtractor), Arc::new(AlwaysUp))
}

pub fn page(body: &str) -> FetchResult {
    FetchResult::Success(FetchedPage {
        final_url: "https://assets.example/search?q=test".to_string(),
        status_code: 200,
        content_type: "text/html".to_string(),
        body: body.to_string(),
    })
}

pub fn http(status_code: u16) -> FetchResult {
    FetchResult::HttpError {
        status_code,
        retry_after: None,
    }
}

pub fn network(kind: FailureKind) -> FetchResult {
    FetchResult::NetworkError {
        kind,
        error: format!("scripted {}", kind),
    }
}

/// A request as seen by the scripted fetcher
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub site_id: String,
    pub proxy: Option<String>,
}

/// Replays a per-site script of fetch results
///
/// Once a site's script is used up every further request succeeds.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<FetchResult>>>,
    seen: Mutex<Vec<SeenRequest>>,
    recycled: AtomicUsize,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch takes `delay` before answering
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn script(self, site_id: &str, results: Vec<FetchResult>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(site_id.to_string(), results.into());
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_for(&self, site_id: &str) -> Vec<SeenRequest> {
        self.seen()
            .into_iter()
            .filter(|r| r.site_id == site_id)
            .collect()
    }

    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.seen.lock().unwrap().push(SeenRequest {
            site_id: request.site_id.clone(),
            proxy: request.proxy.as_ref().map(ProxyRecord::id),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.site_id)
            .and_then(VecDeque::pop_front);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| page("<html>results</html>"))
    }

    async fn recycle(&self) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
    }
}

/// Probe that reports every proxy healthy
pub struct AlwaysUp;

#[async_trait]
impl ProxyProbe for AlwaysUp {
    async fn probe(&self, _proxy: &ProxyRecord) -> Result<Duration, String> {
        Ok(Duration::from_millis(5))
    }
}

/// Fails with a parse error unless the fallback rules are in use
#[derive(Default)]
pub struct FallbackOnlyExtractor {
    pub fallback_calls: AtomicUsize,
}

impl ResultExtractor for FallbackOnlyExtractor {
    fn extract(
        &self,
        site: &SiteConfig,
        page: &FetchedPage,
        use_fallback: bool,
    ) -> Result<Vec<SearchHit>, CrawlingError> {
        if !use_fallback {
            return Err(CrawlingError::new(
                FailureKind::ParseError,
                "primary rules found no result cards",
            ));
        }
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![SearchHit {
            site_id: site.id.clone(),
            title: "Benchy".to_string(),
            url: page.final_url.clone(),
            snippet: Some("fallback".to_string()),
        }])
    }
}
