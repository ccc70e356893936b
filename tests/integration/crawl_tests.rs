//! Full searches through the crawl driver with scripted fetch results

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use meshhunt::crawler::{Coordinator, Services, SiteStatus};
use meshhunt::health::{HealthStatus, RECOVERY};
use meshhunt::proxy::ProxyProbe;
use meshhunt::state::FailureKind;
use meshhunt::HuntError;

use crate::support::{
    http, network, scripted_services, test_config, AlwaysUp, FallbackOnlyExtractor,
    ScriptedFetcher,
};

const THINGIVERSE: (&str, &str) = ("thingiverse", "https://www.thingiverse.com/search?q={query}");
const PRINTABLES: (&str, &str) = ("printables", "https://www.printables.com/search/models?q={query}");
const CULTS: (&str, &str) = ("cults3d", "https://cults3d.com/en/search?q={query}");

#[tokio::test]
async fn test_search_all_sites_succeed() {
    let config = test_config(&[THINGIVERSE, PRINTABLES], &[], 3);
    let fetcher = Arc::new(ScriptedFetcher::new());
    let coordinator = Coordinator::new(&config, scripted_services(&config, fetcher.clone()));

    let summary = coordinator.search("benchy").await.unwrap();

    assert_eq!(summary.summary_line(), "2/2 sites succeeded");
    assert_eq!(summary.total_hits(), 2);
    // Outcomes keep configuration order
    assert_eq!(summary.outcomes[0].site_id, "thingiverse");
    assert_eq!(summary.outcomes[1].site_id, "printables");
    assert!(summary.outcomes.iter().all(|o| o.attempts == 1));

    let metrics = coordinator.services().metrics.system_metrics();
    assert_eq!(metrics.completed_tasks, 2);
    assert_eq!(metrics.successful_tasks, 2);
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(coordinator.services().recovery.stats().total_attempts, 0);
    assert_eq!(fetcher.seen().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_site_switches_proxy() {
    let config = test_config(
        &[THINGIVERSE],
        &["http://10.0.0.1:8080", "http://10.0.0.2:8080"],
        3,
    );
    let fetcher = Arc::new(ScriptedFetcher::new().script("thingiverse", vec![http(429)]));
    let coordinator = Coordinator::new(&config, scripted_services(&config, fetcher.clone()));

    let summary = coordinator.search("benchy").await.unwrap();
    let outcome = summary.outcome("thingiverse").unwrap();

    assert_eq!(outcome.status, SiteStatus::Completed);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.strategies, vec!["proxy_switch"]);
    assert_eq!(outcome.last_error.as_ref().unwrap().kind, FailureKind::RateLimited);

    let seen = fetcher.seen_for("thingiverse");
    assert_eq!(seen[0].proxy.as_deref(), Some("10.0.0.1:8080"));
    assert_eq!(seen[1].proxy.as_deref(), Some("10.0.0.2:8080"));

    // The 429 counted against the first proxy
    let proxies = &coordinator.services().proxies;
    assert_eq!(proxies.get("10.0.0.1:8080").unwrap().health_score, 80);
    assert_eq!(proxies.get("10.0.0.2:8080").unwrap().success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_without_proxies_slows_site() {
    let config = test_config(&[PRINTABLES], &[], 3);
    let fetcher = Arc::new(ScriptedFetcher::new().script("printables", vec![http(429)]));
    let coordinator = Coordinator::new(&config, scripted_services(&config, fetcher.clone()));

    let summary = coordinator.search("vase").await.unwrap();
    let outcome = summary.outcome("printables").unwrap();

    // proxy_switch had nothing to offer, so the chain moved on
    assert_eq!(outcome.status, SiteStatus::Completed);
    assert_eq!(outcome.strategies, vec!["proxy_switch", "rate_adjustment"]);
    assert!(fetcher.seen_for("printables").iter().all(|r| r.proxy.is_none()));

    let policy = coordinator.services().limiter.policy_for("printables");
    assert_eq!(policy.requests_per_second, 50.0);
    assert_eq!(policy.requests_per_minute, 700);

    let stats = coordinator.services().recovery.stats();
    assert_eq!(stats.by_strategy["proxy_switch"].successes, 0);
    assert_eq!(stats.by_strategy["rate_adjustment"].successes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_timeouts_skip_site() {
    let config = test_config(&[CULTS], &[], 3);
    let fetcher = Arc::new(ScriptedFetcher::new().script(
        "cults3d",
        vec![network(FailureKind::Timeout), network(FailureKind::Timeout)],
    ));
    let coordinator = Coordinator::new(&config, scripted_services(&config, fetcher.clone()));

    let summary = coordinator.search("gear").await.unwrap();
    let outcome = summary.outcome("cults3d").unwrap();

    assert_eq!(outcome.status, SiteStatus::Skipped);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.strategies, vec!["network_retry", "graceful_degradation"]);
    assert!(outcome.hits.is_empty());
    assert_eq!(summary.summary_line(), "0/1 sites succeeded");

    let services = coordinator.services();
    let events = services.health.recent_errors();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.kind == FailureKind::Timeout));
    assert_eq!(services.metrics.system_metrics().failed_requests, 2);

    let snapshot = services.health.perform_health_check();
    assert_ne!(snapshot.component(RECOVERY).unwrap().status, HealthStatus::Unknown);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_ceiling_fails_site() {
    let mut config = test_config(&[THINGIVERSE], &[], 3);
    config.crawler.max_recovery_attempts = 2;
    // First 403: proxy_switch fails (no proxies), rate_adjustment succeeds.
    // Second 403: the chain already used both of its attempts.
    let fetcher = Arc::new(
        ScriptedFetcher::new().script("thingiverse", vec![http(403), http(403)]),
    );
    let coordinator = Coordinator::new(&config, scripted_services(&config, fetcher.clone()));

    let outcome = coordinator.search_site("thingiverse", "dragon").await.unwrap();

    assert_eq!(outcome.status, SiteStatus::Failed);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.strategies, vec!["proxy_switch", "rate_adjustment"]);
    assert_eq!(
        outcome.last_error.as_ref().unwrap().kind,
        FailureKind::BlockedBySite
    );

    let stats = coordinator.services().recovery.stats();
    assert_eq!(stats.exhausted, 1);
    assert_eq!(stats.total_attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_site_attempt_limit() {
    let mut config = test_config(&[PRINTABLES], &[], 3);
    config.crawler.max_attempts_per_site = 1;
    let fetcher = Arc::new(
        ScriptedFetcher::new().script("printables", vec![network(FailureKind::ConnectionRefused)]),
    );
    let coordinator = Coordinator::new(&config, scripted_services(&config, fetcher.clone()));

    // Recovery asks for a retry but the site has no attempts left
    let outcome = coordinator.search_site("printables", "vase").await.unwrap();

    assert_eq!(outcome.status, SiteStatus::Failed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.strategies, vec!["network_retry"]);
    assert_eq!(fetcher.seen().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_parse_error_uses_fallback_rules() {
    let config = test_config(&[PRINTABLES], &[], 3);
    let fetcher = Arc::new(ScriptedFetcher::new());
    let extractor = Arc::new(FallbackOnlyExtractor::default());
    let services = Services::with_collaborators(
        &config,
        fetcher.clone(),
        extractor.clone(),
        Arc::new(AlwaysUp),
    );
    let coordinator = Coordinator::new(&config, services);

    let summary = coordinator.search("benchy").await.unwrap();
    let outcome = summary.outcome("printables").unwrap();

    assert_eq!(outcome.status, SiteStatus::Completed);
    assert_eq!(outcome.strategies, vec!["rule_repair"]);
    assert_eq!(outcome.hits[0].snippet.as_deref(), Some("fallback"));
    assert_eq!(extractor.fallback_calls.load(Ordering::SeqCst), 1);

    let metrics = coordinator.services().metrics.report();
    let task = &metrics.recent_tasks[0];
    assert_eq!(task.parses, 2);
    assert_eq!(task.failed_parses, 1);
    assert_eq!(task.results, 1);
}

#[tokio::test(start_paused = true)]
async fn test_resource_crash_recycles_fetcher() {
    let config = test_config(&[THINGIVERSE], &[], 3);
    let fetcher = Arc::new(
        ScriptedFetcher::new().script("thingiverse", vec![network(FailureKind::ResourceCrash)]),
    );
    let coordinator = Coordinator::new(&config, scripted_services(&config, fetcher.clone()));

    let summary = coordinator.search("benchy").await.unwrap();

    assert_eq!(summary.outcomes[0].status, SiteStatus::Completed);
    assert_eq!(summary.outcomes[0].strategies, vec!["restart_resource"]);
    assert_eq!(fetcher.recycled(), 1);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let sites = [THINGIVERSE, PRINTABLES, CULTS];

    let config = test_config(&sites, &[], 1);
    let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(30)));
    let coordinator = Coordinator::new(&config, scripted_services(&config, fetcher.clone()));
    coordinator.search("benchy").await.unwrap();
    assert_eq!(fetcher.max_in_flight(), 1);

    let config = test_config(&sites, &[], 3);
    let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(30)));
    let coordinator = Coordinator::new(&config, scripted_services(&config, fetcher.clone()));
    coordinator.search("benchy").await.unwrap();
    assert!(fetcher.max_in_flight() > 1);
}

#[tokio::test]
async fn test_cancel_interrupts_recovery_delay() {
    let config = test_config(&[CULTS], &[], 3);
    // network_retry waits a full second before the second attempt
    let fetcher = Arc::new(
        ScriptedFetcher::new().script("cults3d", vec![network(FailureKind::NetworkError)]),
    );
    let coordinator = Coordinator::new(&config, scripted_services(&config, fetcher.clone()));

    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let summary = coordinator.search("gear").await.unwrap();

    assert_eq!(summary.outcomes[0].status, SiteStatus::Cancelled);
    assert_eq!(summary.outcomes[0].attempts, 1);
    assert!(started.elapsed() < Duration::from_millis(900));

    // A cancelled coordinator refuses new searches
    assert!(coordinator.cancel_handle().is_cancelled());
    assert!(matches!(
        coordinator.search("gear").await,
        Err(HuntError::Cancelled)
    ));
}

#[tokio::test]
async fn test_unknown_site() {
    let config = test_config(&[THINGIVERSE], &[], 3);
    let coordinator = Coordinator::new(
        &config,
        scripted_services(&config, Arc::new(ScriptedFetcher::new())),
    );

    let result = coordinator.search_site("sketchfab", "benchy").await;
    assert!(matches!(result, Err(HuntError::UnknownSite(id)) if id == "sketchfab"));
}

#[tokio::test]
async fn test_background_tickers_run_and_stop() {
    let mut config = test_config(&[THINGIVERSE], &["http://10.0.0.1:8080"], 3);
    config.health.check_interval = 1000;
    let coordinator = Coordinator::new(
        &config,
        scripted_services(&config, Arc::new(ScriptedFetcher::new())),
    );

    let tickers = coordinator.start_background();
    assert_eq!(tickers.len(), 2);

    // Both tickers fire immediately
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(coordinator.services().health.last_snapshot().is_some());
    let proxy = coordinator.services().proxies.get("10.0.0.1:8080").unwrap();
    assert!(proxy.last_checked.is_some());

    for ticker in tickers {
        ticker.stop().await;
    }
}

#[tokio::test]
async fn test_probe_is_shared_with_services() {
    let config = test_config(&[], &["http://10.0.0.1:8080"], 3);
    let services = scripted_services(&config, Arc::new(ScriptedFetcher::new()));

    assert_eq!(services.proxies.len(), 1);
    let record = services.proxies.get("10.0.0.1:8080").unwrap();
    assert_eq!(services.probe.probe(&record).await, Ok(Duration::from_millis(5)));
}
