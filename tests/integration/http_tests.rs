//! End-to-end searches against a local HTTP server

use std::sync::Arc;

use meshhunt::config::Config;
use meshhunt::crawler::{Coordinator, PageExtractor, ReqwestFetcher, Services, SiteStatus};
use meshhunt::output::{format_markdown_report, RunReport};
use meshhunt::state::FailureKind;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::support::{test_config, AlwaysUp};

fn live_coordinator(config: &Config) -> Coordinator {
    let fetcher = ReqwestFetcher::new(config.user_agent.clone()).unwrap();
    let services = Services::with_collaborators(
        config,
        Arc::new(fetcher),
        Arc::new(PageExtractor),
        Arc::new(AlwaysUp),
    );
    Coordinator::new(config, services)
}

fn search_url(server: &MockServer, site_path: &str) -> String {
    format!("{}{}?q={{query}}", server.uri(), site_path)
}

#[tokio::test]
async fn test_live_search_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/thingiverse/search"))
        .and(query_param("q", "3d benchy"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string("<html><div class=\"card\">Benchy</div></html>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let url = search_url(&server, "/thingiverse/search");
    let config = test_config(&[("thingiverse", url.as_str())], &[], 2);
    let coordinator = live_coordinator(&config);

    let summary = coordinator.search("3d benchy").await.unwrap();

    assert_eq!(summary.summary_line(), "1/1 sites succeeded");
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.status, SiteStatus::Completed);
    assert_eq!(outcome.hits.len(), 1);
    assert!(outcome.hits[0].url.contains("/thingiverse/search"));

    let site = coordinator.services().metrics.site_stats("thingiverse").unwrap();
    assert_eq!(site.requests, 1);
    assert_eq!(site.successful_tasks, 1);
}

#[tokio::test]
async fn test_live_search_not_found_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/printables/search"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = search_url(&server, "/printables/search");
    let config = test_config(&[("printables", url.as_str())], &[], 2);
    let coordinator = live_coordinator(&config);

    let summary = coordinator.search("vase").await.unwrap();
    let outcome = &summary.outcomes[0];

    // No strategy knows what to do with a 404
    assert_eq!(outcome.status, SiteStatus::Skipped);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.strategies, vec!["graceful_degradation"]);
    let error = outcome.last_error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::Unknown);
    assert_eq!(error.status_code, Some(404));
}

#[tokio::test]
async fn test_live_search_recovers_from_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cults3d/search"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cults3d/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>gear</html>"),
        )
        .mount(&server)
        .await;

    let url = search_url(&server, "/cults3d/search");
    let config = test_config(&[("cults3d", url.as_str())], &[], 2);
    let coordinator = live_coordinator(&config);

    let summary = coordinator.search("gear").await.unwrap();
    let outcome = &summary.outcomes[0];

    assert_eq!(outcome.status, SiteStatus::Completed);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.strategies, vec!["network_retry"]);
    assert_eq!(
        outcome.last_error.as_ref().unwrap().kind,
        FailureKind::NetworkError
    );

    let stats = coordinator.services().recovery.stats();
    assert_eq!(stats.successful_attempts, 1);
    assert_eq!(stats.by_strategy["network_retry"].attempts, 1);
}

#[tokio::test]
async fn test_one_shot_search_and_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/thangs/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>dragon</html>"),
        )
        .mount(&server)
        .await;

    let url = search_url(&server, "/thangs/search");
    let config = test_config(&[("thangs", url.as_str())], &[], 2);

    let summary = meshhunt::crawler::search(&config, "dragon").await.unwrap();
    assert_eq!(summary.succeeded(), 1);
    assert_eq!(summary.query, "dragon");

    // A report over fresh services still renders
    let coordinator = live_coordinator(&config);
    let report = RunReport::collect(coordinator.services(), Some(summary), None);
    let json = report.to_json().unwrap();
    assert!(json.contains("\"status\": \"completed\""));
    assert!(format_markdown_report(&report).contains("## Search: `dragon`"));
}
