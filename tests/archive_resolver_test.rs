//! Integration tests for Wayback Machine snapshot resolution.

use std::time::{Duration, Instant};

use serde_json::json;
use wikiref_archiver::wayback::ArchiveResolver;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn resolver_for(server: &MockServer) -> ArchiveResolver {
    ArchiveResolver::with_endpoints(
        format!("{}/wayback/available", server.uri()),
        format!("{}/save/", server.uri()),
        Duration::from_secs(5),
    )
}

/// Availability response with no snapshot for the URL.
fn empty_availability() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "archived_snapshots": {}
    }))
}

#[tokio::test]
async fn test_no_snapshot_reports_reason() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wayback/available"))
        .respond_with(empty_availability())
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    let outcome = resolver
        .resolve("https://example.com/article", false, false)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.reason.as_deref(), Some("no-snapshot"));
    assert!(outcome.html.is_none());
    assert!(outcome.retry_after.is_none());
}

#[tokio::test]
async fn test_snapshot_found_fetches_html() {
    let server = MockServer::start().await;
    let snapshot_url = format!("{}/web/20200101123456/https://example.com/article", server.uri());

    Mock::given(method("GET"))
        .and(path("/wayback/available"))
        .and(query_param("url", "https://example.com/article"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "archived_snapshots": {
                "closest": {
                    "available": true,
                    "url": snapshot_url,
                    "timestamp": "20200101123456",
                    "status": "200"
                }
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex("^/web/.*"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>archived copy</body></html>", "text/html"),
        )
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    let outcome = resolver
        .resolve("https://example.com/article", true, false)
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.source.as_deref(), Some("wayback"));
    assert_eq!(outcome.archive_url.as_deref(), Some(snapshot_url.as_str()));
    assert!(outcome
        .html
        .as_deref()
        .is_some_and(|h| h.contains("archived copy")));

    let ts = outcome.timestamp.expect("timestamp should parse");
    assert_eq!(ts.to_rfc3339(), "2020-01-01T12:34:56+00:00");
}

#[tokio::test]
async fn test_snapshot_without_timestamp_is_still_used() {
    let server = MockServer::start().await;
    let snapshot_url = format!("{}/web/https://example.com/page", server.uri());

    Mock::given(method("GET"))
        .and(path("/wayback/available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "archived_snapshots": {
                "closest": { "url": snapshot_url }
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex("^/web/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>old</html>", "text/html"))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    let outcome = resolver.resolve("https://example.com/page", false, false).await;

    assert!(outcome.success);
    assert!(outcome.timestamp.is_none());
    assert!(outcome.html.is_some());
}

#[tokio::test]
async fn test_aggressive_triggers_save_and_returns_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wayback/available"))
        .respond_with(empty_availability())
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex("^/save/.*"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    let started = Instant::now();
    let outcome = resolver
        .resolve("https://example.com/missing", false, true)
        .await;

    // The save request is fire-and-forget; resolution must not wait for the
    // snapshot to materialize.
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!outcome.success);
    assert_eq!(outcome.reason.as_deref(), Some("wayback-save-triggered"));
    assert_eq!(outcome.retry_after, Some(Duration::from_secs(60)));
}

#[tokio::test]
async fn test_non_aggressive_does_not_trigger_save() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wayback/available"))
        .respond_with(empty_availability())
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex("^/save/.*"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    let outcome = resolver
        .resolve("https://example.com/missing", false, false)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.reason.as_deref(), Some("no-snapshot"));
}

#[tokio::test]
async fn test_availability_server_error_is_treated_as_miss() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wayback/available"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    let outcome = resolver.resolve("https://example.com/article", false, false).await;

    assert!(!outcome.success);
    assert_eq!(outcome.reason.as_deref(), Some("no-snapshot"));
}

#[tokio::test]
async fn test_unreachable_endpoint_never_panics() {
    // Nothing listens on this port; the resolver must swallow the connection
    // error and report it as a failed outcome.
    let resolver = ArchiveResolver::with_endpoints(
        "http://127.0.0.1:9/wayback/available".to_string(),
        "http://127.0.0.1:9/save/".to_string(),
        Duration::from_secs(1),
    );

    let outcome = resolver.resolve("https://example.com/article", true, true).await;

    assert!(!outcome.success);
    assert!(outcome
        .reason
        .as_deref()
        .is_some_and(|r| r.contains("Failed to query Wayback availability")));
}

#[tokio::test]
async fn test_snapshot_fetch_failure_is_reported() {
    let server = MockServer::start().await;
    let snapshot_url = format!("{}/web/20200101000000/https://example.com/gone", server.uri());

    Mock::given(method("GET"))
        .and(path("/wayback/available"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "archived_snapshots": {
                "closest": { "url": snapshot_url, "timestamp": "20200101000000" }
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex("^/web/.*"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server);
    let outcome = resolver.resolve("https://example.com/gone", false, false).await;

    assert!(!outcome.success);
    assert!(outcome
        .reason
        .as_deref()
        .is_some_and(|r| r.contains("Snapshot fetch returned HTTP 404")));
}
