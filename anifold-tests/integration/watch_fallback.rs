//! `/api/watch` server fallback through the HTTP router.

use std::sync::Arc;

use anifold_core::source::StreamingResult;
use anifold_core::testing::{MOCK_STREAM_URL, MockSource};
use anifold_core::SourceError;
use axum::http::{StatusCode, header};

use crate::fixtures::{app, get, json_body, manager};

fn three_server_source() -> Arc<MockSource> {
    Arc::new(
        MockSource::new("Zoro")
            .with_title("show", "Show", 12)
            .with_stream_error(
                "hd-2",
                SourceError::Network {
                    reason: "connection refused".to_string(),
                },
            )
            .with_stream("hd-1", StreamingResult::default())
            .with_default_stream(),
    )
}

#[tokio::test]
async fn test_try_all_falls_through_to_the_first_playable_server() {
    let source = three_server_source();
    let app = app(manager(&[source.clone()]));

    let response = get(&app, "/api/watch/zoro-show-ep-1?tryAll=true").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "private, max-age=300"
    );

    let body = json_body(response).await;
    assert_eq!(body["server"], "hd-3");
    assert_eq!(body["triedServers"], serde_json::json!(["hd-2", "hd-1", "hd-3"]));
    assert_eq!(body["sources"][0]["url"], MOCK_STREAM_URL);
    assert_eq!(
        source.calls(),
        vec!["streams:hd-2", "streams:hd-1", "streams:hd-3"]
    );
}

#[tokio::test]
async fn test_explicit_server_without_try_all_is_tried_alone() {
    let source = three_server_source();
    let app = app(manager(&[source.clone()]));

    let response = get(&app, "/api/watch/zoro-show-ep-1?server=hd-2").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(response).await;
    assert_eq!(body["error"], "No playable sources found");
    assert_eq!(body["episodeId"], "zoro-show-ep-1");
    assert_eq!(body["triedServers"], serde_json::json!(["hd-2"]));
    assert_eq!(body["lastError"], "Network error: connection refused");
    assert!(
        body["suggestion"]
            .as_str()
            .unwrap()
            .contains("tryAll=true")
    );
    assert_eq!(source.calls(), vec!["streams:hd-2"]);
}

#[tokio::test]
async fn test_every_server_failing_reports_the_last_error() {
    let source = Arc::new(
        MockSource::new("Zoro")
            .with_stream_error(
                "hd-3",
                SourceError::Upstream {
                    status: 503,
                    url: "mock://zoro/hd-3".to_string(),
                },
            ),
    );
    let app = app(manager(&[source.clone()]));

    let response = get(&app, "/api/watch/zoro-show-ep-1?tryAll=true&category=dub").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(response).await;
    assert_eq!(body["triedServers"], serde_json::json!(["hd-2", "hd-1", "hd-3"]));
    assert_eq!(
        body["lastError"],
        "Upstream returned HTTP 503 for mock://zoro/hd-3"
    );
    assert!(body.get("cancelled").is_none());
}

#[tokio::test]
async fn test_proxy_flag_rewrites_stream_urls() {
    let source = three_server_source();
    let app = app(manager(&[source]));

    let response = get(&app, "/api/watch/zoro-show-ep-1?server=hd-3&proxy=true").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let url = body["sources"][0]["url"].as_str().unwrap();
    assert!(url.starts_with("http://localhost/api/proxy?url="));
    assert!(url.ends_with("master.m3u8"));
}

#[tokio::test]
async fn test_unknown_category_is_rejected() {
    let app = app(manager(&[three_server_source()]));

    let response = get(&app, "/api/watch/zoro-show-ep-1?category=hardsub").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
