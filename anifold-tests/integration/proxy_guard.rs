//! Proxy request validation and pre-fetch rejection.

use std::sync::Arc;
use std::time::Duration;

use anifold_core::AnifoldConfig;
use anifold_core::config::ProxyConfig;
use anifold_core::testing::MockSource;
use anifold_web::{ProxyError, StreamProxy};
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::json;
use tower::ServiceExt;

use crate::fixtures::{app, get, json_body, manager, post_json};

fn proxy_app() -> axum::Router {
    app(manager(&[Arc::new(MockSource::new("A"))]))
}

#[tokio::test]
async fn test_missing_url_is_a_validation_error() {
    let response = get(&proxy_app(), "/api/proxy").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let body = json_body(response).await;
    assert_eq!(body["reason"], "invalid_url");
}

#[tokio::test]
async fn test_non_http_scheme_is_rejected() {
    let response = get(&proxy_app(), "/api/proxy?url=ftp%3A%2F%2Fcdn.example%2Fa.ts").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dead_domain_and_its_subdomains_are_refused() {
    let app = proxy_app();
    for target in [
        "https%3A%2F%2Fdead-cdn.example%2Fmaster.m3u8",
        "https%3A%2F%2Fedge-1.DEAD-CDN.example%2Fseg.ts",
    ] {
        let response = get(&app, &format!("/api/proxy?url={target}")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = json_body(response).await;
        assert_eq!(body["reason"], "dead_domain");
    }
}

#[tokio::test]
async fn test_shipped_deny_list_refuses_retired_player_hosts() {
    let proxy = StreamProxy::new(ProxyConfig {
        dns_probe: false,
        ..ProxyConfig::default()
    })
    .unwrap();

    let error = proxy
        .fetch(Some("https://cdn.vidstreaming.io/hls/master.m3u8"), &HeaderMap::new())
        .await
        .unwrap_err();
    assert_eq!(
        error,
        ProxyError::DeadDomain {
            host: "cdn.vidstreaming.io".to_string()
        }
    );
}

#[tokio::test]
async fn test_post_body_goes_through_the_same_checks() {
    let app = proxy_app();

    let response = post_json(
        &app,
        "/api/proxy",
        json!({ "url": "https://dead-cdn.example/master.m3u8" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let response = post_json(&app, "/api/proxy", json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refused_connection_maps_to_bad_gateway() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let response = get(
        &proxy_app(),
        &format!("/api/proxy?url=http%3A%2F%2F127.0.0.1%3A{port}%2Fseg.ts"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_silent_upstream_times_out_as_bad_gateway() {
    // Accepts connections and holds them open without ever answering.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let proxy = StreamProxy::new(ProxyConfig {
        request_timeout: Duration::from_millis(300),
        ..AnifoldConfig::for_testing().proxy
    })
    .unwrap();
    let target = format!("http://127.0.0.1:{port}/seg.ts");

    let error = proxy
        .fetch(Some(&target), &HeaderMap::new())
        .await
        .unwrap_err();
    assert!(matches!(error, ProxyError::Timeout { .. }));

    let response = error.into_response();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["reason"], "timeout");
}

#[tokio::test]
async fn test_preflight_answers_without_content() {
    let response = proxy_app()
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/api/proxy")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert!(response.headers().contains_key(header::ACCESS_CONTROL_MAX_AGE));
}
