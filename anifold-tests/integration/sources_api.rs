//! Registry, health and catalogue routes.

use std::sync::Arc;

use anifold_core::testing::MockSource;
use anifold_core::SourceError;
use axum::http::StatusCode;
use serde_json::json;

use crate::fixtures::{app, get, json_body, manager, post_json};

#[tokio::test]
async fn test_preference_round_trip() {
    let a = Arc::new(MockSource::new("A").with_title("show", "Show A", 1));
    let b = Arc::new(MockSource::new("B").with_title("show", "Show B", 1));
    let app = app(manager(&[a.clone(), b.clone()]));

    let body = json_body(get(&app, "/api/sources").await).await;
    assert_eq!(body["primary"], "A");
    assert!(body["preferred"].is_null());
    assert_eq!(body["sources"].as_array().unwrap().len(), 2);

    let response = post_json(&app, "/api/sources/preferred", json!({ "source": "nope" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_json(&app, "/api/sources/preferred", json!({ "source": "b" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["preferred"], "B");

    let body = json_body(get(&app, "/api/search?q=show").await).await;
    assert_eq!(body["source"], "B");
    assert_eq!(body["results"][0]["title"], "Show B");

    let response = post_json(&app, "/api/sources/preferred", json!({ "source": null })).await;
    assert!(json_body(response).await["preferred"].is_null());
}

#[tokio::test]
async fn test_health_check_marks_failing_probe_offline() {
    let up = Arc::new(MockSource::new("Up"));
    let down = Arc::new(MockSource::new("Down").with_health(Ok(false)));
    let app = app(manager(&[up, down]));

    let response = post_json(&app, "/api/sources/check", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(get(&app, "/api/sources/health").await).await;
    let statuses: Vec<(String, String)> = body["sources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| {
            (
                h["name"].as_str().unwrap().to_string(),
                h["status"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("Up".to_string(), "online".to_string()),
            ("Down".to_string(), "offline".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_catalogue_routes_answer_from_the_selected_source() {
    let source = Arc::new(
        MockSource::new("A")
            .with_title("one", "Alpha", 3)
            .with_title("two", "Beta", 1),
    );
    let app = app(manager(&[source]));

    let response = get(&app, "/api/search").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(get(&app, "/api/anime/a-one").await).await;
    assert_eq!(body["title"], "Alpha");
    assert_eq!(body["source"], "A");

    let response = get(&app, "/api/anime/a-missing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(get(&app, "/api/anime/a-one/episodes").await).await;
    assert_eq!(body["totalEpisodes"], 3);

    let body = json_body(get(&app, "/api/top-rated?limit=1").await).await;
    assert_eq!(body["results"].as_array().unwrap().len(), 1);

    let body = json_body(get(&app, "/api/genres").await).await;
    assert!(!body["genres"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_source_degrades_to_empty_listings() {
    let source = Arc::new(MockSource::new("A").failing(SourceError::Network {
        reason: "down".to_string(),
    }));
    let app = app(manager(&[source]));

    let response = get(&app, "/api/trending").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["page"], 1);
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_liveness_reports_registered_sources() {
    let app = app(manager(&[Arc::new(MockSource::new("A"))]));
    let body = json_body(get(&app, "/api/health").await).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sources"], 1);
}

#[tokio::test]
async fn test_top_rated_rejects_out_of_range_page() {
    let app = app(manager(&[Arc::new(MockSource::new("A").with_title("one", "Alpha", 1))]));

    let response = get(&app, "/api/top-rated?page=50000000&limit=100").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "bad_request");

    let response = get(&app, "/api/top-rated?page=10000&limit=100").await;
    assert_eq!(response.status(), StatusCode::OK);
}
