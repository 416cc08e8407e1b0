//! Verification runs through the API and the cached report.

use std::sync::Arc;

use anifold_core::testing::MockSource;
use anifold_core::{SourceError, SourceVerifier, VerificationStatus};
use axum::http::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::fixtures::{app, get, json_body, manager, post_json};

fn healthy(name: &str) -> Arc<MockSource> {
    Arc::new(
        MockSource::new(name)
            .with_title("nrt", "Naruto", 220)
            .with_title("nrt-s", "Naruto Shippuden", 500)
            .with_default_stream(),
    )
}

#[tokio::test]
async fn test_report_is_cached_after_a_run() {
    let good = healthy("Good");
    let broken = Arc::new(MockSource::new("Broken").failing(SourceError::Network {
        reason: "refused".to_string(),
    }));
    let app = app(manager(&[good.clone(), broken]));

    let response = get(&app, "/api/verification").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = post_json(&app, "/api/verify", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await;
    assert_eq!(report["failedSources"], json!(["Broken"]));
    assert_eq!(report["results"][0]["status"], "pass");
    assert_eq!(report["results"][1]["status"], "fail");
    assert_eq!(
        report["results"][1]["error"],
        "search: Network error: refused"
    );

    let cached = json_body(get(&app, "/api/verification").await).await;
    assert_eq!(cached["runId"], report["runId"]);

    // Stage 3 episode list feeds stage 4.
    assert!(good.calls().contains(&"episodes:good-nrt".to_string()));
}

#[tokio::test]
async fn test_single_source_run_and_unknown_source() {
    let app = app(manager(&[healthy("Good")]));

    let report = json_body(post_json(&app, "/api/verify", json!({ "source": "good" })).await).await;
    assert_eq!(report["results"].as_array().unwrap().len(), 1);
    assert_eq!(report["results"][0]["details"]["streamingWorks"], true);

    let response = post_json(&app, "/api/verify", json!({ "source": "nope" })).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_quality_route_classifies_the_sampled_stream() {
    let app = app(manager(&[healthy("Good")]));

    let body = json_body(get(&app, "/api/sources/good/quality").await).await;
    assert_eq!(body["source"], "Good");
    assert_eq!(body["quality"], "hd");

    let response = get(&app, "/api/sources/nope/quality").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_title_without_episodes_fails_at_the_episode_stage() {
    let partial = Arc::new(
        MockSource::new("Partial")
            .with_title("nrt", "Naruto", 0)
            .with_default_stream(),
    );
    let verifier = SourceVerifier::default();

    let result = verifier
        .verify_source(partial.as_ref(), &CancellationToken::new())
        .await;

    // No episodes means no stream to sample either.
    assert_eq!(result.status, VerificationStatus::Fail);
    assert!(result.details.search_works);
    assert!(result.details.info_works);
    assert!(!result.details.episodes_works);
    assert_eq!(
        result.error.as_deref(),
        Some("episodes: Not found: partial-nrt")
    );
}
