//! Shared fixtures for the integration suite.

use std::sync::Arc;

use anifold_core::testing::MockSource;
use anifold_core::{AnifoldConfig, SourceManager};
use anifold_web::{AppState, router};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response};
use serde_json::Value;
use tower::ServiceExt;

/// Console output for failing tests, controlled by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Manager over `sources`, registered in the given order.
pub fn manager(sources: &[Arc<MockSource>]) -> Arc<SourceManager> {
    let builder = sources
        .iter()
        .fold(SourceManager::builder(), |builder, source| {
            builder.register(source.clone())
        });
    Arc::new(builder.build().unwrap())
}

/// Router over `manager` with the testing configuration.
pub fn app(manager: Arc<SourceManager>) -> Router {
    init_tracing();
    let state = AppState::new(manager, AnifoldConfig::for_testing()).unwrap();
    router(state)
}

/// Takes a source offline by feeding its tracker threshold failures.
pub fn take_offline(source: &MockSource) {
    use anifold_core::Source;
    for _ in 0..source.tracker().threshold() {
        source.tracker().record_failure();
    }
    assert!(!source.is_available());
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
