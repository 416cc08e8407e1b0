use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::server::AppState;

/// `GET /api/health` liveness probe.
pub async fn liveness(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "sources": state.manager.sources().len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
