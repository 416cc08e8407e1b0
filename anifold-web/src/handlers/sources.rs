//! Source registry routes.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};

use super::request_scope;
use crate::error::ApiResult;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct PreferredRequest {
    pub source: Option<String>,
}

/// `GET /api/sources`
pub async fn list_sources(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "sources": state.manager.list_sources(),
        "preferred": state.manager.preferred(),
        "primary": state.manager.primary().name(),
    }))
}

/// `GET /api/sources/health`: last recorded health, no probing.
pub async fn sources_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "sources": state.manager.health_report() }))
}

/// `POST /api/sources/check`: probes every source now.
pub async fn check_sources(State(state): State<AppState>) -> Json<Value> {
    let (opts, _guard) = request_scope();
    let report = state.manager.check_all_health_default(&opts.cancel).await;
    Json(json!({ "sources": report }))
}

/// `POST /api/sources/preferred {source}`; `null` clears the preference.
///
/// # Errors
///
/// - 400 when the source is not registered
pub async fn set_preferred(
    State(state): State<AppState>,
    Json(body): Json<PreferredRequest>,
) -> ApiResult<Json<Value>> {
    state.manager.set_preferred(body.source.as_deref())?;
    Ok(Json(json!({ "preferred": state.manager.preferred() })))
}
