//! Verification routes.
//!
//! The last report is kept in memory and served until it is older than the
//! configured report TTL.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::Instant;

use anifold_core::VerificationReport;

use super::request_scope;
use crate::error::{ApiError, ApiResult};
use crate::server::{AppState, CachedReport};

#[derive(Debug, Default, Deserialize)]
pub struct VerifyRequest {
    pub source: Option<String>,
}

/// `POST /api/verify` with an optional `{source}` body.
///
/// # Errors
///
/// - 400 for a malformed body
/// - 404 when the named source is not registered
pub async fn run_verification(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<VerificationReport>> {
    let request: VerifyRequest = if body.is_empty() {
        VerifyRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?
    };

    let (opts, _guard) = request_scope();
    let report = match request.source.as_deref() {
        Some(name) => {
            let source = state
                .manager
                .get(name)
                .ok_or_else(|| ApiError::not_found(format!("Unknown source: {name}")))?;
            state.verifier.verify_sources(&[source], &opts.cancel).await
        }
        None => {
            state
                .verifier
                .verify_all_sources(&state.manager, &opts.cancel)
                .await
        }
    };

    *state.verification.write() = Some(CachedReport {
        report: Arc::new(report.clone()),
        stored_at: Instant::now(),
    });
    Ok(Json(report))
}

/// `GET /api/verification`: the cached report while it is fresh.
///
/// # Errors
///
/// - 404 when no fresh report exists
pub async fn cached_verification(
    State(state): State<AppState>,
) -> ApiResult<Json<VerificationReport>> {
    let ttl = state.config.verifier.report_ttl;
    let cached = state.verification.read().clone();
    match cached {
        Some(cached) if cached.stored_at.elapsed() < ttl => {
            Ok(Json(cached.report.as_ref().clone()))
        }
        _ => Err(ApiError::not_found(
            "No verification report available, POST /api/verify first",
        )),
    }
}

/// `GET /api/sources/{name}/quality`
///
/// # Errors
///
/// - 404 when the source is not registered
pub async fn stream_quality(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let source = state
        .manager
        .get(&name)
        .ok_or_else(|| ApiError::not_found(format!("Unknown source: {name}")))?;

    let (opts, _guard) = request_scope();
    let quality = state
        .verifier
        .get_stream_quality(&source, &opts.cancel)
        .await;
    Ok(Json(json!({ "source": source.name(), "quality": quality })))
}
