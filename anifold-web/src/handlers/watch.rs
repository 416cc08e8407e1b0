//! Playback route with multi-server fallback.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use anifold_core::WatchOutcome;
use anifold_core::source::Category;

use super::request_scope;
use crate::error::{ApiError, ApiResult};
use crate::proxy::manifest::proxy_url;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchQuery {
    pub server: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub try_all: bool,
    #[serde(default)]
    pub proxy: bool,
}

/// `GET /api/watch/{episode_id}?server=&category=&tryAll=&proxy=`
///
/// # Errors
///
/// - 400 for an unknown category
pub async fn watch_episode(
    State(state): State<AppState>,
    Path(episode_id): Path<String>,
    Query(query): Query<WatchQuery>,
    request: HeaderMap,
) -> ApiResult<Response> {
    let category = match query.category.as_deref() {
        Some(raw) => raw.parse::<Category>().map_err(ApiError::bad_request)?,
        None => Category::Sub,
    };

    let (opts, _guard) = request_scope();
    let outcome = state
        .manager
        .get_streaming_links_with_fallback(
            &episode_id,
            query.server.as_deref(),
            category,
            query.try_all,
            &opts,
        )
        .await;

    match outcome {
        Ok(mut outcome) => {
            if query.proxy {
                route_through_proxy(&mut outcome, &state.proxy.proxy_base(&request));
            }
            let mut response = Json(outcome).into_response();
            response.headers_mut().insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("private, max-age=300"),
            );
            Ok(response)
        }
        Err(failure) => {
            tracing::warn!(
                episode_id = %episode_id,
                tried = ?failure.tried_servers,
                last_error = ?failure.last_error,
                "No playable stream found"
            );
            Ok((StatusCode::NOT_FOUND, Json(failure)).into_response())
        }
    }
}

/// Rewrites every variant and subtitle URL to go through the proxy.
fn route_through_proxy(outcome: &mut WatchOutcome, proxy_base: &str) {
    for variant in &mut outcome.sources {
        variant.url = proxy_url(proxy_base, &variant.url);
    }
    for track in &mut outcome.subtitles {
        track.url = proxy_url(proxy_base, &track.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anifold_core::source::{SubtitleTrack, VideoVariant};

    #[test]
    fn test_route_through_proxy() {
        let mut outcome = WatchOutcome {
            sources: vec![VideoVariant {
                url: "https://cdn.test/master.m3u8".to_string(),
                quality: "auto".to_string(),
                is_m3u8: true,
                is_dash: false,
            }],
            subtitles: vec![SubtitleTrack {
                url: "https://cdn.test/en.vtt".to_string(),
                lang: "English".to_string(),
                default: true,
            }],
            headers: Default::default(),
            intro: None,
            outro: None,
            server: "hd-1".to_string(),
            tried_servers: vec!["hd-1".to_string()],
        };

        route_through_proxy(&mut outcome, "http://localhost:3000/api/proxy");
        assert_eq!(
            outcome.sources[0].url,
            "http://localhost:3000/api/proxy?url=https%3A%2F%2Fcdn.test%2Fmaster.m3u8"
        );
        assert!(outcome.subtitles[0].url.starts_with("http://localhost:3000/api/proxy?url="));
    }
}
