//! Catalogue routes: search, details, episodes and listings.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use anifold_core::source::{AnimeDetail, Episode, SearchFilters, SearchResult};

use super::{default_page, request_scope};
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

const MAX_TOP_RATED_LIMIT: u32 = 100;
const MAX_TOP_RATED_PAGE: u32 = 10_000;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub genre: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SourceQuery {
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    pub source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopRatedQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    pub limit: Option<u32>,
    pub source: Option<String>,
}

/// `GET /api/search?q=&page=&source=&type=&status=&genre=`
///
/// # Errors
///
/// - 400 when `q` is missing or blank
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResult>> {
    let q = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("Query parameter q is required"))?;

    let filters = SearchFilters {
        kind: query.kind,
        status: query.status,
        genre: query.genre,
        year: None,
    };
    let (opts, _guard) = request_scope();
    let result = state
        .manager
        .search(q, query.page.max(1), &filters, query.source.as_deref(), &opts)
        .await?;
    Ok(Json(result))
}

/// `GET /api/anime/{id}`
///
/// # Errors
///
/// - 404 when no source knows the ID
pub async fn anime_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SourceQuery>,
) -> ApiResult<Json<AnimeDetail>> {
    let (opts, _guard) = request_scope();
    state
        .manager
        .get_anime(&id, query.source.as_deref(), &opts)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Anime {id} not found")))
}

/// `GET /api/anime/{id}/episodes`
///
/// # Errors
///
/// - 503 when the request was cancelled
pub async fn anime_episodes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SourceQuery>,
) -> ApiResult<Json<Value>> {
    let (opts, _guard) = request_scope();
    let episodes: Vec<Episode> = state
        .manager
        .get_episodes(&id, query.source.as_deref(), &opts)
        .await?;
    Ok(Json(json!({
        "animeId": id,
        "totalEpisodes": episodes.len(),
        "episodes": episodes,
    })))
}

/// `GET /api/trending?page=`
///
/// # Errors
///
/// - 503 when the request was cancelled
pub async fn trending(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let (opts, _guard) = request_scope();
    let results = state
        .manager
        .get_trending(query.page.max(1), query.source.as_deref(), &opts)
        .await?;
    Ok(Json(json!({ "page": query.page.max(1), "results": results })))
}

/// `GET /api/latest?page=`
///
/// # Errors
///
/// - 503 when the request was cancelled
pub async fn latest(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let (opts, _guard) = request_scope();
    let results = state
        .manager
        .get_latest(query.page.max(1), query.source.as_deref(), &opts)
        .await?;
    Ok(Json(json!({ "page": query.page.max(1), "results": results })))
}

/// `GET /api/top-rated?page=&limit=`
///
/// # Errors
///
/// - 400 when `page` is beyond the last listable page
/// - 503 when the request was cancelled
pub async fn top_rated(
    State(state): State<AppState>,
    Query(query): Query<TopRatedQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(10).clamp(1, MAX_TOP_RATED_LIMIT);
    let page = query.page.max(1);
    if page > MAX_TOP_RATED_PAGE {
        return Err(ApiError::bad_request(format!(
            "page must be at most {MAX_TOP_RATED_PAGE}"
        )));
    }
    let (opts, _guard) = request_scope();
    let results = state
        .manager
        .get_top_rated(page, limit, query.source.as_deref(), &opts)
        .await?;
    Ok(Json(json!({ "page": page, "limit": limit, "results": results })))
}

/// `GET /api/genres`
///
/// # Errors
///
/// - 503 when the request was cancelled
pub async fn genres(
    State(state): State<AppState>,
    Query(query): Query<SourceQuery>,
) -> ApiResult<Json<Value>> {
    let (opts, _guard) = request_scope();
    let genres = state
        .manager
        .get_genres(query.source.as_deref(), &opts)
        .await?;
    Ok(Json(json!({ "genres": genres })))
}

/// `GET /api/genre/{genre}?page=`
///
/// # Errors
///
/// - 503 when the request was cancelled
pub async fn genre_titles(
    State(state): State<AppState>,
    Path(genre): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<SearchResult>> {
    let (opts, _guard) = request_scope();
    let result = state
        .manager
        .get_by_genre(&genre, query.page.max(1), query.source.as_deref(), &opts)
        .await?;
    Ok(Json(result))
}

/// `GET /api/servers/{episode_id}`
///
/// # Errors
///
/// - 503 when the request was cancelled
pub async fn episode_servers(
    State(state): State<AppState>,
    Path(episode_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let (opts, _guard) = request_scope();
    let servers = state.manager.get_episode_servers(&episode_id, &opts).await?;
    Ok(Json(json!({ "episodeId": episode_id, "servers": servers })))
}
