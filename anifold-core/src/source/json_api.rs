//! Adapter for self-hosted JSON scraper APIs.
//!
//! Talks to an aniwatch-style REST service (`/search`, `/anime/{id}`,
//! `/episode/sources`, ...) whose responses are wrapped in a
//! `{"success": bool, "data": ...}` envelope. Every call goes through the
//! same pipeline: cache lookup, admission throttle, timeout and
//! cancellation, error classification, failure tracking, cache fill.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    AnimeDetail, AnimeSummary, Category, Episode, EpisodeServer, Genre, RankedAnime,
    RequestOptions, SearchFilters, SearchResult, Source, SourceError, SourceResult,
    StreamingResult, SubtitleTrack, TimeRange, VideoVariant, ids,
};
use crate::cache::{SourceCache, TtlCache, TtlClass, cache_key};
use crate::config::AnifoldConfig;
use crate::failure::FailureTracker;
use crate::retry::with_timeout;
use crate::throttle::AdmissionThrottle;
use crate::{AnifoldError, Result};

/// Source backed by a JSON scraper API.
#[derive(Debug)]
pub struct JsonApiSource {
    name: String,
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
    sweep_interval: Duration,
    tracker: FailureTracker,
    cache: SourceCache,
    throttle: Option<AdmissionThrottle>,
}

impl JsonApiSource {
    /// Creates a source for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// - `AnifoldError::Configuration` - Base URL is not http(s) or the HTTP client cannot be built
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        config: &AnifoldConfig,
    ) -> Result<Self> {
        let name = name.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let parsed = url::Url::parse(&base_url).map_err(|e| AnifoldError::Configuration {
            reason: format!("Invalid base URL for source {name}: {e}"),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AnifoldError::Configuration {
                reason: format!("Source {name} must use http or https, got {}", parsed.scheme()),
            });
        }

        let client = reqwest::Client::builder()
            .user_agent(config.sources.user_agent)
            .build()
            .map_err(|e| AnifoldError::Configuration {
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            tracker: FailureTracker::from_config(name.clone(), &config.sources),
            cache: SourceCache::new(config.cache.clone()),
            throttle: AdmissionThrottle::from_config(&config.throttle),
            request_timeout: config.sources.request_timeout,
            sweep_interval: config.cache.sweep_interval,
            name,
            base_url,
            client,
        })
    }

    /// Result caches of this source.
    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }

    /// Admission throttle, if enabled.
    pub fn throttle(&self) -> Option<&AdmissionThrottle> {
        self.throttle.as_ref()
    }

    /// Starts the background cache sweeper for this source.
    pub fn spawn_cache_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.cache.spawn_sweeper(self.sweep_interval, cancel)
    }

    fn native<'a>(&self, id: &'a str) -> &'a str {
        ids::strip(&self.name, id)
    }

    /// Throttle and time-box one upstream call without touching the tracker.
    async fn attempt<T, F, Fut>(&self, opts: &RequestOptions, fetch: F) -> SourceResult<T>
    where
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        opts.check()?;
        let timeout = opts.timeout_or(self.request_timeout);
        let call = async {
            match &self.throttle {
                Some(throttle) => throttle.run(fetch(timeout)).await,
                None => fetch(timeout).await,
            }
        };
        with_timeout(call, timeout, &opts.cancel).await
    }

    /// [`Self::attempt`], then classify the outcome and track it.
    async fn guarded<T, F, Fut>(
        &self,
        operation: &'static str,
        opts: &RequestOptions,
        fetch: F,
    ) -> SourceResult<T>
    where
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let result = self.attempt(opts, fetch).await;
        match &result {
            Ok(_) => self.tracker.record_success(),
            Err(SourceError::NotFound { .. }) => {}
            Err(error) => {
                if error.counts_as_failure() {
                    tracing::warn!(source = %self.name, operation, error = %error, "Source call failed");
                } else {
                    tracing::debug!(source = %self.name, operation, error = %error, "Source call aborted");
                }
                self.tracker.record_error(error);
            }
        }
        result
    }

    /// Serves from `cache` when warm, otherwise runs `fetch` through
    /// [`Self::guarded`] and stores the result.
    async fn cached<T, F, Fut>(
        &self,
        cache: &TtlCache<T>,
        key: String,
        class: TtlClass,
        operation: &'static str,
        opts: &RequestOptions,
        fetch: F,
    ) -> SourceResult<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        if let Some(hit) = cache.get(&key) {
            tracing::trace!(source = %self.name, key = %key, "Cache hit");
            return Ok(hit);
        }
        let value = self.guarded(operation, opts, fetch).await?;
        cache.set_class(key, value.clone(), class);
        Ok(value)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> SourceResult<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::trace!(source = %self.name, url = %url, "Upstream request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(e, timeout))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound { id: path.to_string() });
        }
        if !status.is_success() {
            return Err(SourceError::Upstream {
                status: status.as_u16(),
                url,
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| SourceError::from_reqwest(e, timeout))?;
        if envelope.success == Some(false) {
            return Err(SourceError::Parse {
                reason: format!("Upstream reported failure for {path}"),
            });
        }
        Ok(envelope.data)
    }

    fn summary(&self, anime: WireAnime) -> AnimeSummary {
        let counts = anime.episodes.unwrap_or_default();
        AnimeSummary {
            id: ids::namespaced(&self.name, &anime.id),
            title: anime.name,
            image: anime.poster,
            kind: anime.kind,
            episodes_sub: counts.sub,
            episodes_dub: counts.dub,
            source: None,
        }
    }

    fn search_page(&self, page: WirePage) -> SearchResult {
        SearchResult {
            current_page: page.current_page.unwrap_or(1),
            has_next_page: page.has_next_page.unwrap_or(false),
            total_pages: page.total_pages,
            results: page.animes.into_iter().map(|a| self.summary(a)).collect(),
            source: None,
        }
    }

    async fn category(&self, name: &str, page: u32, timeout: Duration) -> SourceResult<WirePage> {
        self.get_json(
            &format!("/category/{name}"),
            &[("page", page.max(1).to_string())],
            timeout,
        )
        .await
    }
}

#[async_trait]
impl Source for JsonApiSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    async fn health_check(&self, opts: &RequestOptions) -> SourceResult<bool> {
        self.attempt(opts, |timeout| async move {
            let home: WireHome = self.get_json("/home", &[], timeout).await?;
            Ok(!home.genres.is_empty() || !home.trending_animes.is_empty())
        })
        .await
    }

    async fn search(
        &self,
        query: &str,
        page: u32,
        filters: &SearchFilters,
        opts: &RequestOptions,
    ) -> SourceResult<SearchResult> {
        let page = page.max(1);
        let mut params = vec![("q", query.to_string()), ("page", page.to_string())];
        if let Some(kind) = &filters.kind {
            params.push(("type", kind.clone()));
        }
        if let Some(status) = &filters.status {
            params.push(("status", status.clone()));
        }
        if let Some(genre) = &filters.genre {
            params.push(("genres", genre.clone()));
        }
        if let Some(year) = filters.year {
            params.push(("start_date", format!("{year}-0-0")));
        }

        let key_parts: Vec<&str> = params.iter().map(|(_, v)| v.as_str()).collect();
        let key = cache_key("search", &key_parts);

        self.cached(
            &self.cache.search,
            key,
            TtlClass::Search,
            "search",
            opts,
            |timeout| async move {
                let wire: WirePage = self.get_json("/search", &params, timeout).await?;
                Ok(self.search_page(wire))
            },
        )
        .await
    }

    async fn get_anime(&self, id: &str, opts: &RequestOptions) -> SourceResult<Option<AnimeDetail>> {
        let native = self.native(id).to_string();
        let result = self
            .cached(
                &self.cache.detail,
                cache_key("anime", &[&native]),
                TtlClass::Detail,
                "get_anime",
                opts,
                |timeout| async move {
                    let path = format!("/anime/{}", urlencoding::encode(&native));
                    let wire: WireAnimeInfo = self.get_json(&path, &[], timeout).await?;
                    Ok(Some(self.detail(wire)))
                },
            )
            .await;

        match result {
            Err(SourceError::NotFound { .. }) => Ok(None),
            other => other,
        }
    }

    async fn get_episodes(&self, id: &str, opts: &RequestOptions) -> SourceResult<Vec<Episode>> {
        let native = self.native(id).to_string();
        let result = self
            .cached(
                &self.cache.episodes,
                cache_key("episodes", &[&native]),
                TtlClass::Episodes,
                "get_episodes",
                opts,
                |timeout| async move {
                    let path = format!("/anime/{}/episodes", urlencoding::encode(&native));
                    let wire: WireEpisodes = self.get_json(&path, &[], timeout).await?;
                    Ok(wire
                        .episodes
                        .into_iter()
                        .map(|e| Episode {
                            id: ids::namespaced(&self.name, &e.episode_id),
                            number: e.number,
                            title: e.title,
                            is_filler: e.is_filler,
                        })
                        .collect())
                },
            )
            .await;

        match result {
            Err(SourceError::NotFound { .. }) => Ok(Vec::new()),
            other => other,
        }
    }

    async fn get_trending(
        &self,
        page: u32,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<AnimeSummary>> {
        self.cached(
            &self.cache.search,
            cache_key("trending", &[&page.to_string()]),
            TtlClass::Search,
            "get_trending",
            opts,
            |timeout| async move {
                let wire = self.category("most-popular", page, timeout).await?;
                Ok(self.search_page(wire))
            },
        )
        .await
        .map(|page| page.results)
    }

    async fn get_latest(&self, page: u32, opts: &RequestOptions) -> SourceResult<Vec<AnimeSummary>> {
        self.cached(
            &self.cache.search,
            cache_key("latest", &[&page.to_string()]),
            TtlClass::Search,
            "get_latest",
            opts,
            |timeout| async move {
                let wire = self.category("recently-updated", page, timeout).await?;
                Ok(self.search_page(wire))
            },
        )
        .await
        .map(|page| page.results)
    }

    async fn get_top_rated(
        &self,
        page: u32,
        limit: u32,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<RankedAnime>> {
        let page_result = self
            .cached(
                &self.cache.search,
                cache_key("top", &[&page.to_string()]),
                TtlClass::Search,
                "get_top_rated",
                opts,
                |timeout| async move {
                    let wire = self.category("top-airing", page, timeout).await?;
                    Ok(self.search_page(wire))
                },
            )
            .await?;

        let limit = limit.max(1);
        let offset = (page.max(1) - 1).saturating_mul(limit);
        Ok(page_result
            .results
            .into_iter()
            .take(limit as usize)
            .zip(1u32..)
            .map(|(anime, position)| RankedAnime {
                rank: offset.saturating_add(position),
                anime,
            })
            .collect())
    }

    async fn get_streaming_links(
        &self,
        episode_id: &str,
        server: Option<&str>,
        category: Category,
        opts: &RequestOptions,
    ) -> SourceResult<StreamingResult> {
        let native = self.native(episode_id).to_string();
        let server = server.unwrap_or("hd-1").to_string();
        let key = cache_key("sources", &[&native, &server, category.as_str()]);

        if let Some(hit) = self.cache.streams.get(&key) {
            return Ok(hit);
        }

        let params = [
            ("animeEpisodeId", native),
            ("server", server),
            ("category", category.as_str().to_string()),
        ];
        let result = self
            .guarded("get_streaming_links", opts, |timeout| async move {
                let wire: WireSources = self.get_json("/episode/sources", &params, timeout).await?;
                Ok(wire.into_streaming_result())
            })
            .await?;

        // Empty results are retried on the next call instead of pinned for hours.
        if result.is_playable() {
            self.cache
                .streams
                .set_class(key, result.clone(), TtlClass::StreamLinks);
        }
        Ok(result)
    }

    async fn get_episode_servers(
        &self,
        episode_id: &str,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<EpisodeServer>> {
        let native = self.native(episode_id).to_string();
        self.cached(
            &self.cache.servers,
            cache_key("servers", &[&native]),
            TtlClass::Servers,
            "get_episode_servers",
            opts,
            |timeout| async move {
                let params = [("animeEpisodeId", native.clone())];
                let wire: WireServers = self.get_json("/episode/servers", &params, timeout).await?;
                Ok(wire.into_servers())
            },
        )
        .await
    }

    async fn get_by_genre(
        &self,
        genre: &str,
        page: u32,
        opts: &RequestOptions,
    ) -> SourceResult<SearchResult> {
        let genre = genre.trim().to_lowercase().replace(' ', "-");
        self.cached(
            &self.cache.search,
            cache_key("genre", &[&genre, &page.to_string()]),
            TtlClass::Search,
            "get_by_genre",
            opts,
            |timeout| async move {
                let path = format!("/genre/{}", urlencoding::encode(&genre));
                let wire: WirePage = self
                    .get_json(&path, &[("page", page.max(1).to_string())], timeout)
                    .await?;
                Ok(self.search_page(wire))
            },
        )
        .await
    }

    async fn get_genres(&self, opts: &RequestOptions) -> SourceResult<Vec<Genre>> {
        self.guarded("get_genres", opts, |timeout| async move {
            let home: WireHome = self.get_json("/home", &[], timeout).await?;
            Ok(home
                .genres
                .into_iter()
                .map(|name| Genre {
                    id: name.to_lowercase().replace(' ', "-"),
                    name,
                })
                .collect())
        })
        .await
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

impl JsonApiSource {
    fn detail(&self, wire: WireAnimeInfo) -> AnimeDetail {
        let info = wire.anime.info;
        let more = wire.anime.more_info;
        let stats = info.stats.unwrap_or_default();
        let counts = stats.episodes.unwrap_or_default();

        AnimeDetail {
            id: ids::namespaced(&self.name, &info.id),
            title: info.name,
            description: info.description,
            image: info.poster,
            kind: stats.kind,
            status: more.status,
            genres: more.genres,
            total_episodes: counts.sub.max(counts.dub),
            rating: more.malscore.and_then(|s| s.trim().parse().ok()),
            source: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: Option<bool>,
    data: T,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct WireEpisodeCounts {
    sub: Option<u32>,
    dub: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireAnime {
    id: String,
    name: String,
    poster: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    episodes: Option<WireEpisodeCounts>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePage {
    #[serde(default)]
    animes: Vec<WireAnime>,
    current_page: Option<u32>,
    has_next_page: Option<bool>,
    total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHome {
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    trending_animes: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireAnimeInfo {
    anime: WireAnimeBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAnimeBody {
    info: WireInfo,
    #[serde(default)]
    more_info: WireMoreInfo,
}

#[derive(Debug, Deserialize)]
struct WireInfo {
    id: String,
    name: String,
    poster: Option<String>,
    description: Option<String>,
    stats: Option<WireStats>,
}

#[derive(Debug, Default, Deserialize)]
struct WireStats {
    #[serde(rename = "type")]
    kind: Option<String>,
    episodes: Option<WireEpisodeCounts>,
}

#[derive(Debug, Default, Deserialize)]
struct WireMoreInfo {
    status: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
    malscore: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEpisodes {
    #[serde(default)]
    episodes: Vec<WireEpisode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEpisode {
    number: u32,
    title: Option<String>,
    episode_id: String,
    #[serde(default)]
    is_filler: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServer {
    server_name: String,
}

#[derive(Debug, Deserialize)]
struct WireServers {
    #[serde(default)]
    sub: Vec<WireServer>,
    #[serde(default)]
    dub: Vec<WireServer>,
    #[serde(default)]
    raw: Vec<WireServer>,
}

impl WireServers {
    fn into_servers(self) -> Vec<EpisodeServer> {
        let tag = |servers: Vec<WireServer>, category: Category| {
            servers.into_iter().map(move |s| EpisodeServer {
                name: s.server_name,
                url: None,
                category,
            })
        };
        tag(self.sub, Category::Sub)
            .chain(tag(self.dub, Category::Dub))
            .chain(tag(self.raw, Category::Raw))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVariant {
    url: String,
    #[serde(rename = "isM3U8", default)]
    is_m3u8: Option<bool>,
    quality: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireTrack {
    #[serde(alias = "file")]
    url: String,
    #[serde(alias = "label")]
    lang: Option<String>,
    #[serde(default)]
    default: bool,
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSources {
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    sources: Vec<WireVariant>,
    #[serde(default, alias = "tracks")]
    subtitles: Vec<WireTrack>,
    intro: Option<TimeRange>,
    outro: Option<TimeRange>,
}

impl WireSources {
    fn into_streaming_result(self) -> StreamingResult {
        let sources = self
            .sources
            .into_iter()
            .map(|v| {
                let lower = v.url.to_lowercase();
                let is_m3u8 = v
                    .is_m3u8
                    .unwrap_or_else(|| lower.contains(".m3u8") || v.kind.as_deref() == Some("hls"));
                VideoVariant {
                    is_dash: lower.contains(".mpd") || v.kind.as_deref() == Some("dash"),
                    quality: v.quality.unwrap_or_else(|| "auto".to_string()),
                    url: v.url,
                    is_m3u8,
                }
            })
            .collect();

        let subtitles = self
            .subtitles
            .into_iter()
            // Thumbnail sprites share the track list upstream.
            .filter(|t| t.kind.as_deref() != Some("thumbnails"))
            .filter(|t| t.lang.as_deref() != Some("thumbnails"))
            .map(|t| SubtitleTrack {
                url: t.url,
                lang: t.lang.unwrap_or_else(|| "Unknown".to_string()),
                default: t.default,
            })
            .collect();

        let mut result = StreamingResult {
            sources,
            subtitles,
            headers: self.headers,
            intro: self.intro.filter(|r| r.end > r.start),
            outro: self.outro.filter(|r| r.end > r.start),
        };
        result.sort_variants();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base_url: &str) -> JsonApiSource {
        JsonApiSource::new("HiAnime", base_url, &AnifoldConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let result = JsonApiSource::new("Bad", "ftp://files.test", &AnifoldConfig::default());
        assert!(matches!(result, Err(AnifoldError::Configuration { .. })));
    }

    #[test]
    fn test_search_page_mapping_namespaces_ids() {
        let raw = serde_json::json!({
            "success": true,
            "data": {
                "animes": [{
                    "id": "naruto-677",
                    "name": "Naruto",
                    "poster": "https://img.test/naruto.jpg",
                    "type": "TV",
                    "episodes": {"sub": 220, "dub": 220}
                }],
                "currentPage": 1,
                "hasNextPage": false,
                "totalPages": 1
            }
        });
        let envelope: Envelope<WirePage> = serde_json::from_value(raw).unwrap();
        let page = source("https://api.test").search_page(envelope.data);

        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].id, "hianime-naruto-677");
        assert_eq!(page.results[0].episodes_sub, Some(220));
    }

    #[test]
    fn test_sources_mapping_sorts_and_filters_thumbnails() {
        let raw = serde_json::json!({
            "headers": {"Referer": "https://megacloud.blog/"},
            "sources": [
                {"url": "https://cdn.test/360.m3u8", "quality": "360p"},
                {"url": "https://cdn.test/master.m3u8", "type": "hls"}
            ],
            "tracks": [
                {"file": "https://cdn.test/en.vtt", "label": "English", "default": true},
                {"file": "https://cdn.test/thumbs.vtt", "kind": "thumbnails"}
            ],
            "intro": {"start": 31, "end": 120},
            "outro": {"start": 0, "end": 0}
        });
        let wire: WireSources = serde_json::from_value(raw).unwrap();
        let result = wire.into_streaming_result();

        assert_eq!(result.sources[0].quality, "auto");
        assert!(result.sources.iter().all(|v| v.is_m3u8));
        assert_eq!(result.subtitles.len(), 1);
        assert_eq!(result.headers.get("Referer").map(String::as_str), Some("https://megacloud.blog/"));
        assert_eq!(result.intro, Some(TimeRange { start: 31, end: 120 }));
        assert_eq!(result.outro, None);
    }

    #[test]
    fn test_servers_mapping_tags_category() {
        let raw = serde_json::json!({
            "sub": [{"serverName": "hd-1", "serverId": 4}],
            "dub": [{"serverName": "hd-2", "serverId": 1}],
            "raw": []
        });
        let wire: WireServers = serde_json::from_value(raw).unwrap();
        let servers = wire.into_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].category, Category::Dub);
    }

    #[tokio::test]
    async fn test_connection_failure_counts_against_source() {
        // Nothing listens on port 9 of the loopback interface.
        let source = source("http://127.0.0.1:9");
        let opts = RequestOptions::default();

        let result = source.get_genres(&opts).await;
        assert!(matches!(result, Err(SourceError::Network { .. })));
        assert_eq!(source.tracker().consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_failed_health_check_is_not_counted() {
        let source = source("http://127.0.0.1:9");

        let result = source.health_check(&RequestOptions::default()).await;
        assert!(matches!(result, Err(SourceError::Network { .. })));
        assert_eq!(source.tracker().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_call_is_not_counted() {
        let source = source("http://127.0.0.1:9");
        let opts = RequestOptions::default();
        opts.cancel.cancel();

        let result = source.get_genres(&opts).await;
        assert_eq!(result, Err(SourceError::Cancelled));
        assert_eq!(source.tracker().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_warm_cache_skips_upstream() {
        let source = source("http://127.0.0.1:9");
        let cached = SearchResult {
            results: Vec::new(),
            current_page: 1,
            has_next_page: false,
            total_pages: Some(0),
            source: None,
        };
        source.cache().search.set_class(
            cache_key("search", &["naruto", "1"]),
            cached.clone(),
            TtlClass::Search,
        );

        let result = source
            .search("naruto", 1, &SearchFilters::default(), &RequestOptions::default())
            .await;
        assert_eq!(result, Ok(cached));
        assert_eq!(source.tracker().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_top_rated_rank_saturates_on_huge_page() {
        let source = source("http://127.0.0.1:9");
        let anime = AnimeSummary {
            id: "hianime-one-piece-100".to_string(),
            title: "One Piece".to_string(),
            image: None,
            kind: None,
            episodes_sub: None,
            episodes_dub: None,
            source: None,
        };
        let cached = SearchResult {
            results: vec![anime],
            current_page: 50_000_000,
            has_next_page: false,
            total_pages: None,
            source: None,
        };
        source.cache().search.set_class(
            cache_key("top", &["50000000"]),
            cached,
            TtlClass::Search,
        );

        let ranked = source
            .get_top_rated(50_000_000, 100, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].rank, u32::MAX);
    }
}
