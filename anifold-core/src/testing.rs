//! Scriptable in-memory source for tests.
//!
//! Enabled for this crate's own tests and, through the `test-utils`
//! feature, for the web and integration test crates.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::SourceConfig;
use crate::failure::FailureTracker;
use crate::retry::with_timeout;
use crate::source::{
    AnimeDetail, AnimeSummary, Category, Episode, EpisodeServer, Genre, RankedAnime,
    RequestOptions, SearchFilters, SearchResult, Source, SourceError, SourceResult,
    StreamingResult, VideoVariant, ids,
};

/// Stream URL returned by [`MockSource::with_default_stream`].
pub const MOCK_STREAM_URL: &str = "https://cdn.anifold.test/master.m3u8";

#[derive(Debug, Clone)]
struct MockTitle {
    native_id: String,
    title: String,
    episodes: u32,
}

/// Source whose answers, latency and failures are scripted by the test.
///
/// Every call is logged (`health`, `search:<query>`, `streams:<server>`, ...)
/// and recorded on the source's own failure tracker like a real source.
#[derive(Debug)]
pub struct MockSource {
    name: String,
    base_url: String,
    tracker: FailureTracker,
    titles: Vec<MockTitle>,
    streams: HashMap<String, SourceResult<StreamingResult>>,
    default_stream: Option<StreamingResult>,
    latency: Duration,
    streaming: bool,
    failing: Mutex<Option<SourceError>>,
    health: Mutex<SourceResult<bool>>,
    calls: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: format!("mock://{}", ids::slug(name)),
            tracker: FailureTracker::from_config(name, &SourceConfig::default()),
            titles: Vec::new(),
            streams: HashMap::new(),
            default_stream: None,
            latency: Duration::ZERO,
            streaming: true,
            failing: Mutex::new(None),
            health: Mutex::new(Ok(true)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Adds a catalogue entry with `episodes` episodes.
    pub fn with_title(mut self, native_id: &str, title: &str, episodes: u32) -> Self {
        self.titles.push(MockTitle {
            native_id: native_id.to_string(),
            title: title.to_string(),
            episodes,
        });
        self
    }

    /// Scripts the answer of one server.
    pub fn with_stream(mut self, server: &str, result: StreamingResult) -> Self {
        self.streams.insert(server.to_lowercase(), Ok(result));
        self
    }

    /// Scripts a failing server.
    pub fn with_stream_error(mut self, server: &str, error: SourceError) -> Self {
        self.streams.insert(server.to_lowercase(), Err(error));
        self
    }

    /// Unscripted servers answer with one adaptive HLS variant.
    pub fn with_default_stream(mut self) -> Self {
        self.default_stream = Some(Self::playable(MOCK_STREAM_URL));
        self
    }

    /// Every call fails with `error`.
    pub fn failing(self, error: SourceError) -> Self {
        *self.failing.lock() = Some(error);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_health(self, health: SourceResult<bool>) -> Self {
        *self.health.lock() = health;
        self
    }

    /// Falls back to the trait's `Unsupported` streaming answers.
    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    pub fn set_failing(&self, error: Option<SourceError>) {
        *self.failing.lock() = error;
    }

    pub fn set_health(&self, health: SourceResult<bool>) {
        *self.health.lock() = health;
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of logged calls starting with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Single-variant HLS result pointing at `url`.
    pub fn playable(url: &str) -> StreamingResult {
        StreamingResult {
            sources: vec![VideoVariant {
                url: url.to_string(),
                quality: "auto".to_string(),
                is_m3u8: true,
                is_dash: false,
            }],
            ..Default::default()
        }
    }

    async fn respond<T>(
        &self,
        call: String,
        opts: &RequestOptions,
        answer: impl FnOnce() -> SourceResult<T>,
    ) -> SourceResult<T> {
        let result = self.answer(call, opts, answer).await;
        match &result {
            Ok(_) => self.tracker.record_success(),
            Err(error) => {
                self.tracker.record_error(error);
            }
        }
        result
    }

    /// Records the call and waits out the latency, without tracking.
    async fn answer<T>(
        &self,
        call: String,
        opts: &RequestOptions,
        answer: impl FnOnce() -> SourceResult<T>,
    ) -> SourceResult<T> {
        self.calls.lock().push(call);

        let latency = self.latency;
        let result = with_timeout(
            async move {
                tokio::time::sleep(latency).await;
                Ok(())
            },
            opts.timeout_or(SourceConfig::default().request_timeout),
            &opts.cancel,
        )
        .await
        .and_then(|()| match self.failing.lock().clone() {
            Some(error) => Err(error),
            None => answer(),
        });
        result
    }

    fn summary(&self, title: &MockTitle) -> AnimeSummary {
        AnimeSummary {
            id: ids::namespaced(&self.name, &title.native_id),
            title: title.title.clone(),
            image: None,
            kind: Some("TV".to_string()),
            episodes_sub: Some(title.episodes),
            episodes_dub: None,
            source: None,
        }
    }

    fn find(&self, id: &str) -> Option<&MockTitle> {
        let native = ids::strip(&self.name, id);
        self.titles.iter().find(|t| t.native_id == native)
    }

    fn page(&self, query: &str, page: u32) -> SearchResult {
        let needle = query.to_lowercase();
        SearchResult {
            results: self
                .titles
                .iter()
                .filter(|t| t.title.to_lowercase().contains(&needle))
                .map(|t| self.summary(t))
                .collect(),
            current_page: page.max(1),
            has_next_page: false,
            total_pages: Some(1),
            source: None,
        }
    }
}

#[async_trait]
impl Source for MockSource {
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
        let health = self.health.lock().clone();
        self.answer("health".to_string(), opts, || health).await
    }

    async fn search(
        &self,
        query: &str,
        page: u32,
        _filters: &SearchFilters,
        opts: &RequestOptions,
    ) -> SourceResult<SearchResult> {
        self.respond(format!("search:{query}"), opts, || Ok(self.page(query, page)))
            .await
    }

    async fn get_anime(&self, id: &str, opts: &RequestOptions) -> SourceResult<Option<AnimeDetail>> {
        self.respond(format!("anime:{id}"), opts, || {
            Ok(self.find(id).map(|t| AnimeDetail {
                id: ids::namespaced(&self.name, &t.native_id),
                title: t.title.clone(),
                description: None,
                image: None,
                kind: Some("TV".to_string()),
                status: None,
                genres: vec!["Action".to_string()],
                total_episodes: Some(t.episodes),
                rating: None,
                source: None,
            }))
        })
        .await
    }

    async fn get_episodes(&self, id: &str, opts: &RequestOptions) -> SourceResult<Vec<Episode>> {
        self.respond(format!("episodes:{id}"), opts, || {
            Ok(self
                .find(id)
                .map(|t| {
                    (1..=t.episodes)
                        .map(|number| Episode {
                            id: ids::namespaced(&self.name, &format!("{}?ep={number}", t.native_id)),
                            number,
                            title: None,
                            is_filler: false,
                        })
                        .collect()
                })
                .unwrap_or_default())
        })
        .await
    }

    async fn get_trending(&self, page: u32, opts: &RequestOptions) -> SourceResult<Vec<AnimeSummary>> {
        self.respond("trending".to_string(), opts, || Ok(self.page("", page).results))
            .await
    }

    async fn get_latest(&self, page: u32, opts: &RequestOptions) -> SourceResult<Vec<AnimeSummary>> {
        self.respond("latest".to_string(), opts, || Ok(self.page("", page).results))
            .await
    }

    async fn get_top_rated(
        &self,
        _page: u32,
        limit: u32,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<RankedAnime>> {
        self.respond("top".to_string(), opts, || {
            Ok(self
                .titles
                .iter()
                .take(limit as usize)
                .enumerate()
                .map(|(i, t)| RankedAnime {
                    rank: i as u32 + 1,
                    anime: self.summary(t),
                })
                .collect())
        })
        .await
    }

    async fn get_streaming_links(
        &self,
        _episode_id: &str,
        server: Option<&str>,
        _category: Category,
        opts: &RequestOptions,
    ) -> SourceResult<StreamingResult> {
        if !self.streaming {
            return Err(SourceError::Unsupported {
                operation: "get_streaming_links",
            });
        }
        let server = server.unwrap_or("default").to_lowercase();
        let scripted = self.streams.get(&server).cloned();
        let fallback = self.default_stream.clone().unwrap_or_default();
        self.respond(format!("streams:{server}"), opts, || {
            scripted.unwrap_or(Ok(fallback))
        })
        .await
    }

    async fn get_episode_servers(
        &self,
        episode_id: &str,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<EpisodeServer>> {
        if !self.streaming {
            return Err(SourceError::Unsupported {
                operation: "get_episode_servers",
            });
        }
        let mut names: Vec<String> = self.streams.keys().cloned().collect();
        names.sort();
        if names.is_empty() && self.default_stream.is_some() {
            names.push("hd-1".to_string());
        }
        self.respond(format!("servers:{episode_id}"), opts, || {
            Ok(names
                .into_iter()
                .map(|name| EpisodeServer {
                    name,
                    url: None,
                    category: Category::Sub,
                })
                .collect())
        })
        .await
    }

    async fn get_by_genre(
        &self,
        genre: &str,
        page: u32,
        opts: &RequestOptions,
    ) -> SourceResult<SearchResult> {
        self.respond(format!("genre:{genre}"), opts, || Ok(self.page("", page)))
            .await
    }

    async fn get_genres(&self, opts: &RequestOptions) -> SourceResult<Vec<Genre>> {
        self.respond("genres".to_string(), opts, || {
            Ok(vec![Genre {
                id: "action".to_string(),
                name: "Action".to_string(),
            }])
        })
        .await
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}
