//! Source registry and per-request source selection.
//!
//! The manager is built once at boot and shared behind an `Arc`. Generic
//! catalogue calls pick a working source; stream-related calls are routed to
//! the source that issued the ID.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::AnifoldConfig;
use crate::source::{
    AnimeDetail, AnimeSummary, Category, DemoSource, Episode, EpisodeServer, Genre, HealthStatus,
    JsonApiSource, RankedAnime, RequestOptions, SearchFilters, SearchResult, Source, SourceError,
    SourceInfo, SourceResult, StreamingResult, ids,
};
use crate::{AnifoldError, Result};

mod health;
mod playback;

pub use playback::{WatchFailure, WatchOutcome, candidate_servers};

/// Registry of sources plus the selection policy.
#[derive(Debug)]
pub struct SourceManager {
    sources: Vec<Arc<dyn Source>>,
    source_order: Vec<String>,
    primary: Arc<dyn Source>,
    preferred: RwLock<Option<String>>,
    health: RwLock<HashMap<String, HealthStatus>>,
    default_servers: Vec<String>,
    health_timeout: Duration,
}

/// Builder for [`SourceManager`].
#[derive(Debug, Default)]
pub struct SourceManagerBuilder {
    sources: Vec<Arc<dyn Source>>,
    source_order: Vec<String>,
    primary: Option<String>,
    preferred: Option<String>,
    default_servers: Option<Vec<String>>,
    health_timeout: Option<Duration>,
}

impl SourceManagerBuilder {
    /// Registers a source. Registration order is the fallback iteration order.
    pub fn register(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    /// Priority list consulted before registration order.
    pub fn source_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_order = order.into_iter().map(Into::into).collect();
        self
    }

    /// Source of last resort. Defaults to the first registered source.
    pub fn primary(mut self, name: impl Into<String>) -> Self {
        self.primary = Some(name.into());
        self
    }

    /// Initial runtime preference.
    pub fn preferred(mut self, name: impl Into<String>) -> Self {
        self.preferred = Some(name.into());
        self
    }

    /// Server order tried by the watch fallback.
    pub fn default_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_servers = Some(servers.into_iter().map(Into::into).collect());
        self
    }

    /// Timeout applied to each health probe.
    pub fn health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = Some(timeout);
        self
    }

    /// Validates the registry and builds the manager.
    ///
    /// # Errors
    ///
    /// - `AnifoldError::NoSources` - Nothing was registered
    /// - `AnifoldError::Configuration` - Two sources share a name
    /// - `AnifoldError::UnknownSource` - Primary or preferred source is not registered
    pub fn build(self) -> Result<SourceManager> {
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(ids::slug(source.name())) {
                return Err(AnifoldError::Configuration {
                    reason: format!("Source {} registered twice", source.name()),
                });
            }
        }

        let primary = match &self.primary {
            Some(name) => find(&self.sources, name).ok_or_else(|| AnifoldError::UnknownSource {
                name: name.clone(),
            })?,
            None => self.sources.first().cloned().ok_or(AnifoldError::NoSources)?,
        };

        if let Some(name) = &self.preferred {
            if find(&self.sources, name).is_none() {
                return Err(AnifoldError::UnknownSource { name: name.clone() });
            }
        }

        for name in &self.source_order {
            if find(&self.sources, name).is_none() {
                tracing::warn!(source = %name, "Source order lists an unregistered source");
            }
        }

        let defaults = AnifoldConfig::default();
        Ok(SourceManager {
            sources: self.sources,
            source_order: self.source_order,
            primary,
            preferred: RwLock::new(self.preferred),
            health: RwLock::new(HashMap::new()),
            default_servers: self
                .default_servers
                .unwrap_or(defaults.sources.default_servers),
            health_timeout: self
                .health_timeout
                .unwrap_or(defaults.sources.health_check_timeout),
        })
    }
}

fn find(sources: &[Arc<dyn Source>], name: &str) -> Option<Arc<dyn Source>> {
    let wanted = ids::slug(name);
    sources
        .iter()
        .find(|s| ids::slug(s.name()) == wanted)
        .cloned()
}

impl SourceManager {
    pub fn builder() -> SourceManagerBuilder {
        SourceManagerBuilder::default()
    }

    /// Builds the registry described by `config`.
    ///
    /// JSON API sources get a background cache sweeper bound to `cancel`.
    /// The demo source is registered when `demo` is set or nothing else is
    /// configured.
    ///
    /// # Errors
    ///
    /// - `AnifoldError::Configuration` - A registration is invalid
    /// - `AnifoldError::UnknownSource` - The primary source is not registered
    pub fn from_config(
        config: &AnifoldConfig,
        demo: bool,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut builder = Self::builder()
            .source_order(config.sources.source_order.clone())
            .default_servers(config.sources.default_servers.clone())
            .health_timeout(config.sources.health_check_timeout);

        for registration in &config.sources.registrations {
            let source =
                JsonApiSource::new(&registration.name, &registration.base_url, config)?;
            source.spawn_cache_sweeper(cancel.child_token());
            tracing::info!(
                source = %registration.name,
                url = %registration.base_url,
                "Registered JSON API source"
            );
            builder = builder.register(Arc::new(source));
        }

        if demo || config.sources.registrations.is_empty() {
            tracing::info!("Registered demo source");
            builder = builder.register(Arc::new(DemoSource::new(&config.sources)));
        }

        if let Some(primary) = &config.sources.primary_source {
            builder = builder.primary(primary.clone());
        }

        builder.build()
    }

    /// Registered sources in registration order.
    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.sources
    }

    /// Looks a source up by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<Arc<dyn Source>> {
        find(&self.sources, name)
    }

    /// Source of last resort.
    pub fn primary(&self) -> &Arc<dyn Source> {
        &self.primary
    }

    /// Current runtime preference.
    pub fn preferred(&self) -> Option<String> {
        self.preferred.read().clone()
    }

    /// Sets or clears the runtime preference.
    ///
    /// # Errors
    ///
    /// - `AnifoldError::UnknownSource` - The source is not registered
    pub fn set_preferred(&self, name: Option<&str>) -> Result<()> {
        let resolved = match name {
            Some(name) => Some(
                self.get(name)
                    .ok_or_else(|| AnifoldError::UnknownSource {
                        name: name.to_string(),
                    })?
                    .name()
                    .to_string(),
            ),
            None => None,
        };
        tracing::info!(preferred = ?resolved, "Preferred source changed");
        *self.preferred.write() = resolved;
        Ok(())
    }

    /// Server order used by the watch fallback.
    pub fn default_servers(&self) -> &[String] {
        &self.default_servers
    }

    /// Picks a source for a generic call.
    ///
    /// Order: the explicit or runtime preference if available, the first
    /// available entry of the priority list, the first available source in
    /// registration order, then the primary source regardless of state.
    pub fn select_source(&self, preferred: Option<&str>) -> Arc<dyn Source> {
        let runtime_preference = self.preferred();
        let wanted = preferred.or(runtime_preference.as_deref());

        if let Some(source) = wanted.and_then(|name| self.get(name)) {
            if source.is_available() {
                return source;
            }
            tracing::debug!(source = source.name(), "Preferred source is offline");
        }

        if let Some(source) = self
            .source_order
            .iter()
            .filter_map(|name| self.get(name))
            .find(|s| s.is_available())
        {
            return source;
        }

        if let Some(source) = self.sources.iter().find(|s| s.is_available()) {
            return Arc::clone(source);
        }

        tracing::warn!(
            source = self.primary.name(),
            "No source available, falling back to primary"
        );
        Arc::clone(&self.primary)
    }

    /// Source that issued `id`. Un-prefixed IDs belong to the primary source.
    pub fn source_for_id(&self, id: &str) -> Arc<dyn Source> {
        self.owner_of(id)
            .unwrap_or_else(|| Arc::clone(&self.primary))
    }

    fn owner_of(&self, id: &str) -> Option<Arc<dyn Source>> {
        let owner = ids::owner(id, self.sources.iter().map(|s| s.name()))?;
        self.get(owner)
    }

    /// Owner for prefixed IDs, generic selection otherwise.
    fn route(&self, id: &str, preferred: Option<&str>) -> Arc<dyn Source> {
        self.owner_of(id)
            .unwrap_or_else(|| self.select_source(preferred))
    }

    /// Turns a source failure into an empty answer. Only cancellation
    /// reaches the caller.
    fn absorb<T>(
        &self,
        source: &dyn Source,
        operation: &'static str,
        result: SourceResult<T>,
    ) -> SourceResult<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(SourceError::Cancelled) => Err(SourceError::Cancelled),
            Err(error) => {
                tracing::warn!(
                    source = source.name(),
                    operation,
                    error = %error,
                    "Source call failed, returning empty result"
                );
                Ok(None)
            }
        }
    }

    /// Searches the selected source and stamps the result with its name.
    ///
    /// # Errors
    ///
    /// - `SourceError::Cancelled` - The caller gave up
    pub async fn search(
        &self,
        query: &str,
        page: u32,
        filters: &SearchFilters,
        preferred: Option<&str>,
        opts: &RequestOptions,
    ) -> SourceResult<SearchResult> {
        let source = self.select_source(preferred);
        let result = source.search(query, page, filters, opts).await;
        let mut page_result = self
            .absorb(source.as_ref(), "search", result)?
            .unwrap_or_else(|| SearchResult::empty(page.max(1)));
        page_result.stamp_source(source.name());
        Ok(page_result)
    }

    /// Detail page, routed by ID prefix when present.
    ///
    /// # Errors
    ///
    /// - `SourceError::Cancelled` - The caller gave up
    pub async fn get_anime(
        &self,
        id: &str,
        preferred: Option<&str>,
        opts: &RequestOptions,
    ) -> SourceResult<Option<AnimeDetail>> {
        let source = self.route(id, preferred);
        let result = source.get_anime(id, opts).await;
        Ok(self
            .absorb(source.as_ref(), "get_anime", result)?
            .flatten()
            .map(|mut detail| {
                detail.source = Some(source.name().to_string());
                detail
            }))
    }

    /// Episode list, routed by ID prefix when present.
    ///
    /// # Errors
    ///
    /// - `SourceError::Cancelled` - The caller gave up
    pub async fn get_episodes(
        &self,
        id: &str,
        preferred: Option<&str>,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<Episode>> {
        let source = self.route(id, preferred);
        let result = source.get_episodes(id, opts).await;
        Ok(self
            .absorb(source.as_ref(), "get_episodes", result)?
            .unwrap_or_default())
    }

    /// # Errors
    ///
    /// - `SourceError::Cancelled` - The caller gave up
    pub async fn get_trending(
        &self,
        page: u32,
        preferred: Option<&str>,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<AnimeSummary>> {
        let source = self.select_source(preferred);
        let result = source.get_trending(page, opts).await;
        let items = self.absorb(source.as_ref(), "get_trending", result)?;
        Ok(stamp_all(items.unwrap_or_default(), source.name()))
    }

    /// # Errors
    ///
    /// - `SourceError::Cancelled` - The caller gave up
    pub async fn get_latest(
        &self,
        page: u32,
        preferred: Option<&str>,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<AnimeSummary>> {
        let source = self.select_source(preferred);
        let result = source.get_latest(page, opts).await;
        let items = self.absorb(source.as_ref(), "get_latest", result)?;
        Ok(stamp_all(items.unwrap_or_default(), source.name()))
    }

    /// # Errors
    ///
    /// - `SourceError::Cancelled` - The caller gave up
    pub async fn get_top_rated(
        &self,
        page: u32,
        limit: u32,
        preferred: Option<&str>,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<RankedAnime>> {
        let source = self.select_source(preferred);
        let result = source.get_top_rated(page, limit, opts).await;
        let mut items = self
            .absorb(source.as_ref(), "get_top_rated", result)?
            .unwrap_or_default();
        for item in &mut items {
            item.anime.source = Some(source.name().to_string());
        }
        Ok(items)
    }

    /// # Errors
    ///
    /// - `SourceError::Cancelled` - The caller gave up
    pub async fn get_by_genre(
        &self,
        genre: &str,
        page: u32,
        preferred: Option<&str>,
        opts: &RequestOptions,
    ) -> SourceResult<SearchResult> {
        let source = self.select_source(preferred);
        let result = source.get_by_genre(genre, page, opts).await;
        let mut page_result = self
            .absorb(source.as_ref(), "get_by_genre", result)?
            .unwrap_or_else(|| SearchResult::empty(page.max(1)));
        page_result.stamp_source(source.name());
        Ok(page_result)
    }

    /// # Errors
    ///
    /// - `SourceError::Cancelled` - The caller gave up
    pub async fn get_genres(
        &self,
        preferred: Option<&str>,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<Genre>> {
        let source = self.select_source(preferred);
        let result = source.get_genres(opts).await;
        Ok(self
            .absorb(source.as_ref(), "get_genres", result)?
            .unwrap_or_default())
    }

    /// Servers for an episode, always asked of the source that issued the ID.
    ///
    /// # Errors
    ///
    /// - `SourceError::Cancelled` - The caller gave up
    pub async fn get_episode_servers(
        &self,
        episode_id: &str,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<EpisodeServer>> {
        let source = self.source_for_id(episode_id);
        let result = source.get_episode_servers(episode_id, opts).await;
        Ok(self
            .absorb(source.as_ref(), "get_episode_servers", result)?
            .unwrap_or_default())
    }

    /// Streaming links for one server, routed by ID ownership. Errors are
    /// returned as-is so callers can try the next server.
    ///
    /// # Errors
    ///
    /// - Any `SourceError` reported by the owning source
    pub async fn get_streaming_links(
        &self,
        episode_id: &str,
        server: Option<&str>,
        category: Category,
        opts: &RequestOptions,
    ) -> SourceResult<StreamingResult> {
        let source = self.source_for_id(episode_id);
        tracing::debug!(
            source = source.name(),
            episode_id,
            server = ?server,
            "Fetching streaming links"
        );
        let mut result = source
            .get_streaming_links(episode_id, server, category, opts)
            .await?;
        result.sort_variants();
        Ok(result)
    }

    /// Registry introspection.
    pub fn list_sources(&self) -> Vec<SourceInfo> {
        let preferred = self.preferred().map(|p| ids::slug(&p));
        let primary = ids::slug(self.primary.name());

        self.sources
            .iter()
            .map(|source| {
                let slug = ids::slug(source.name());
                let snapshot = source.tracker().snapshot();
                SourceInfo {
                    name: source.name().to_string(),
                    base_url: source.base_url().to_string(),
                    available: snapshot.available,
                    consecutive_failures: snapshot.consecutive_failures,
                    is_primary: slug == primary,
                    is_preferred: preferred.as_deref() == Some(slug.as_str()),
                    priority: self
                        .source_order
                        .iter()
                        .position(|name| ids::slug(name) == slug),
                }
            })
            .collect()
    }
}

fn stamp_all(mut items: Vec<AnimeSummary>, source: &str) -> Vec<AnimeSummary> {
    for item in &mut items {
        item.source = Some(source.to_string());
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSource;

    fn offline(source: &MockSource) {
        for _ in 0..source.tracker().threshold() {
            source.tracker().record_failure();
        }
        assert!(!source.is_available());
    }

    #[tokio::test]
    async fn test_preferred_offline_falls_to_priority_order() {
        let a = Arc::new(MockSource::new("A").with_title("show", "Show A", 1));
        let b = Arc::new(MockSource::new("B").with_title("show", "Show B", 1));
        let c = Arc::new(MockSource::new("C").with_title("show", "Show C", 1));
        offline(&a);

        let manager = SourceManager::builder()
            .register(c.clone())
            .register(a.clone())
            .register(b.clone())
            .source_order(["B", "C"])
            .build()
            .unwrap();

        let result = manager
            .search("show", 1, &SearchFilters::default(), Some("A"), &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(result.source.as_deref(), Some("B"));
        assert_eq!(result.results[0].title, "Show B");
        assert_eq!(result.results[0].source.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_falls_back_to_registration_then_primary() {
        let a = Arc::new(MockSource::new("A"));
        let b = Arc::new(MockSource::new("B"));
        offline(&a);

        let manager = SourceManager::builder()
            .register(a.clone())
            .register(b.clone())
            .primary("A")
            .build()
            .unwrap();
        assert_eq!(manager.select_source(None).name(), "B");

        offline(&b);
        assert_eq!(manager.select_source(None).name(), "A");
    }

    #[tokio::test]
    async fn test_runtime_preference() {
        let manager = SourceManager::builder()
            .register(Arc::new(MockSource::new("A")))
            .register(Arc::new(MockSource::new("B")))
            .build()
            .unwrap();

        manager.set_preferred(Some("b")).unwrap();
        assert_eq!(manager.preferred().as_deref(), Some("B"));
        assert_eq!(manager.select_source(None).name(), "B");
        assert_eq!(manager.select_source(Some("A")).name(), "A");

        assert!(matches!(
            manager.set_preferred(Some("Z")),
            Err(AnifoldError::UnknownSource { .. })
        ));
    }

    #[tokio::test]
    async fn test_streaming_routes_by_longest_prefix() {
        let anime = Arc::new(MockSource::new("Anime"));
        let kai = Arc::new(MockSource::new("Anime Kai").with_default_stream());

        let manager = SourceManager::builder()
            .register(anime.clone())
            .register(kai.clone())
            .build()
            .unwrap();

        assert_eq!(manager.source_for_id("anime-kai-ep-1").name(), "Anime Kai");
        assert_eq!(manager.source_for_id("anime-ep-1").name(), "Anime");
        assert_eq!(manager.source_for_id("unprefixed").name(), "Anime");

        let links = manager
            .get_streaming_links("anime-kai-ep-1", Some("hd-1"), Category::Sub, &RequestOptions::default())
            .await
            .unwrap();
        assert!(links.is_playable());
        assert_eq!(kai.calls(), vec!["streams:hd-1"]);
        assert!(anime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_absorbed_but_cancellation_propagates() {
        let failing = Arc::new(MockSource::new("A").failing(SourceError::Network {
            reason: "reset".to_string(),
        }));
        let manager = SourceManager::builder()
            .register(failing.clone())
            .build()
            .unwrap();

        let trending = manager
            .get_trending(1, None, &RequestOptions::default())
            .await
            .unwrap();
        assert!(trending.is_empty());

        let opts = RequestOptions::default();
        opts.cancel.cancel();
        let result = manager.get_genres(None, &opts).await;
        assert_eq!(result, Err(SourceError::Cancelled));
    }

    #[test]
    fn test_builder_validation() {
        assert!(matches!(
            SourceManager::builder().build(),
            Err(AnifoldError::NoSources)
        ));
        assert!(matches!(
            SourceManager::builder()
                .register(Arc::new(MockSource::new("A")))
                .primary("B")
                .build(),
            Err(AnifoldError::UnknownSource { .. })
        ));
        assert!(matches!(
            SourceManager::builder()
                .register(Arc::new(MockSource::new("A")))
                .register(Arc::new(MockSource::new("a")))
                .build(),
            Err(AnifoldError::Configuration { .. })
        ));
    }

    #[test]
    fn test_list_sources_reports_roles() {
        let manager = SourceManager::builder()
            .register(Arc::new(MockSource::new("A")))
            .register(Arc::new(MockSource::new("B")))
            .source_order(["B"])
            .preferred("A")
            .build()
            .unwrap();

        let infos = manager.list_sources();
        assert!(infos[0].is_primary && infos[0].is_preferred);
        assert_eq!(infos[0].priority, None);
        assert_eq!(infos[1].priority, Some(0));
        assert!(infos.iter().all(|i| i.available));
    }
}
