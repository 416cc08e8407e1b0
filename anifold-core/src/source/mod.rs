//! Source capability contract and the in-tree implementations.
//!
//! A source is one upstream provider of anime metadata and playable video
//! links. Each concrete source owns its own failure tracker (and optionally a
//! result cache and admission throttle) and exposes them through [`Source`].

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::failure::FailureTracker;

pub mod demo;
pub mod error;
pub mod ids;
pub mod json_api;
pub mod types;

pub use demo::DemoSource;
pub use error::{SourceError, SourceResult};
pub use json_api::JsonApiSource;
pub use types::{
    AnimeDetail, AnimeSummary, Category, Episode, EpisodeServer, Genre, HealthState,
    HealthStatus, RankedAnime, SearchFilters, SearchResult, SourceInfo, StreamingResult,
    SubtitleTrack, TimeRange, VideoVariant,
};

/// Per-call options threaded through every source operation.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Fires when the caller no longer wants the result.
    pub cancel: CancellationToken,
    /// Overrides the source's default timeout.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Options bound to an existing token.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            timeout: None,
        }
    }

    /// Returns a copy with the given timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Derives options for a sub-call. Cancelling the parent cancels the
    /// child; cancelling the child leaves the parent untouched.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            timeout: self.timeout,
        }
    }

    /// Effective timeout given the source's default.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }

    /// Returns `Err(Cancelled)` if the token already fired.
    ///
    /// # Errors
    ///
    /// - `SourceError::Cancelled` - The caller gave up
    pub fn check(&self) -> SourceResult<()> {
        if self.cancel.is_cancelled() {
            Err(SourceError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Capability contract every source implements.
///
/// Implementations classify their own errors and record them on their
/// [`FailureTracker`]; callers only decide what to do with the result.
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Display name, also the basis of the ID prefix.
    fn name(&self) -> &str;

    /// Upstream base URL.
    fn base_url(&self) -> &str;

    /// Failure state owned by this source.
    fn tracker(&self) -> &FailureTracker;

    /// Cheap liveness probe. Its outcome never touches [`Self::tracker`].
    ///
    /// # Errors
    /// - `SourceError::Cancelled` / `SourceError::Timeout` - Probe did not finish
    /// - `SourceError::Network` - Upstream unreachable
    async fn health_check(&self, opts: &RequestOptions) -> SourceResult<bool>;

    /// Searches the catalogue.
    ///
    /// # Errors
    /// - `SourceError::Upstream` / `SourceError::Network` / `SourceError::Parse` - Upstream failure
    /// - `SourceError::Cancelled` / `SourceError::Timeout` - Caller gave up
    async fn search(
        &self,
        query: &str,
        page: u32,
        filters: &SearchFilters,
        opts: &RequestOptions,
    ) -> SourceResult<SearchResult>;

    /// Detail page for one title, `None` if the source does not know it.
    ///
    /// # Errors
    /// Same classification as [`Source::search`].
    async fn get_anime(&self, id: &str, opts: &RequestOptions) -> SourceResult<Option<AnimeDetail>>;

    /// Episode list for one title.
    ///
    /// # Errors
    /// Same classification as [`Source::search`].
    async fn get_episodes(&self, id: &str, opts: &RequestOptions) -> SourceResult<Vec<Episode>>;

    /// Currently trending titles.
    ///
    /// # Errors
    /// Same classification as [`Source::search`].
    async fn get_trending(&self, page: u32, opts: &RequestOptions)
    -> SourceResult<Vec<AnimeSummary>>;

    /// Recently updated titles.
    ///
    /// # Errors
    /// Same classification as [`Source::search`].
    async fn get_latest(&self, page: u32, opts: &RequestOptions) -> SourceResult<Vec<AnimeSummary>>;

    /// Top rated titles, `limit` entries per page.
    ///
    /// # Errors
    /// Same classification as [`Source::search`].
    async fn get_top_rated(
        &self,
        page: u32,
        limit: u32,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<RankedAnime>>;

    /// Playable links for an episode on one server.
    ///
    /// # Errors
    /// - `SourceError::Unsupported` - Source has no streaming support
    async fn get_streaming_links(
        &self,
        _episode_id: &str,
        _server: Option<&str>,
        _category: Category,
        _opts: &RequestOptions,
    ) -> SourceResult<StreamingResult> {
        Err(SourceError::Unsupported {
            operation: "get_streaming_links",
        })
    }

    /// Playback servers offered for an episode.
    ///
    /// # Errors
    /// - `SourceError::Unsupported` - Source has no streaming support
    async fn get_episode_servers(
        &self,
        _episode_id: &str,
        _opts: &RequestOptions,
    ) -> SourceResult<Vec<EpisodeServer>> {
        Err(SourceError::Unsupported {
            operation: "get_episode_servers",
        })
    }

    /// Titles in a genre.
    ///
    /// # Errors
    /// - `SourceError::Unsupported` - Source has no genre browsing
    async fn get_by_genre(
        &self,
        _genre: &str,
        _page: u32,
        _opts: &RequestOptions,
    ) -> SourceResult<SearchResult> {
        Err(SourceError::Unsupported {
            operation: "get_by_genre",
        })
    }

    /// Genres the source can browse.
    ///
    /// # Errors
    /// - `SourceError::Unsupported` - Source has no genre browsing
    async fn get_genres(&self, _opts: &RequestOptions) -> SourceResult<Vec<Genre>> {
        Err(SourceError::Unsupported {
            operation: "get_genres",
        })
    }

    /// Whether [`Source::get_streaming_links`] is implemented.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Shortcut for `tracker().is_available()`.
    fn is_available(&self) -> bool {
        self.tracker().is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_options_follow_parent() {
        let parent = RequestOptions::default().timeout(Duration::from_secs(3));
        let child = parent.child();
        assert_eq!(child.timeout, Some(Duration::from_secs(3)));

        child.cancel.cancel();
        assert!(parent.check().is_ok());

        let other = parent.child();
        parent.cancel.cancel();
        assert_eq!(other.check(), Err(SourceError::Cancelled));
    }

    #[test]
    fn test_timeout_or_default() {
        let opts = RequestOptions::default();
        assert_eq!(opts.timeout_or(Duration::from_secs(10)), Duration::from_secs(10));
    }
}
