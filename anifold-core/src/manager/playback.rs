//! Multi-server playback fallback.

use std::collections::HashMap;

use serde::Serialize;

use super::SourceManager;
use crate::source::{
    Category, RequestOptions, SourceError, StreamingResult, SubtitleTrack, TimeRange, VideoVariant,
};

/// Playable links plus which server produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchOutcome {
    pub sources: Vec<VideoVariant>,
    pub subtitles: Vec<SubtitleTrack>,
    pub headers: HashMap<String, String>,
    pub intro: Option<TimeRange>,
    pub outro: Option<TimeRange>,
    pub server: String,
    pub tried_servers: Vec<String>,
}

impl WatchOutcome {
    fn new(result: StreamingResult, server: String, tried_servers: Vec<String>) -> Self {
        Self {
            sources: result.sources,
            subtitles: result.subtitles,
            headers: result.headers,
            intro: result.intro,
            outro: result.outro,
            server,
            tried_servers,
        }
    }
}

/// Diagnostics returned when no server produced a playable stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchFailure {
    pub error: String,
    pub episode_id: String,
    pub tried_servers: Vec<String>,
    pub last_error: Option<String>,
    pub suggestion: String,
    /// The caller went away before a server answered.
    #[serde(skip)]
    pub cancelled: bool,
}

/// Servers to try, in order.
///
/// The requested server comes first, followed by `defaults` without
/// duplicates. A requested server with `try_all` unset is tried alone.
pub fn candidate_servers(requested: Option<&str>, try_all: bool, defaults: &[String]) -> Vec<String> {
    let requested = requested.map(str::trim).filter(|s| !s.is_empty());

    if let Some(server) = requested {
        if !try_all {
            return vec![server.to_string()];
        }
    }

    let mut candidates: Vec<String> = Vec::with_capacity(defaults.len() + 1);
    for server in requested.into_iter().chain(defaults.iter().map(String::as_str)) {
        if !candidates.iter().any(|c| c.eq_ignore_ascii_case(server)) {
            candidates.push(server.to_string());
        }
    }
    candidates
}

impl SourceManager {
    /// Tries each candidate server on the source owning `episode_id` and
    /// returns the first result with at least one variant.
    ///
    /// # Errors
    ///
    /// - `WatchFailure` - Every candidate failed or returned nothing, or the
    ///   caller cancelled (`cancelled` is set)
    pub async fn get_streaming_links_with_fallback(
        &self,
        episode_id: &str,
        server: Option<&str>,
        category: Category,
        try_all: bool,
        opts: &RequestOptions,
    ) -> Result<WatchOutcome, WatchFailure> {
        let candidates = candidate_servers(server, try_all, &self.default_servers);
        let mut tried_servers = Vec::with_capacity(candidates.len());
        let mut last_error: Option<String> = None;

        for candidate in candidates {
            if opts.cancel.is_cancelled() {
                return Err(self.watch_failure(episode_id, tried_servers, last_error, true, try_all));
            }
            tried_servers.push(candidate.clone());

            match self
                .get_streaming_links(episode_id, Some(&candidate), category, opts)
                .await
            {
                Ok(result) if result.is_playable() => {
                    tracing::info!(
                        episode_id,
                        server = %candidate,
                        tried = tried_servers.len(),
                        "Resolved playable stream"
                    );
                    return Ok(WatchOutcome::new(result, candidate, tried_servers));
                }
                Ok(_) => {
                    tracing::debug!(episode_id, server = %candidate, "Server returned no sources");
                    last_error = Some(format!("No sources returned by {candidate}"));
                }
                Err(SourceError::Cancelled) => {
                    return Err(self.watch_failure(
                        episode_id,
                        tried_servers,
                        last_error,
                        true,
                        try_all,
                    ));
                }
                Err(error) => {
                    tracing::warn!(
                        episode_id,
                        server = %candidate,
                        error = %error,
                        "Server failed, trying next"
                    );
                    last_error = Some(error.to_string());
                }
            }
        }

        Err(self.watch_failure(episode_id, tried_servers, last_error, false, try_all))
    }

    fn watch_failure(
        &self,
        episode_id: &str,
        tried_servers: Vec<String>,
        last_error: Option<String>,
        cancelled: bool,
        try_all: bool,
    ) -> WatchFailure {
        let suggestion = if cancelled {
            "The request was cancelled before a server answered".to_string()
        } else if tried_servers.len() == 1 && !try_all {
            "Retry with tryAll=true to fall back to the other servers".to_string()
        } else {
            "Try the other category (sub/dub) or come back later".to_string()
        };

        WatchFailure {
            error: "No playable sources found".to_string(),
            episode_id: episode_id.to_string(),
            tried_servers,
            last_error,
            suggestion,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::MockSource;

    fn defaults() -> Vec<String> {
        vec!["hd-2".to_string(), "hd-1".to_string(), "hd-3".to_string()]
    }

    #[test]
    fn test_candidate_order() {
        assert_eq!(candidate_servers(None, false, &defaults()), vec!["hd-2", "hd-1", "hd-3"]);
        assert_eq!(candidate_servers(Some("hd-1"), false, &defaults()), vec!["hd-1"]);
        assert_eq!(
            candidate_servers(Some("hd-1"), true, &defaults()),
            vec!["hd-1", "hd-2", "hd-3"]
        );
        assert_eq!(
            candidate_servers(Some("vidstream"), true, &defaults()),
            vec!["vidstream", "hd-2", "hd-1", "hd-3"]
        );
        assert_eq!(candidate_servers(Some("  "), false, &defaults()), vec!["hd-2", "hd-1", "hd-3"]);
    }

    #[tokio::test]
    async fn test_falls_through_to_third_server() {
        let source = Arc::new(
            MockSource::new("Mock")
                .with_stream_error(
                    "hd-2",
                    SourceError::Upstream {
                        status: 403,
                        url: "https://cdn.test".to_string(),
                    },
                )
                .with_stream("hd-1", StreamingResult::default())
                .with_default_stream(),
        );
        let manager = SourceManager::builder()
            .register(source.clone())
            .build()
            .unwrap();

        let outcome = manager
            .get_streaming_links_with_fallback(
                "mock-ep-1",
                None,
                Category::Sub,
                false,
                &RequestOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.server, "hd-3");
        assert_eq!(outcome.tried_servers, vec!["hd-2", "hd-1", "hd-3"]);
        assert!(!outcome.sources.is_empty());
    }

    #[tokio::test]
    async fn test_total_failure_reports_diagnostics() {
        let source = Arc::new(MockSource::new("Mock").with_stream_error(
            "hd-1",
            SourceError::Network {
                reason: "reset".to_string(),
            },
        ));
        let manager = SourceManager::builder()
            .register(source.clone())
            .build()
            .unwrap();

        let failure = manager
            .get_streaming_links_with_fallback(
                "mock-ep-1",
                Some("hd-1"),
                Category::Dub,
                false,
                &RequestOptions::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(failure.tried_servers, vec!["hd-1"]);
        assert_eq!(failure.episode_id, "mock-ep-1");
        assert_eq!(failure.last_error.as_deref(), Some("Network error: reset"));
        assert!(failure.suggestion.contains("tryAll"));
        assert!(!failure.cancelled);
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_loop() {
        let source = Arc::new(MockSource::new("Mock"));
        let manager = SourceManager::builder()
            .register(source.clone())
            .build()
            .unwrap();
        let opts = RequestOptions::default();
        opts.cancel.cancel();

        let failure = manager
            .get_streaming_links_with_fallback("mock-ep-1", None, Category::Sub, true, &opts)
            .await
            .unwrap_err();
        assert!(failure.cancelled);
        assert!(failure.tried_servers.is_empty());
        assert!(source.calls().is_empty());
    }
}
