//! End-to-end verification of sources.
//!
//! A verification run walks one well-known title through every stage a
//! client would: search, detail page, episode list and streaming links. Each
//! stage has its own timeout and retry budget so one slow stage cannot starve
//! the others.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::VerifierConfig;
use crate::manager::SourceManager;
use crate::retry::{RetryPolicy, with_retry, with_timeout};
use crate::source::{
    AnimeSummary, Category, RequestOptions, SearchFilters, Source, SourceError, SourceResult,
    StreamingResult,
};

/// Overall verdict for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    /// Every stage works
    Pass,
    /// Streaming works but a metadata stage failed
    Warning,
    /// No playable stream could be obtained
    Fail,
}

/// Which stages succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDetails {
    pub search_works: bool,
    pub info_works: bool,
    pub episodes_works: bool,
    pub streaming_works: bool,
}

impl VerificationDetails {
    /// Streaming failure is fatal, any other failed stage is a warning.
    pub fn verdict(&self) -> VerificationStatus {
        if !self.streaming_works {
            VerificationStatus::Fail
        } else if self.search_works && self.info_works && self.episodes_works {
            VerificationStatus::Pass
        } else {
            VerificationStatus::Warning
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub source: String,
    pub status: VerificationStatus,
    pub response_time_ms: u64,
    /// First stage error, prefixed with the stage name
    pub error: Option<String>,
    pub details: VerificationDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub results: Vec<VerificationResult>,
    /// Sources that could not produce a stream, candidates for disablement
    pub failed_sources: Vec<String>,
}

/// Coarse stream quality of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamQuality {
    Hd,
    Sd,
    Low,
    Unavailable,
}

impl StreamQuality {
    /// Best quality offered by `result`.
    ///
    /// Adaptive playlists (`auto`, `default`) carry every rendition and are
    /// classified as `hd`.
    pub fn classify(result: &StreamingResult) -> Self {
        let mut best = StreamQuality::Unavailable;
        for variant in &result.sources {
            let label = variant.quality.trim().to_lowercase();
            let quality = match (label.as_str(), variant.resolution()) {
                ("hd" | "fhd", _) => StreamQuality::Hd,
                (_, Some(height)) if height >= 720 => StreamQuality::Hd,
                (_, _) if variant.quality_rank() == u32::MAX => StreamQuality::Hd,
                ("sd", _) => StreamQuality::Sd,
                (_, Some(height)) if height >= 360 => StreamQuality::Sd,
                _ => StreamQuality::Low,
            };
            if quality.rank() > best.rank() {
                best = quality;
            }
        }
        best
    }

    fn rank(self) -> u8 {
        match self {
            StreamQuality::Hd => 3,
            StreamQuality::Sd => 2,
            StreamQuality::Low => 1,
            StreamQuality::Unavailable => 0,
        }
    }
}

/// Runs staged probes against sources.
#[derive(Debug, Clone)]
pub struct SourceVerifier {
    test_title: String,
    stage_timeout: Duration,
    policy: RetryPolicy,
}

impl Default for SourceVerifier {
    fn default() -> Self {
        Self::new(&VerifierConfig::default())
    }
}

impl SourceVerifier {
    pub fn new(config: &VerifierConfig) -> Self {
        Self {
            test_title: config.test_title.clone(),
            stage_timeout: config.stage_timeout,
            policy: RetryPolicy::fixed(config.attempts, config.backoff),
        }
    }

    /// Title searched for during verification.
    pub fn test_title(&self) -> &str {
        &self.test_title
    }

    /// Verifies a single source. Never fails: every problem is reported in
    /// the result.
    pub async fn verify_source(
        &self,
        source: &dyn Source,
        cancel: &CancellationToken,
    ) -> VerificationResult {
        let started = Instant::now();
        let mut details = VerificationDetails::default();
        let mut first_error: Option<String> = None;
        let mut note = |stage: &str, error: &SourceError| {
            tracing::debug!(source = source.name(), stage, error = %error, "Verification stage failed");
            first_error.get_or_insert_with(|| format!("{stage}: {error}"));
        };

        let title = self.test_title.as_str();
        let filters = &SearchFilters::default();
        let search = self
            .stage(cancel, |opts| async move {
                source.search(title, 1, filters, &opts).await
            })
            .await;

        let derived_id = match search {
            Ok(page) => match best_match(&page.results, title) {
                Some(best) => {
                    details.search_works = true;
                    Some(best.id.clone())
                }
                None => {
                    note("search", &SourceError::NotFound { id: title.to_string() });
                    None
                }
            },
            Err(error) => {
                note("search", &error);
                None
            }
        };

        let mut first_episode: Option<String> = None;
        if let Some(id) = derived_id.as_deref() {
            match self
                .stage(cancel, |opts| async move { source.get_anime(id, &opts).await })
                .await
            {
                Ok(Some(_)) => details.info_works = true,
                Ok(None) => note("info", &SourceError::NotFound { id: id.to_string() }),
                Err(error) => note("info", &error),
            }

            match self
                .stage(cancel, |opts| async move { source.get_episodes(id, &opts).await })
                .await
            {
                Ok(episodes) if !episodes.is_empty() => {
                    details.episodes_works = true;
                    first_episode = episodes.into_iter().next().map(|e| e.id);
                }
                Ok(_) => note("episodes", &SourceError::NotFound { id: id.to_string() }),
                Err(error) => note("episodes", &error),
            }
        }

        if !source.supports_streaming() {
            note(
                "streaming",
                &SourceError::Unsupported {
                    operation: "get_streaming_links",
                },
            );
        } else if let Some(episode_id) = first_episode.as_deref() {
            match self
                .stage(cancel, |opts| async move {
                    source
                        .get_streaming_links(episode_id, None, Category::Sub, &opts)
                        .await
                })
                .await
            {
                Ok(result) if result.is_playable() => details.streaming_works = true,
                Ok(_) => note(
                    "streaming",
                    &SourceError::NotFound {
                        id: episode_id.to_string(),
                    },
                ),
                Err(error) => note("streaming", &error),
            }
        } else {
            note(
                "streaming",
                &SourceError::NotFound {
                    id: self.test_title.clone(),
                },
            );
        }

        let status = details.verdict();
        tracing::info!(source = source.name(), status = ?status, "Verification finished");

        VerificationResult {
            source: source.name().to_string(),
            status,
            response_time_ms: started.elapsed().as_millis() as u64,
            error: first_error,
            details,
        }
    }

    /// Verifies every registered source concurrently.
    pub async fn verify_all_sources(
        &self,
        manager: &SourceManager,
        cancel: &CancellationToken,
    ) -> VerificationReport {
        self.verify_sources(manager.sources(), cancel).await
    }

    /// Verifies the given sources concurrently.
    pub async fn verify_sources(
        &self,
        sources: &[Arc<dyn Source>],
        cancel: &CancellationToken,
    ) -> VerificationReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(%run_id, sources = sources.len(), "Starting verification run");

        let results = join_all(
            sources
                .iter()
                .map(|source| self.verify_source(source.as_ref(), cancel)),
        )
        .await;

        let failed_sources: Vec<String> = results
            .iter()
            .filter(|r| r.status == VerificationStatus::Fail)
            .map(|r| r.source.clone())
            .collect();
        for name in &failed_sources {
            tracing::warn!(source = %name, "Source failed verification, consider disabling it");
        }

        VerificationReport {
            run_id,
            started_at,
            results,
            failed_sources,
        }
    }

    /// Fetches a stream for the test title and classifies its best variant.
    pub async fn get_stream_quality(
        &self,
        source: &Arc<dyn Source>,
        cancel: &CancellationToken,
    ) -> StreamQuality {
        if !source.supports_streaming() {
            return StreamQuality::Unavailable;
        }
        match self.sample_stream(source.as_ref(), cancel).await {
            Ok(result) => StreamQuality::classify(&result),
            Err(error) => {
                tracing::debug!(source = source.name(), error = %error, "No stream to classify");
                StreamQuality::Unavailable
            }
        }
    }

    async fn sample_stream(
        &self,
        source: &dyn Source,
        cancel: &CancellationToken,
    ) -> SourceResult<StreamingResult> {
        let title = self.test_title.as_str();
        let filters = &SearchFilters::default();
        let page = self
            .stage(cancel, |opts| async move {
                source.search(title, 1, filters, &opts).await
            })
            .await?;
        let id = best_match(&page.results, title)
            .map(|a| a.id.clone())
            .ok_or_else(|| SourceError::NotFound { id: title.to_string() })?;

        let id = id.as_str();
        let episodes = self
            .stage(cancel, |opts| async move { source.get_episodes(id, &opts).await })
            .await?;
        let episode_id = episodes
            .first()
            .map(|e| e.id.as_str())
            .ok_or_else(|| SourceError::NotFound { id: id.to_string() })?;

        self.stage(cancel, |opts| async move {
            source
                .get_streaming_links(episode_id, None, Category::Sub, &opts)
                .await
        })
        .await
    }

    /// One stage: a fresh child token and timeout per attempt, retried per
    /// the policy.
    async fn stage<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> SourceResult<T>
    where
        F: Fn(RequestOptions) -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let timeout = self.stage_timeout;
        with_retry(&self.policy, cancel, |_attempt| {
            let opts = RequestOptions::with_cancel(cancel.child_token()).timeout(timeout);
            let token = opts.cancel.clone();
            let call = op(opts);
            async move { with_timeout(call, timeout, &token).await }
        })
        .await
    }
}

/// Result whose title is closest to `wanted`, first one on ties.
fn best_match<'a>(results: &'a [AnimeSummary], wanted: &str) -> Option<&'a AnimeSummary> {
    let wanted = wanted.to_lowercase();
    let mut best: Option<(&AnimeSummary, f64)> = None;
    for candidate in results {
        let score = strsim::normalized_levenshtein(&candidate.title.to_lowercase(), &wanted);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }
    best.map(|(candidate, _)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VideoVariant;
    use crate::testing::MockSource;

    fn verifier() -> SourceVerifier {
        SourceVerifier::new(&crate::config::AnifoldConfig::for_testing().verifier)
    }

    fn variant(quality: &str) -> VideoVariant {
        VideoVariant {
            url: "https://cdn.test/v.m3u8".to_string(),
            quality: quality.to_string(),
            is_m3u8: true,
            is_dash: false,
        }
    }

    #[tokio::test]
    async fn test_healthy_source_passes() {
        let source = MockSource::new("Mock")
            .with_title("naruto-shippuden-355", "Naruto Shippuden", 500)
            .with_title("naruto-677", "Naruto", 220)
            .with_default_stream();

        let result = verifier()
            .verify_source(&source, &CancellationToken::new())
            .await;

        assert_eq!(result.status, VerificationStatus::Pass);
        assert_eq!(result.error, None);
        assert!(source.calls().contains(&"anime:mock-naruto-677".to_string()));
        assert!(source.calls().contains(&"streams:default".to_string()));
    }

    #[tokio::test]
    async fn test_no_stream_fails() {
        let source = MockSource::new("Mock").with_title("naruto-677", "Naruto", 2);

        let result = verifier()
            .verify_source(&source, &CancellationToken::new())
            .await;

        assert_eq!(result.status, VerificationStatus::Fail);
        assert!(result.details.search_works && result.details.episodes_works);
        assert!(!result.details.streaming_works);
        assert!(result.error.unwrap().starts_with("streaming"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_source_is_retried_then_fails() {
        let source = MockSource::new("Mock").failing(SourceError::Network {
            reason: "refused".to_string(),
        });

        let result = verifier()
            .verify_source(&source, &CancellationToken::new())
            .await;

        assert_eq!(result.status, VerificationStatus::Fail);
        assert_eq!(result.details, VerificationDetails::default());
        assert_eq!(source.call_count("search:"), 2);
        assert_eq!(result.error.as_deref(), Some("search: Network error: refused"));
    }

    #[tokio::test]
    async fn test_streaming_unsupported_skips_stage() {
        let source = MockSource::new("Mock")
            .with_title("naruto-677", "Naruto", 2)
            .without_streaming();

        let result = verifier()
            .verify_source(&source, &CancellationToken::new())
            .await;
        assert_eq!(result.status, VerificationStatus::Fail);
        assert_eq!(source.call_count("streams:"), 0);
    }

    #[test]
    fn test_metadata_failure_is_only_a_warning() {
        let details = VerificationDetails {
            search_works: true,
            info_works: false,
            episodes_works: true,
            streaming_works: true,
        };
        assert_eq!(details.verdict(), VerificationStatus::Warning);
    }

    #[tokio::test]
    async fn test_verify_all_lists_failed_sources() {
        let good = Arc::new(
            MockSource::new("Good")
                .with_title("naruto", "Naruto", 1)
                .with_default_stream(),
        );
        let bad = Arc::new(MockSource::new("Bad"));
        let manager = SourceManager::builder()
            .register(good)
            .register(bad)
            .build()
            .unwrap();

        let report = verifier()
            .verify_all_sources(&manager, &CancellationToken::new())
            .await;
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.failed_sources, vec!["Bad".to_string()]);
    }

    #[test]
    fn test_quality_classification() {
        let classify = |labels: &[&str]| {
            StreamQuality::classify(&StreamingResult {
                sources: labels.iter().map(|l| variant(l)).collect(),
                ..Default::default()
            })
        };
        assert_eq!(classify(&["1080p"]), StreamQuality::Hd);
        assert_eq!(classify(&["auto"]), StreamQuality::Hd);
        assert_eq!(classify(&["360p", "480p"]), StreamQuality::Sd);
        assert_eq!(classify(&["240p"]), StreamQuality::Low);
        assert_eq!(classify(&[]), StreamQuality::Unavailable);
    }

    #[test]
    fn test_best_match_prefers_closest_title() {
        let summary = |title: &str| AnimeSummary {
            id: title.to_lowercase(),
            title: title.to_string(),
            image: None,
            kind: None,
            episodes_sub: None,
            episodes_dub: None,
            source: None,
        };
        let results = vec![summary("Boruto: Naruto Next Generations"), summary("Naruto")];
        assert_eq!(best_match(&results, "naruto").unwrap().title, "Naruto");
        assert!(best_match(&[], "naruto").is_none());
    }
}
