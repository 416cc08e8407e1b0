//! Demo source for development and testing.
//!
//! Serves a small fixed catalogue without any network access so the full
//! search, watch and proxy workflow can be exercised offline.

use async_trait::async_trait;

use super::{
    AnimeDetail, AnimeSummary, Category, Episode, EpisodeServer, Genre, RankedAnime,
    RequestOptions, SearchFilters, SearchResult, Source, SourceResult, StreamingResult,
    SubtitleTrack, TimeRange, VideoVariant, ids,
};
use crate::config::SourceConfig;
use crate::failure::FailureTracker;

const DEMO_NAME: &str = "Demo";
const DEMO_BASE_URL: &str = "demo://catalogue";
const PAGE_SIZE: usize = 10;

/// Public HLS test stream used for every demo episode.
const DEMO_STREAM_URL: &str = "https://test-streams.mux.dev/x36xhzz/x36xhzz.m3u8";

struct DemoTitle {
    slug: &'static str,
    title: &'static str,
    kind: &'static str,
    status: &'static str,
    genres: &'static [&'static str],
    episodes: u32,
    dubbed: u32,
    rating: f32,
    description: &'static str,
}

const CATALOGUE: &[DemoTitle] = &[
    DemoTitle {
        slug: "naruto",
        title: "Naruto",
        kind: "TV",
        status: "Finished Airing",
        genres: &["Action", "Adventure", "Martial Arts"],
        episodes: 220,
        dubbed: 220,
        rating: 8.0,
        description: "A young ninja seeks recognition from his peers and dreams of becoming the village leader.",
    },
    DemoTitle {
        slug: "naruto-shippuden",
        title: "Naruto: Shippuden",
        kind: "TV",
        status: "Finished Airing",
        genres: &["Action", "Adventure", "Martial Arts"],
        episodes: 500,
        dubbed: 500,
        rating: 8.3,
        description: "Two and a half years later, Naruto returns to the Hidden Leaf Village.",
    },
    DemoTitle {
        slug: "frieren",
        title: "Frieren: Beyond Journey's End",
        kind: "TV",
        status: "Finished Airing",
        genres: &["Adventure", "Drama", "Fantasy"],
        episodes: 28,
        dubbed: 28,
        rating: 9.3,
        description: "An elf mage reflects on her travels long after the hero's party has disbanded.",
    },
    DemoTitle {
        slug: "one-piece",
        title: "One Piece",
        kind: "TV",
        status: "Currently Airing",
        genres: &["Action", "Adventure", "Comedy"],
        episodes: 1100,
        dubbed: 1080,
        rating: 8.7,
        description: "A rubber-bodied pirate sets sail to find the legendary treasure.",
    },
    DemoTitle {
        slug: "your-name",
        title: "Your Name.",
        kind: "Movie",
        status: "Finished Airing",
        genres: &["Drama", "Romance", "Supernatural"],
        episodes: 1,
        dubbed: 1,
        rating: 8.8,
        description: "Two strangers find themselves linked in a bizarre way.",
    },
];

/// Demo source returning canned data.
#[derive(Debug)]
pub struct DemoSource {
    tracker: FailureTracker,
}

impl Default for DemoSource {
    fn default() -> Self {
        Self::new(&SourceConfig::default())
    }
}

impl DemoSource {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            tracker: FailureTracker::from_config(DEMO_NAME, config),
        }
    }

    fn find(&self, id: &str) -> Option<&'static DemoTitle> {
        let native = ids::strip(DEMO_NAME, id);
        CATALOGUE.iter().find(|t| t.slug == native)
    }

    fn summary(&self, title: &DemoTitle) -> AnimeSummary {
        AnimeSummary {
            id: ids::namespaced(DEMO_NAME, title.slug),
            title: title.title.to_string(),
            image: Some(format!("https://img.anifold.test/{}.jpg", title.slug)),
            kind: Some(title.kind.to_string()),
            episodes_sub: Some(title.episodes),
            episodes_dub: Some(title.dubbed),
            source: None,
        }
    }

    fn page<T: Clone>(items: &[T], page: u32) -> (Vec<T>, bool) {
        let start = (page.max(1) as usize - 1) * PAGE_SIZE;
        let slice: Vec<T> = items.iter().skip(start).take(PAGE_SIZE).cloned().collect();
        let has_next = items.len() > start + PAGE_SIZE;
        (slice, has_next)
    }
}

#[async_trait]
impl Source for DemoSource {
    fn name(&self) -> &str {
        DEMO_NAME
    }

    fn base_url(&self) -> &str {
        DEMO_BASE_URL
    }

    fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    async fn health_check(&self, opts: &RequestOptions) -> SourceResult<bool> {
        opts.check()?;
        Ok(true)
    }

    async fn search(
        &self,
        query: &str,
        page: u32,
        filters: &SearchFilters,
        opts: &RequestOptions,
    ) -> SourceResult<SearchResult> {
        opts.check()?;
        let needle = query.trim().to_lowercase();
        let matches: Vec<AnimeSummary> = CATALOGUE
            .iter()
            .filter(|t| t.title.to_lowercase().contains(&needle))
            .filter(|t| {
                filters
                    .kind
                    .as_deref()
                    .is_none_or(|kind| t.kind.eq_ignore_ascii_case(kind))
            })
            .filter(|t| {
                filters
                    .genre
                    .as_deref()
                    .is_none_or(|genre| t.genres.iter().any(|g| g.eq_ignore_ascii_case(genre)))
            })
            .map(|t| self.summary(t))
            .collect();

        let total_pages = matches.len().div_ceil(PAGE_SIZE) as u32;
        let (results, has_next_page) = Self::page(&matches, page);
        Ok(SearchResult {
            results,
            current_page: page.max(1),
            has_next_page,
            total_pages: Some(total_pages),
            source: None,
        })
    }

    async fn get_anime(&self, id: &str, opts: &RequestOptions) -> SourceResult<Option<AnimeDetail>> {
        opts.check()?;
        Ok(self.find(id).map(|t| AnimeDetail {
            id: ids::namespaced(DEMO_NAME, t.slug),
            title: t.title.to_string(),
            description: Some(t.description.to_string()),
            image: Some(format!("https://img.anifold.test/{}.jpg", t.slug)),
            kind: Some(t.kind.to_string()),
            status: Some(t.status.to_string()),
            genres: t.genres.iter().map(|g| g.to_string()).collect(),
            total_episodes: Some(t.episodes),
            rating: Some(t.rating),
            source: None,
        }))
    }

    async fn get_episodes(&self, id: &str, opts: &RequestOptions) -> SourceResult<Vec<Episode>> {
        opts.check()?;
        let Some(title) = self.find(id) else {
            return Ok(Vec::new());
        };
        // Long-running shows are truncated to keep responses small.
        Ok((1..=title.episodes.min(24))
            .map(|number| Episode {
                id: ids::namespaced(DEMO_NAME, &format!("{}?ep={number}", title.slug)),
                number,
                title: Some(format!("Episode {number}")),
                is_filler: false,
            })
            .collect())
    }

    async fn get_trending(
        &self,
        page: u32,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<AnimeSummary>> {
        opts.check()?;
        let all: Vec<AnimeSummary> = CATALOGUE.iter().map(|t| self.summary(t)).collect();
        Ok(Self::page(&all, page).0)
    }

    async fn get_latest(&self, page: u32, opts: &RequestOptions) -> SourceResult<Vec<AnimeSummary>> {
        opts.check()?;
        let all: Vec<AnimeSummary> = CATALOGUE
            .iter()
            .filter(|t| t.status == "Currently Airing")
            .map(|t| self.summary(t))
            .collect();
        Ok(Self::page(&all, page).0)
    }

    async fn get_top_rated(
        &self,
        page: u32,
        limit: u32,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<RankedAnime>> {
        opts.check()?;
        let mut titles: Vec<&DemoTitle> = CATALOGUE.iter().collect();
        titles.sort_by(|a, b| b.rating.total_cmp(&a.rating));

        let limit = limit.max(1) as usize;
        let start = (page.max(1) as usize - 1) * limit;
        Ok(titles
            .into_iter()
            .enumerate()
            .skip(start)
            .take(limit)
            .map(|(i, t)| RankedAnime {
                rank: i as u32 + 1,
                anime: self.summary(t),
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
        opts.check()?;
        tracing::debug!(episode_id, server = ?server, category = category.as_str(), "Serving demo stream");

        let mut result = StreamingResult {
            sources: vec![VideoVariant {
                url: DEMO_STREAM_URL.to_string(),
                quality: "auto".to_string(),
                is_m3u8: true,
                is_dash: false,
            }],
            subtitles: vec![SubtitleTrack {
                url: "https://img.anifold.test/subs/en.vtt".to_string(),
                lang: "English".to_string(),
                default: true,
            }],
            intro: Some(TimeRange { start: 0, end: 90 }),
            outro: None,
            ..Default::default()
        };
        result.sort_variants();
        Ok(result)
    }

    async fn get_episode_servers(
        &self,
        _episode_id: &str,
        opts: &RequestOptions,
    ) -> SourceResult<Vec<EpisodeServer>> {
        opts.check()?;
        Ok(["hd-1", "hd-2"]
            .into_iter()
            .flat_map(|name| {
                [Category::Sub, Category::Dub].map(|category| EpisodeServer {
                    name: name.to_string(),
                    url: None,
                    category,
                })
            })
            .collect())
    }

    async fn get_by_genre(
        &self,
        genre: &str,
        page: u32,
        opts: &RequestOptions,
    ) -> SourceResult<SearchResult> {
        let filters = SearchFilters {
            genre: Some(genre.to_string()),
            ..Default::default()
        };
        self.search("", page, &filters, opts).await
    }

    async fn get_genres(&self, opts: &RequestOptions) -> SourceResult<Vec<Genre>> {
        opts.check()?;
        let mut names: Vec<&str> = CATALOGUE.iter().flat_map(|t| t.genres.iter().copied()).collect();
        names.sort_unstable();
        names.dedup();
        Ok(names
            .into_iter()
            .map(|name| Genre {
                id: name.to_lowercase().replace(' ', "-"),
                name: name.to_string(),
            })
            .collect())
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_namespaced() {
        let source = DemoSource::default();
        let page = source
            .search("NARUTO", 1, &SearchFilters::default(), &RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(page.results.len(), 2);
        assert!(page.results.iter().all(|r| r.id.starts_with("demo-")));
        assert!(!page.has_next_page);
    }

    #[tokio::test]
    async fn test_detail_and_episodes_accept_namespaced_ids() {
        let source = DemoSource::default();
        let opts = RequestOptions::default();

        let detail = source.get_anime("demo-frieren", &opts).await.unwrap().unwrap();
        assert_eq!(detail.total_episodes, Some(28));

        let episodes = source.get_episodes("demo-frieren", &opts).await.unwrap();
        assert_eq!(episodes.len(), 24);
        assert_eq!(episodes[0].id, "demo-frieren?ep=1");

        assert!(source.get_anime("demo-missing", &opts).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_top_rated_is_ranked() {
        let source = DemoSource::default();
        let ranked = source
            .get_top_rated(1, 3, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].anime.title, "Frieren: Beyond Journey's End");
    }

    #[tokio::test]
    async fn test_cancelled_options_short_circuit() {
        let source = DemoSource::default();
        let opts = RequestOptions::default();
        opts.cancel.cancel();

        let result = source.get_genres(&opts).await;
        assert_eq!(result, Err(crate::source::SourceError::Cancelled));
    }

    #[tokio::test]
    async fn test_genre_browsing() {
        let source = DemoSource::default();
        let opts = RequestOptions::default();
        let page = source.get_by_genre("romance", 1, &opts).await.unwrap();
        assert_eq!(page.results.len(), 1);

        let genres = source.get_genres(&opts).await.unwrap();
        assert!(genres.iter().any(|g| g.id == "martial-arts"));
    }
}
