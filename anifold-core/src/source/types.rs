//! Value objects exchanged between sources, the manager and the web layer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Audio/subtitle track family offered by an episode server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Original audio with subtitles
    #[default]
    Sub,
    /// Dubbed audio
    Dub,
    /// Original audio without subtitles
    Raw,
}

impl Category {
    /// Returns the lowercase wire name used in query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Sub => "sub",
            Category::Dub => "dub",
            Category::Raw => "raw",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sub" => Ok(Category::Sub),
            "dub" => Ok(Category::Dub),
            "raw" => Ok(Category::Raw),
            _ => Err(format!("Invalid category: {s}")),
        }
    }
}

/// Optional search filters forwarded to the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u16>,
}

impl SearchFilters {
    /// Returns true when no filter is set.
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.status.is_none() && self.genre.is_none() && self.year.is_none()
    }
}

/// Compact catalogue entry used by listings and search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeSummary {
    pub id: String,
    pub title: String,
    pub image: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub episodes_sub: Option<u32>,
    pub episodes_dub: Option<u32>,
    /// Name of the source that served this entry, stamped by the manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Full detail page for one title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimeDetail {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub total_episodes: Option<u32>,
    pub rating: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// One episode of a title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    pub number: u32,
    pub title: Option<String>,
    #[serde(default)]
    pub is_filler: bool,
}

/// Summary plus rank for top-rated listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedAnime {
    pub rank: u32,
    #[serde(flatten)]
    pub anime: AnimeSummary,
}

/// A page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub results: Vec<AnimeSummary>,
    pub current_page: u32,
    pub has_next_page: bool,
    pub total_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl SearchResult {
    /// Empty result for the given page, used when a source cannot answer.
    pub fn empty(page: u32) -> Self {
        Self {
            results: Vec::new(),
            current_page: page,
            has_next_page: false,
            total_pages: Some(0),
            source: None,
        }
    }

    /// Stamps the serving source name on the page and every entry.
    pub fn stamp_source(&mut self, source: &str) {
        self.source = Some(source.to_string());
        for item in &mut self.results {
            item.source = Some(source.to_string());
        }
    }
}

/// A genre available for browsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: String,
    pub name: String,
}

/// A playback server offered for one episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeServer {
    pub name: String,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub category: Category,
}

/// One playable rendition of an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoVariant {
    pub url: String,
    pub quality: String,
    #[serde(rename = "isM3U8")]
    pub is_m3u8: bool,
    #[serde(default)]
    pub is_dash: bool,
}

impl VideoVariant {
    /// Vertical resolution parsed from the quality label, if any.
    ///
    /// Recognizes `1080p`, `720`, `1920x1080`, `HD 720p`, `hd` and `fhd`.
    pub fn resolution(&self) -> Option<u32> {
        let label = self.quality.trim().to_lowercase();
        // `WxH` carries the height after the `x`.
        let height_part = match label.split_once('x') {
            Some((width, height)) if width.trim().chars().all(|c| c.is_ascii_digit()) => height,
            _ => label.as_str(),
        };
        // The first run of digits, so `720p60` is 720.
        let digits: String = height_part
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect();
        if let Ok(value) = digits.parse::<u32>() {
            return Some(value);
        }
        match label.as_str() {
            "fhd" => Some(1080),
            "hd" => Some(720),
            "sd" => Some(480),
            _ => None,
        }
    }

    /// Sort key: higher is better. Adaptive `auto`/`default` playlists rank
    /// above fixed renditions because they contain every tier.
    pub fn quality_rank(&self) -> u32 {
        match self.quality.to_lowercase().trim() {
            "auto" | "default" | "adaptive" | "multi" => u32::MAX,
            _ => self.resolution().unwrap_or(0),
        }
    }
}

/// Subtitle or thumbnail track attached to a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub url: String,
    pub lang: String,
    #[serde(default)]
    pub default: bool,
}

/// Intro/outro skip markers in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u32,
    pub end: u32,
}

/// Playable links for one episode on one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamingResult {
    pub sources: Vec<VideoVariant>,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
    /// Headers the upstream CDN requires, typically `Referer`.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub intro: Option<TimeRange>,
    pub outro: Option<TimeRange>,
}

impl StreamingResult {
    /// Orders variants best quality first. Stable for equal ranks.
    pub fn sort_variants(&mut self) {
        self.sources
            .sort_by(|a, b| b.quality_rank().cmp(&a.quality_rank()));
    }

    /// Returns true when at least one variant is present.
    pub fn is_playable(&self) -> bool {
        !self.sources.is_empty()
    }
}

/// Source state as reported by `/sources/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Online,
    Offline,
    Degraded,
}

/// Latest health snapshot for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub name: String,
    pub status: HealthState,
    pub latency: Option<u64>,
    pub last_check: chrono::DateTime<chrono::Utc>,
}

/// Registry introspection entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub name: String,
    pub base_url: String,
    pub available: bool,
    pub consecutive_failures: u32,
    pub is_primary: bool,
    pub is_preferred: bool,
    /// Position in the priority list, if listed.
    pub priority: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(quality: &str) -> VideoVariant {
        VideoVariant {
            url: format!("https://cdn.test/{quality}.m3u8"),
            quality: quality.to_string(),
            is_m3u8: true,
            is_dash: false,
        }
    }

    #[test]
    fn test_sort_variants_best_first() {
        let mut result = StreamingResult {
            sources: vec![variant("360p"), variant("1080p"), variant("auto"), variant("720p")],
            ..Default::default()
        };
        result.sort_variants();

        let order: Vec<&str> = result.sources.iter().map(|v| v.quality.as_str()).collect();
        assert_eq!(order, vec!["auto", "1080p", "720p", "360p"]);
    }

    #[test]
    fn test_resolution_labels() {
        assert_eq!(variant("1080p").resolution(), Some(1080));
        assert_eq!(variant("HD").resolution(), Some(720));
        assert_eq!(variant("fhd").resolution(), Some(1080));
        assert_eq!(variant("unknown").resolution(), None);
        assert_eq!(variant("1920x1080").resolution(), Some(1080));
        assert_eq!(variant("1280 x 720").resolution(), Some(720));
        assert_eq!(variant("720p60").resolution(), Some(720));
        assert_eq!(variant("HD 1080p").resolution(), Some(1080));
    }

    #[test]
    fn test_stamp_source_marks_every_entry() {
        let mut page = SearchResult {
            results: vec![AnimeSummary {
                id: "demo-naruto".to_string(),
                title: "Naruto".to_string(),
                image: None,
                kind: None,
                episodes_sub: None,
                episodes_dub: None,
                source: None,
            }],
            current_page: 1,
            has_next_page: false,
            total_pages: Some(1),
            source: None,
        };
        page.stamp_source("Demo");

        assert_eq!(page.source.as_deref(), Some("Demo"));
        assert_eq!(page.results[0].source.as_deref(), Some("Demo"));
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("DUB".parse::<Category>(), Ok(Category::Dub));
        assert!("both".parse::<Category>().is_err());
    }
}
