//! TTL result cache with per-operation expiry classes.
//!
//! Entries are evicted lazily on read and by an optional background sweeper.
//! Expiry uses `tokio::time::Instant` so paused-clock tests observe it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::source::{AnimeDetail, Episode, EpisodeServer, SearchResult, StreamingResult};

/// Expiry classes, ordered by how quickly the underlying data changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlClass {
    /// Search result pages
    Search,
    /// Anime detail pages
    Detail,
    /// Episode lists
    Episodes,
    /// Episode server lists
    Servers,
    /// Signed stream links
    StreamLinks,
}

impl TtlClass {
    /// Time-to-live for this class under the given configuration.
    pub fn ttl(self, config: &CacheConfig) -> Duration {
        match self {
            TtlClass::Search => config.search_ttl,
            TtlClass::Detail => config.detail_ttl,
            TtlClass::Episodes => config.episodes_ttl,
            TtlClass::Servers => config.servers_ttl,
            TtlClass::StreamLinks => config.stream_links_ttl,
        }
    }
}

/// Cached value with its expiry instant.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Returns true when the entry must no longer be served at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheInner<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Key/value store whose entries expire after a per-entry TTL.
///
/// Cloning shares the underlying map.
pub struct TtlCache<V> {
    inner: Arc<CacheInner<V>>,
    config: CacheConfig,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: self.config.clone(),
        }
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("entries", &self.inner.entries.lock().len())
            .finish()
    }
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    /// Creates an empty cache using `config` for class TTLs.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
            config,
        }
    }

    /// Returns the value for `key` if it has not expired. Expired entries
    /// are evicted.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();

        match entries.get(key) {
            Some(entry) if !entry.is_expired_at(now) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.inner.evictions.fetch_add(1, Ordering::Relaxed);
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `value` under `key` for `ttl`.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            data: value,
            expires_at: Instant::now() + ttl,
        };
        self.inner.entries.lock().insert(key.into(), entry);
    }

    /// Stores `value` under `key` using the TTL of `class`.
    pub fn set_class(&self, key: impl Into<String>, value: V, class: TtlClass) {
        let ttl = class.ttl(&self.config);
        self.set(key, value, ttl);
    }

    /// Removes all expired entries and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - entries.len();
        self.inner
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Returns true when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }

    /// Starts a background task sweeping expired entries every `interval`
    /// until `cancel` fires.
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            tracing::debug!("Swept {} expired cache entries", removed);
                        }
                    }
                }
            }
        })
    }
}

/// One typed cache per TTL class, owned by a concrete source.
#[derive(Debug, Clone)]
pub struct SourceCache {
    pub search: TtlCache<SearchResult>,
    pub detail: TtlCache<Option<AnimeDetail>>,
    pub episodes: TtlCache<Vec<Episode>>,
    pub servers: TtlCache<Vec<EpisodeServer>>,
    pub streams: TtlCache<StreamingResult>,
}

impl SourceCache {
    /// Creates empty caches sharing `config`.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            search: TtlCache::new(config.clone()),
            detail: TtlCache::new(config.clone()),
            episodes: TtlCache::new(config.clone()),
            servers: TtlCache::new(config.clone()),
            streams: TtlCache::new(config),
        }
    }

    /// Sweeps every class and returns the total number of dropped entries.
    pub fn sweep(&self) -> usize {
        self.search.sweep()
            + self.detail.sweep()
            + self.episodes.sweep()
            + self.servers.sweep()
            + self.streams.sweep()
    }

    /// Starts one background sweeper covering every class.
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let caches = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = caches.sweep();
                        if removed > 0 {
                            tracing::debug!("Swept {} expired source cache entries", removed);
                        }
                    }
                }
            }
        })
    }
}

/// Builds a cache key from an operation name and its arguments.
pub fn cache_key(operation: &str, parts: &[&str]) -> String {
    let mut key = String::from(operation);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}
