//! Centralized configuration for Anifold.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

use crate::failure::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_WINDOW};

/// Central configuration for all Anifold components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct AnifoldConfig {
    pub sources: SourceConfig,
    pub cache: CacheConfig,
    pub throttle: ThrottleConfig,
    pub proxy: ProxyConfig,
    pub verifier: VerifierConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// A JSON API scraper endpoint registered at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRegistration {
    pub name: String,
    pub base_url: String,
}

/// Source registry, selection and failure tracking.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Consecutive counted failures before a source goes offline
    pub max_consecutive_failures: u32,
    /// Time an offline source waits before automatic recovery
    pub recovery_window: Duration,
    /// Default per-call upstream timeout
    pub request_timeout: Duration,
    /// Timeout applied to each health probe
    pub health_check_timeout: Duration,
    /// Interval of the background health monitor
    pub health_check_interval: Duration,
    /// User agent for source API requests
    pub user_agent: &'static str,
    /// JSON API sources to register
    pub registrations: Vec<SourceRegistration>,
    /// Source of last resort, defaults to the first registered source
    pub primary_source: Option<String>,
    /// Priority order for generic selection
    pub source_order: Vec<String>,
    /// Playback servers tried in order by the watch fallback
    pub default_servers: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: DEFAULT_FAILURE_THRESHOLD,
            recovery_window: DEFAULT_RECOVERY_WINDOW,
            request_timeout: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(300), // 5 minutes
            user_agent: "anifold/0.1.0",
            registrations: Vec::new(),
            primary_source: None,
            source_order: Vec::new(),
            default_servers: vec!["hd-2".to_string(), "hd-1".to_string(), "hd-3".to_string()],
        }
    }
}

/// Result cache expiry classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub search_ttl: Duration,
    pub detail_ttl: Duration,
    pub episodes_ttl: Duration,
    pub servers_ttl: Duration,
    /// Stream links are token-signed but stay valid for hours
    pub stream_links_ttl: Duration,
    /// Interval of the background sweeper
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl: Duration::from_secs(180),        // 3 minutes
            detail_ttl: Duration::from_secs(900),        // 15 minutes
            episodes_ttl: Duration::from_secs(600),      // 10 minutes
            servers_ttl: Duration::from_secs(3600),      // 1 hour
            stream_links_ttl: Duration::from_secs(7200), // 2 hours
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Per-source admission throttle. Off unless enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub enabled: bool,
    /// Maximum simultaneous outbound requests per source
    pub max_concurrent: usize,
    /// Minimum spacing between two dispatches
    pub min_delay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent: 2,
            min_delay: Duration::from_millis(500),
        }
    }
}

/// Player and CDN hosts of retired streaming sites. Their DNS records
/// linger or are parked, so fetches hang instead of failing fast.
pub const DEFAULT_DEAD_DOMAINS: &[&str] = &[
    "vidstreaming.io",
    "gogo-stream.com",
    "gogo-play.net",
    "streamani.net",
    "goload.pro",
    "gogoplay.io",
    "gogoplay1.com",
];

/// Streaming proxy behaviour.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Public base URL of this deployment, used for self-referencing proxy links
    pub public_base_url: Option<String>,
    /// Rewrite the proxy base to https to avoid mixed-content manifests
    pub force_https: bool,
    /// Hosts that are known dead; subdomains match too
    pub dead_domains: Vec<String>,
    /// Resolve the host before fetching
    pub dns_probe: bool,
    /// Upstream fetch timeout
    pub request_timeout: Duration,
    /// Upper bound for buffered manifests
    pub max_manifest_bytes: usize,
    /// Browser user agent sent upstream
    pub user_agent: &'static str,
    /// Referer used when no CDN rule matches
    pub default_referer: &'static str,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            public_base_url: None,
            force_https: false,
            dead_domains: DEFAULT_DEAD_DOMAINS.iter().map(|d| d.to_string()).collect(),
            dns_probe: true,
            request_timeout: Duration::from_secs(30),
            max_manifest_bytes: 5 * 1024 * 1024, // 5 MiB
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
            default_referer: "https://megacloud.blog/",
        }
    }
}

/// End-to-end source verification.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Well-known title every source should be able to find
    pub test_title: String,
    /// Timeout of each stage attempt
    pub stage_timeout: Duration,
    pub attempts: u32,
    pub backoff: Duration,
    /// How long the web layer serves a cached report
    pub report_ttl: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            test_title: "naruto".to_string(),
            stage_timeout: Duration::from_secs(15),
            attempts: 3,
            backoff: Duration::from_secs(1),
            report_ttl: Duration::from_secs(300),
        }
    }
}

/// Where the per-run log file goes and how much it captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub logs_dir: PathBuf,
    /// `EnvFilter` directives for the file log
    pub file_directives: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            file_directives: "debug,anifold_core=trace,anifold_web=trace,hyper_util=info"
                .to_string(),
        }
    }
}

/// HTTP server binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// Address string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AnifoldConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup on top of the defaults.
    ///
    /// Unparseable values are ignored and leave the default in place.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Source configuration overrides
        if let Some(threshold) = parse_var::<u32, _>(&lookup, "ANIFOLD_FAILURE_THRESHOLD") {
            config.sources.max_consecutive_failures = threshold;
        }

        if let Some(seconds) = parse_var::<u64, _>(&lookup, "ANIFOLD_RECOVERY_SECS") {
            config.sources.recovery_window = Duration::from_secs(seconds);
        }

        if let Some(seconds) = parse_var::<u64, _>(&lookup, "ANIFOLD_REQUEST_TIMEOUT_SECS") {
            config.sources.request_timeout = Duration::from_secs(seconds);
        }

        if let Some(sources) = lookup("ANIFOLD_SOURCES") {
            config.sources.registrations = parse_registrations(&sources);
        }

        if let Some(primary) = lookup("ANIFOLD_PRIMARY_SOURCE") {
            let primary = primary.trim();
            if !primary.is_empty() {
                config.sources.primary_source = Some(primary.to_string());
            }
        }

        if let Some(order) = lookup("ANIFOLD_SOURCE_ORDER") {
            config.sources.source_order = split_list(&order);
        }

        // Throttle overrides
        if let Some(enabled) = parse_var::<bool, _>(&lookup, "ANIFOLD_THROTTLE") {
            config.throttle.enabled = enabled;
        }

        // Proxy overrides
        if let Some(url) = lookup("ANIFOLD_PUBLIC_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                config.proxy.public_base_url = Some(url.to_string());
            }
        }

        if let Some(force) = parse_var::<bool, _>(&lookup, "ANIFOLD_FORCE_HTTPS") {
            config.proxy.force_https = force;
        }

        if let Some(domains) = lookup("ANIFOLD_DEAD_DOMAINS") {
            config
                .proxy
                .dead_domains
                .extend(split_list(&domains).into_iter().map(|d| d.to_lowercase()));
        }

        if let Some(probe) = parse_var::<bool, _>(&lookup, "ANIFOLD_DNS_PROBE") {
            config.proxy.dns_probe = probe;
        }

        // Server overrides
        if let Some(port) = parse_var::<u16, _>(&lookup, "ANIFOLD_PORT") {
            config.server.port = port;
        }

        if let Some(host) = lookup("ANIFOLD_HOST") {
            if !host.trim().is_empty() {
                config.server.host = host.trim().to_string();
            }
        }

        // Logging overrides
        if let Some(dir) = lookup("ANIFOLD_LOGS_DIR") {
            if !dir.trim().is_empty() {
                config.logging.logs_dir = PathBuf::from(dir.trim());
            }
        }

        if let Some(directives) = lookup("ANIFOLD_LOG_FILE_FILTER") {
            if !directives.trim().is_empty() {
                config.logging.file_directives = directives.trim().to_string();
            }
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Short windows, no DNS probing and a throttle that is enabled but
    /// permissive.
    pub fn for_testing() -> Self {
        Self {
            sources: SourceConfig {
                max_consecutive_failures: 3,
                recovery_window: Duration::from_secs(2),
                request_timeout: Duration::from_secs(2),
                health_check_timeout: Duration::from_secs(1),
                health_check_interval: Duration::from_secs(5),
                ..Default::default()
            },
            throttle: ThrottleConfig {
                enabled: true,
                max_concurrent: 4,
                min_delay: Duration::ZERO,
            },
            proxy: ProxyConfig {
                dead_domains: vec!["dead-cdn.example".to_string()],
                dns_probe: false,
                request_timeout: Duration::from_secs(5),
                ..Default::default()
            },
            verifier: VerifierConfig {
                stage_timeout: Duration::from_secs(2),
                attempts: 2,
                backoff: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `name=url,name=url`. Entries without `=` are skipped.
fn parse_registrations(raw: &str) -> Vec<SourceRegistration> {
    split_list(raw)
        .into_iter()
        .filter_map(|entry| {
            let (name, url) = entry.split_once('=')?;
            let (name, url) = (name.trim(), url.trim().trim_end_matches('/'));
            if name.is_empty() || url.is_empty() {
                return None;
            }
            Some(SourceRegistration {
                name: name.to_string(),
                base_url: url.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_values() {
        let config = AnifoldConfig::default();

        assert_eq!(config.sources.max_consecutive_failures, 5);
        assert_eq!(config.sources.recovery_window, Duration::from_secs(30));
        assert_eq!(config.sources.health_check_timeout, Duration::from_secs(5));
        assert_eq!(config.sources.default_servers, vec!["hd-2", "hd-1", "hd-3"]);
        assert_eq!(config.cache.search_ttl, Duration::from_secs(180));
        assert_eq!(config.cache.stream_links_ttl, Duration::from_secs(7200));
        assert!(!config.throttle.enabled);
        assert_eq!(config.verifier.test_title, "naruto");
        assert_eq!(config.verifier.attempts, 3);
        assert_eq!(config.server.bind_address(), "127.0.0.1:3000");
        assert_eq!(config.logging.logs_dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_default_deny_list_ships_retired_hosts() {
        let proxy = ProxyConfig::default();
        assert_eq!(proxy.dead_domains.len(), DEFAULT_DEAD_DOMAINS.len());
        assert!(proxy.dead_domains.iter().any(|d| d == "vidstreaming.io"));
        assert!(
            proxy
                .dead_domains
                .iter()
                .all(|d| d == &d.to_lowercase() && !d.contains('/'))
        );
    }

    #[test]
    fn test_config_presets() {
        let testing_config = AnifoldConfig::for_testing();
        assert!(testing_config.throttle.enabled);
        assert!(!testing_config.proxy.dns_probe);
        assert!(testing_config.sources.recovery_window < Duration::from_secs(30));
        assert!(
            testing_config
                .proxy
                .dead_domains
                .contains(&"dead-cdn.example".to_string())
        );
    }

    #[test]
    fn test_env_override() {
        let config = AnifoldConfig::from_lookup(lookup_from(&[
            ("ANIFOLD_FAILURE_THRESHOLD", "7"),
            ("ANIFOLD_RECOVERY_SECS", "60"),
            ("ANIFOLD_PUBLIC_URL", "https://anifold.example/"),
            ("ANIFOLD_FORCE_HTTPS", "true"),
            ("ANIFOLD_DEAD_DOMAINS", "Dead.Example, gone.test"),
            ("ANIFOLD_PORT", "8080"),
            ("ANIFOLD_SOURCES", "HiAnime=https://api.one.test/, Kai=https://api.two.test"),
            ("ANIFOLD_SOURCE_ORDER", "Kai,HiAnime"),
            ("ANIFOLD_PRIMARY_SOURCE", "HiAnime"),
            ("ANIFOLD_LOGS_DIR", "/var/log/anifold"),
        ]));

        assert_eq!(config.sources.max_consecutive_failures, 7);
        assert_eq!(config.sources.recovery_window, Duration::from_secs(60));
        assert_eq!(
            config.proxy.public_base_url.as_deref(),
            Some("https://anifold.example")
        );
        assert!(config.proxy.force_https);
        assert_eq!(
            &config.proxy.dead_domains[DEFAULT_DEAD_DOMAINS.len()..],
            ["dead.example", "gone.test"]
        );
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.sources.registrations,
            vec![
                SourceRegistration {
                    name: "HiAnime".to_string(),
                    base_url: "https://api.one.test".to_string(),
                },
                SourceRegistration {
                    name: "Kai".to_string(),
                    base_url: "https://api.two.test".to_string(),
                },
            ]
        );
        assert_eq!(config.sources.source_order, vec!["Kai", "HiAnime"]);
        assert_eq!(config.sources.primary_source.as_deref(), Some("HiAnime"));
        assert_eq!(config.logging.logs_dir, PathBuf::from("/var/log/anifold"));
    }

    #[test]
    fn test_invalid_override_keeps_default() {
        let config = AnifoldConfig::from_lookup(lookup_from(&[
            ("ANIFOLD_FAILURE_THRESHOLD", "many"),
            ("ANIFOLD_SOURCES", "broken,=nourl,Ok=https://ok.test"),
        ]));

        assert_eq!(config.sources.max_consecutive_failures, 5);
        assert_eq!(config.sources.registrations.len(), 1);
        assert_eq!(config.sources.registrations[0].name, "Ok");
    }
}
