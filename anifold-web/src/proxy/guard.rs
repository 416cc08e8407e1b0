//! Target validation before any outbound request is made.

use std::io;

use url::Url;

use crate::error::ProxyError;

/// Parses the requested URL and requires an http(s) scheme with a host.
///
/// # Errors
///
/// - `ProxyError::Validation` - Missing, malformed or non-http URL
pub fn validate_target(raw: Option<&str>) -> Result<Url, ProxyError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or_else(|| {
        ProxyError::Validation {
            message: "url parameter is required".to_string(),
        }
    })?;

    let url = Url::parse(raw).map_err(|e| ProxyError::Validation {
        message: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProxyError::Validation {
                message: format!("unsupported scheme {other}"),
            });
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProxyError::Validation {
            message: "url has no host".to_string(),
        });
    }
    Ok(url)
}

/// Exact host or any subdomain of a listed domain.
pub fn is_dead_domain(host: &str, dead_domains: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    dead_domains.iter().any(|domain| {
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        host == domain
            || host
                .strip_suffix(domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Resolves `host` and fails only when the name definitely does not exist.
///
/// IP literals are not resolved. Resolver failures other than
/// "no such name" or "no data" count as reachable.
///
/// # Errors
///
/// - `ProxyError::Dns` - NXDOMAIN or an empty answer
pub async fn probe_dns(host: &str, port: u16) -> Result<(), ProxyError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<std::net::IpAddr>().is_ok() {
        return Ok(());
    }

    match tokio::net::lookup_host((bare, port)).await {
        Ok(mut addrs) => {
            if addrs.next().is_some() {
                Ok(())
            } else {
                Err(ProxyError::Dns {
                    host: host.to_string(),
                })
            }
        }
        Err(error) if is_missing_name(&error) => {
            tracing::debug!(host, error = %error, "DNS lookup found no such host");
            Err(ProxyError::Dns {
                host: host.to_string(),
            })
        }
        Err(error) => {
            tracing::debug!(host, error = %error, "DNS lookup failed, treating host as reachable");
            Ok(())
        }
    }
}

fn is_missing_name(error: &io::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    [
        "name or service not known",
        "nodename nor servname",
        "no address associated",
        "no such host",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(validate_target(None).is_err());
        assert!(validate_target(Some("  ")).is_err());
        assert!(validate_target(Some("ftp://cdn.test/a.ts")).is_err());
        assert!(validate_target(Some("not a url")).is_err());
        let url = validate_target(Some("https://cdn.test/a/master.m3u8")).unwrap();
        assert_eq!(url.host_str(), Some("cdn.test"));
    }

    #[test]
    fn test_dead_domain_matches_subdomains_only() {
        let dead = vec!["dead-cdn.example".to_string()];
        assert!(is_dead_domain("dead-cdn.example", &dead));
        assert!(is_dead_domain("edge1.DEAD-CDN.example", &dead));
        assert!(!is_dead_domain("notdead-cdn.example", &dead));
        assert!(!is_dead_domain("cdn.example", &dead));
    }

    #[tokio::test]
    async fn test_ip_literals_skip_resolution() {
        assert!(probe_dns("127.0.0.1", 80).await.is_ok());
        assert!(probe_dns("[::1]", 80).await.is_ok());
    }

    #[test]
    fn test_missing_name_classification() {
        let nx = io::Error::other("failed to lookup address information: Name or service not known");
        assert!(is_missing_name(&nx));
        let refused = io::Error::other("Temporary failure in name resolution");
        assert!(!is_missing_name(&refused));
    }
}
