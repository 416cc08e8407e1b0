//! Referer and Origin selection per CDN.
//!
//! Most anime CDNs reject hotlinked requests unless the Referer names the
//! embedding player's site. Rules are matched in order against the hostname;
//! the first substring hit wins.

const CDN_RULES: &[(&str, &str)] = &[
    ("megacloud", "https://megacloud.blog/"),
    ("rapid-cloud", "https://rapid-cloud.co/"),
    ("rabbitstream", "https://rabbitstream.net/"),
    ("vidcloud", "https://megacloud.blog/"),
    ("netmagcdn", "https://megacloud.blog/"),
    ("kwik", "https://kwik.cx/"),
    ("owocdn", "https://kwik.cx/"),
    ("uwucdn", "https://kwik.cx/"),
    ("gogocdn", "https://gogoanime3.co/"),
    ("goone", "https://gogoanime3.co/"),
    ("vidplay", "https://vidplay.online/"),
    ("mcloud", "https://mcloud.bz/"),
    ("mp4upload", "https://www.mp4upload.com/"),
    ("streamtape", "https://streamtape.com/"),
];

/// Referer and Origin headers to send upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefererPair {
    pub referer: String,
    pub origin: String,
}

/// Picks the Referer for `host`, falling back to `default_referer`.
pub fn for_host(host: &str, default_referer: &str) -> RefererPair {
    let host = host.to_ascii_lowercase();
    let referer = CDN_RULES
        .iter()
        .find(|(needle, _)| host.contains(needle))
        .map_or(default_referer, |(_, referer)| referer);

    RefererPair {
        referer: referer.to_string(),
        origin: referer.trim_end_matches('/').to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_rule_wins() {
        let pair = for_host("eu-12.kwik-owocdn.top", "https://fallback.test/");
        assert_eq!(pair.referer, "https://kwik.cx/");
        assert_eq!(pair.origin, "https://kwik.cx");
    }

    #[test]
    fn test_unknown_host_uses_default() {
        let pair = for_host("cdn.unknown.test", "https://megacloud.blog/");
        assert_eq!(pair.referer, "https://megacloud.blog/");
        assert_eq!(pair.origin, "https://megacloud.blog");
    }
}
