//! HLS manifest rewriting.
//!
//! Every URI a playlist references (segments, variant playlists, keys, maps,
//! media renditions) is resolved against the manifest URL and re-routed
//! through the proxy, so the player never talks to the CDN directly.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

static URI_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"URI="([^"]*)""#).expect("URI attribute pattern is valid"));

/// Wraps `target` into a proxy link.
pub fn proxy_url(proxy_base: &str, target: &str) -> String {
    format!("{proxy_base}?url={}", urlencoding::encode(target))
}

fn is_proxied(reference: &str, proxy_base: &str) -> bool {
    reference
        .strip_prefix(proxy_base)
        .is_some_and(|rest| rest.starts_with("?url="))
}

fn wrap(reference: &str, manifest_url: &Url, proxy_base: &str) -> Option<String> {
    if is_proxied(reference, proxy_base) {
        return None;
    }
    let resolved = manifest_url.join(reference).ok()?;
    Some(proxy_url(proxy_base, resolved.as_str()))
}

/// Rewrites `body` so that every referenced URI goes through `proxy_base`.
///
/// Line count, line endings and tag order are preserved. Lines that are
/// already proxied or cannot be resolved are left untouched.
pub fn rewrite_manifest(body: &str, manifest_url: &Url, proxy_base: &str) -> String {
    body.split('\n')
        .map(|raw| {
            let (line, cr) = match raw.strip_suffix('\r') {
                Some(line) => (line, "\r"),
                None => (raw, ""),
            };
            let trimmed = line.trim();

            let rewritten = if trimmed.is_empty() {
                None
            } else if trimmed.starts_with('#') {
                if line.contains("URI=\"") {
                    let replaced = URI_ATTRIBUTE.replace_all(line, |caps: &Captures<'_>| {
                        match wrap(&caps[1], manifest_url, proxy_base) {
                            Some(wrapped) => format!("URI=\"{wrapped}\""),
                            None => caps[0].to_string(),
                        }
                    });
                    Some(replaced.into_owned())
                } else {
                    None
                }
            } else {
                wrap(trimmed, manifest_url, proxy_base)
            };

            match rewritten {
                Some(line) => format!("{line}{cr}"),
                None => raw.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const BASE: &str = "http://localhost:3000/api/proxy";

    fn manifest_url() -> Url {
        Url::parse("https://cdn.test/hls/ep1/master.m3u8").unwrap()
    }

    fn decode(line: &str) -> String {
        let encoded = line.strip_prefix(&format!("{BASE}?url=")).unwrap();
        urlencoding::decode(encoded).unwrap().into_owned()
    }

    #[test]
    fn test_rewrites_variant_playlist() {
        let body = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=1280x720\n720/index.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=400000\nhttps://other.test/480.m3u8\n";
        let out = rewrite_manifest(body, &manifest_url(), BASE);
        let lines: Vec<&str> = out.split('\n').collect();

        assert_eq!(lines.len(), body.split('\n').count());
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(decode(lines[2]), "https://cdn.test/hls/ep1/720/index.m3u8");
        assert_eq!(decode(lines[4]), "https://other.test/480.m3u8");
        assert_eq!(lines[5], "");
    }

    #[test]
    fn test_rewrites_uri_attributes() {
        let body = "#EXT-X-KEY:METHOD=AES-128,URI=\"../keys/k1.key\",IV=0x1\n#EXT-X-MAP:URI=\"init.mp4\"\nseg-1.ts";
        let out = rewrite_manifest(body, &manifest_url(), BASE);
        let lines: Vec<&str> = out.split('\n').collect();

        let encoded_key = urlencoding::encode("https://cdn.test/hls/keys/k1.key").into_owned();
        assert_eq!(
            lines[0],
            format!("#EXT-X-KEY:METHOD=AES-128,URI=\"{BASE}?url={encoded_key}\",IV=0x1")
        );
        assert!(lines[1].starts_with("#EXT-X-MAP:URI=\"http://localhost:3000/api/proxy?url="));
        assert_eq!(decode(lines[2]), "https://cdn.test/hls/ep1/seg-1.ts");
    }

    #[test]
    fn test_preserves_crlf_and_proxied_lines() {
        let proxied = proxy_url(BASE, "https://cdn.test/a.ts");
        let body = format!("#EXTM3U\r\n#EXTINF:4.0,\r\n{proxied}\r\n");
        let out = rewrite_manifest(&body, &manifest_url(), BASE);
        assert_eq!(out, body);
    }

    #[test]
    fn test_foreign_proxy_links_are_still_wrapped() {
        let foreign = "https://mirror.test/api/proxy?url=https%3A%2F%2Fcdn.test%2Fa.ts";
        let body = format!("#EXTINF:4.0,\n{foreign}\n#EXT-X-MAP:URI=\"{foreign}\"");
        let out = rewrite_manifest(&body, &manifest_url(), BASE);
        let lines: Vec<&str> = out.split('\n').collect();

        assert_eq!(decode(lines[1]), foreign);
        assert_eq!(
            lines[2],
            format!("#EXT-X-MAP:URI=\"{}\"", proxy_url(BASE, foreign))
        );
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let body = "#EXTM3U\n#EXTINF:4.0,\nseg-1.ts\n#EXT-X-ENDLIST";
        let once = rewrite_manifest(body, &manifest_url(), BASE);
        assert_eq!(rewrite_manifest(&once, &manifest_url(), BASE), once);
    }

    fn line_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("#EXTINF:4.000,".to_string()),
            Just("#EXT-X-DISCONTINUITY".to_string()),
            Just(String::new()),
            "[a-z0-9]{1,8}\\.ts",
            "[a-z0-9]{1,8}".prop_map(|s| format!("https://edge.test/v/{s}.ts")),
            "[a-z0-9]{1,8}".prop_map(|s| format!("#EXT-X-KEY:METHOD=AES-128,URI=\"{s}.key\"")),
        ]
    }

    proptest! {
        #[test]
        fn prop_structure_is_preserved(lines in prop::collection::vec(line_strategy(), 0..40)) {
            let body = lines.join("\n");
            let out = rewrite_manifest(&body, &manifest_url(), BASE);
            let out_lines: Vec<&str> = out.split('\n').collect();

            prop_assert_eq!(out_lines.len(), body.split('\n').count());
            for (original, rewritten) in lines.iter().zip(&out_lines) {
                if original.is_empty() || (original.starts_with('#') && !original.contains("URI=")) {
                    prop_assert_eq!(original.as_str(), *rewritten);
                } else if original.starts_with('#') {
                    prop_assert!(rewritten.starts_with("#EXT-X-KEY:METHOD=AES-128,URI=\""));
                    let expected_uri = format!("URI=\"{BASE}?url=");
                    prop_assert!(rewritten.contains(&expected_uri));
                } else {
                    let resolved = manifest_url().join(original).unwrap();
                    prop_assert_eq!(decode(rewritten), resolved.to_string());
                }
            }

            let twice = rewrite_manifest(&out, &manifest_url(), BASE);
            prop_assert_eq!(twice, out);
        }
    }
}
