//! Response header policy of the proxy.

use axum::http::{HeaderMap, HeaderValue, header};

use anifold_core::config::ProxyConfig;

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

const SEGMENT_EXTENSIONS: &[&str] = &["ts", "m4s", "mp4", "m4v", "m4a", "aac", "webm", "mkv"];

/// Lowercased extension of the last path segment.
fn extension(path: &str) -> Option<String> {
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// HLS playlists are detected by content type or by a `.m3u8` path.
pub fn is_manifest(content_type: Option<&str>, path: &str) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("mpegurl"))
        || extension(path).as_deref() == Some("m3u8")
}

/// Content type guessed from the path when the upstream sent none.
pub fn infer_content_type(path: &str) -> String {
    match extension(path).as_deref() {
        Some("ts") => "video/mp2t".to_string(),
        Some("m3u8") => HLS_CONTENT_TYPE.to_string(),
        Some("m4s") => "video/iso.segment".to_string(),
        Some("vtt") => "text/vtt".to_string(),
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Long cache for immutable media, one hour for everything else.
pub fn cache_control(path: &str) -> &'static str {
    match extension(path) {
        Some(ext) if SEGMENT_EXTENSIONS.contains(&ext.as_str()) => "public, max-age=86400",
        _ => "public, max-age=3600",
    }
}

/// Permissive CORS headers attached to every proxy response.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Range, Content-Type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Length, Content-Range, Accept-Ranges"),
    );
}

/// Public URL of the proxy endpoint.
///
/// The configured public base wins. Otherwise the base is derived from the
/// request's `Host` and `X-Forwarded-Proto` headers.
pub fn proxy_base(config: &ProxyConfig, request: &HeaderMap) -> String {
    let origin = match &config.public_base_url {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => {
            let host = request
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("localhost");
            let scheme = request
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or("http");
            format!("{scheme}://{host}")
        }
    };

    let origin = match origin.strip_prefix("http://") {
        Some(rest) if config.force_https => format!("https://{rest}"),
        _ => origin,
    };
    format!("{origin}/api/proxy")
}
