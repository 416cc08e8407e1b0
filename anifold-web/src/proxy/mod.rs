//! Streaming proxy for CDN-hosted media.
//!
//! Fetches a raw upstream media URL with the Referer the CDN expects, forwards
//! Range requests, rewrites HLS manifests so every nested URI is proxied as
//! well, and pipes binary bodies through without buffering.

pub mod guard;
pub mod headers;
pub mod manifest;
pub mod referer;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use url::Url;

use anifold_core::config::ProxyConfig;

use crate::error::ProxyError;
use crate::server::AppState;

/// Upstream response headers copied onto streamed responses.
const FORWARDED_HEADERS: [header::HeaderName; 5] = [
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::ETAG,
    header::LAST_MODIFIED,
];

/// Shared proxy state: one pooled HTTP client plus the proxy policy.
#[derive(Debug, Clone)]
pub struct StreamProxy {
    client: reqwest::Client,
    config: Arc<ProxyConfig>,
}

impl StreamProxy {
    /// Builds the pooled client. No total request timeout is set on the
    /// client because media bodies can stream for minutes; the configured
    /// timeout bounds the wait for response headers instead.
    ///
    /// # Errors
    ///
    /// - `reqwest::Error` - The TLS backend could not be initialised
    pub fn new(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(20)
            .tcp_nodelay(true)
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Public proxy endpoint URL for links handed to clients.
    pub fn proxy_base(&self, request: &HeaderMap) -> String {
        headers::proxy_base(&self.config, request)
    }

    /// Validates `raw_url`, fetches it and builds the client response.
    ///
    /// # Errors
    ///
    /// - `ProxyError::Validation` - Missing or non-http URL
    /// - `ProxyError::DeadDomain` / `ProxyError::Dns` - Host rejected before fetching
    /// - `ProxyError::Timeout` / `ProxyError::Connection` - Transport failure
    /// - `ProxyError::Blocked` / `ProxyError::Upstream` - Upstream status >= 400
    /// - `ProxyError::Manifest` - Playlist too large or not UTF-8
    pub async fn fetch(
        &self,
        raw_url: Option<&str>,
        request: &HeaderMap,
    ) -> Result<Response, ProxyError> {
        let target = guard::validate_target(raw_url)?;
        let host = target.host_str().unwrap_or_default().to_string();

        if guard::is_dead_domain(&host, &self.config.dead_domains) {
            tracing::info!(host = %host, "Refusing to proxy dead domain");
            return Err(ProxyError::DeadDomain { host });
        }
        if self.config.dns_probe {
            let port = target.port_or_known_default().unwrap_or(443);
            guard::probe_dns(&host, port).await?;
        }

        let referer = referer::for_host(&host, self.config.default_referer);
        let mut upstream_request = self
            .client
            .get(target.clone())
            .header(header::USER_AGENT, self.config.user_agent)
            .header(header::REFERER, &referer.referer)
            .header(header::ORIGIN, &referer.origin)
            .header(header::ACCEPT, "*/*")
            .header(header::CONNECTION, "keep-alive");
        if let Some(range) = request.get(header::RANGE) {
            upstream_request = upstream_request.header(header::RANGE, range.clone());
        }

        tracing::debug!(url = %target, referer = %referer.referer, "Proxying upstream request");
        let timeout = self.config.request_timeout;
        let upstream = match tokio::time::timeout(timeout, upstream_request.send()).await {
            Err(_) => {
                return Err(ProxyError::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
            Ok(Err(error)) if error.is_timeout() => {
                return Err(ProxyError::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
            Ok(Err(error)) => {
                tracing::warn!(url = %target, error = %error, "Upstream connection failed");
                return Err(ProxyError::Connection {
                    reason: error.to_string(),
                });
            }
            Ok(Ok(response)) => response,
        };

        let status = upstream.status();
        if status.as_u16() >= 400 {
            tracing::warn!(url = %target, status = status.as_u16(), "Upstream rejected request");
            return Err(ProxyError::from_status(status.as_u16()));
        }

        let content_type = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if headers::is_manifest(content_type.as_deref(), target.path()) {
            self.manifest_response(upstream, &target, request).await
        } else {
            Ok(self.stream_response(upstream, &target, content_type))
        }
    }

    async fn manifest_response(
        &self,
        upstream: reqwest::Response,
        target: &Url,
        request: &HeaderMap,
    ) -> Result<Response, ProxyError> {
        let limit = self.config.max_manifest_bytes;
        if upstream
            .content_length()
            .is_some_and(|len| len as usize > limit)
        {
            return Err(ProxyError::Manifest {
                reason: format!("manifest exceeds {limit} bytes"),
            });
        }

        let mut body = Vec::new();
        let mut chunks = upstream.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| ProxyError::Manifest {
                reason: e.to_string(),
            })?;
            if body.len() + chunk.len() > limit {
                return Err(ProxyError::Manifest {
                    reason: format!("manifest exceeds {limit} bytes"),
                });
            }
            body.extend_from_slice(&chunk);
        }

        let text = String::from_utf8(body).map_err(|_| ProxyError::Manifest {
            reason: "manifest is not valid UTF-8".to_string(),
        })?;
        let rewritten = manifest::rewrite_manifest(&text, target, &self.proxy_base(request));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(headers::HLS_CONTENT_TYPE),
        );
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=5"),
        );
        headers::apply_cors(&mut headers);

        Ok((StatusCode::OK, headers, rewritten).into_response())
    }

    fn stream_response(
        &self,
        upstream: reqwest::Response,
        target: &Url,
        content_type: Option<String>,
    ) -> Response {
        let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::OK);

        let mut headers = HeaderMap::new();
        for name in FORWARDED_HEADERS {
            if let Some(value) = upstream.headers().get(&name) {
                headers.insert(name, value.clone());
            }
        }
        let content_type =
            content_type.unwrap_or_else(|| headers::infer_content_type(target.path()));
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(headers::cache_control(target.path())),
        );
        headers::apply_cors(&mut headers);

        let stream = upstream.bytes_stream().map_err(std::io::Error::other);
        (status, headers, Body::from_stream(stream)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProxyBody {
    url: Option<String>,
}

/// `GET /api/proxy?url=`
///
/// # Errors
///
/// See [`StreamProxy::fetch`].
pub async fn proxy_get(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
    request: HeaderMap,
) -> Result<Response, ProxyError> {
    state.proxy.fetch(query.url.as_deref(), &request).await
}

/// `POST /api/proxy` with a JSON body `{url}`.
///
/// # Errors
///
/// See [`StreamProxy::fetch`].
pub async fn proxy_post(
    State(state): State<AppState>,
    request: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let body: ProxyBody = serde_json::from_slice(&body).map_err(|e| ProxyError::Validation {
        message: format!("invalid JSON body: {e}"),
    })?;
    state.proxy.fetch(body.url.as_deref(), &request).await
}

/// `OPTIONS /api/proxy` CORS preflight.
pub async fn proxy_options() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers::apply_cors(&mut headers);
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    (StatusCode::NO_CONTENT, headers)
}
