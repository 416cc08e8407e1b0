//! HTTP error types for the proxy and the JSON routes.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use anifold_core::{AnifoldError, SourceError};

/// Failures of the streaming proxy. Each maps to a fixed status and a
/// machine-readable `reason`.
#[derive(Debug, Error, PartialEq)]
pub enum ProxyError {
    #[error("Invalid url: {message}")]
    Validation { message: String },

    #[error("Domain {host} is known to be dead")]
    DeadDomain { host: String },

    #[error("Could not resolve {host}")]
    Dns { host: String },

    #[error("Upstream refused access with HTTP {status}")]
    Blocked { status: u16 },

    #[error("Upstream did not answer within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Connection to upstream failed: {reason}")]
    Connection { reason: String },

    #[error("Upstream returned HTTP {status}")]
    Upstream { status: u16 },

    #[error("Failed to process manifest: {reason}")]
    Manifest { reason: String },
}

impl ProxyError {
    /// Machine-readable reason code included in the JSON body.
    pub fn reason(&self) -> &'static str {
        match self {
            ProxyError::Validation { .. } => "invalid_url",
            ProxyError::DeadDomain { .. } => "dead_domain",
            ProxyError::Dns { .. } => "dns_error",
            ProxyError::Blocked { .. } => "blocked",
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::Connection { .. } => "connection_error",
            ProxyError::Upstream { .. } => "upstream_error",
            ProxyError::Manifest { .. } => "manifest_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Validation { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Blocked { status } | ProxyError::Upstream { status } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::DeadDomain { .. }
            | ProxyError::Dns { .. }
            | ProxyError::Timeout { .. }
            | ProxyError::Connection { .. }
            | ProxyError::Manifest { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Classifies an upstream status of 400 or above.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ProxyError::Blocked { status },
            _ => ProxyError::Upstream { status },
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ProxyError::Blocked { status } | ProxyError::Upstream { status } => json!({
                "error": self.to_string(),
                "status": status,
                "reason": self.reason(),
            }),
            ProxyError::Manifest { .. } => json!({
                "error": "Failed to process manifest",
                "reason": self.reason(),
            }),
            _ => json!({
                "error": self.to_string(),
                "reason": self.reason(),
            }),
        };

        tracing::debug!(status = status.as_u16(), reason = self.reason(), "Proxy request failed");
        let mut response = (status, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        response
    }
}

/// Error returned by the JSON route handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.message,
            "code": self.code,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<SourceError> for ApiError {
    fn from(error: SourceError) -> Self {
        match &error {
            SourceError::Cancelled => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, error.code(), error.to_string())
            }
            SourceError::NotFound { .. } => ApiError::not_found(error.to_string()),
            _ => ApiError::new(StatusCode::BAD_GATEWAY, error.code(), error.to_string()),
        }
    }
}

impl From<AnifoldError> for ApiError {
    fn from(error: AnifoldError) -> Self {
        match error {
            AnifoldError::Source(source) => source.into(),
            user if user.is_user_error() => ApiError::bad_request(user.user_message()),
            other => {
                tracing::error!(error = %other, "Unexpected error");
                ApiError::internal(other.user_message())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_and_statuses() {
        let dead = ProxyError::DeadDomain {
            host: "dead-cdn.example".to_string(),
        };
        assert_eq!(dead.reason(), "dead_domain");
        assert_eq!(dead.status(), StatusCode::BAD_GATEWAY);

        assert_eq!(ProxyError::from_status(403).reason(), "blocked");
        assert_eq!(ProxyError::from_status(403).status(), StatusCode::FORBIDDEN);
        assert_eq!(ProxyError::from_status(404).reason(), "upstream_error");
        assert_eq!(
            ProxyError::Timeout { seconds: 30 }.status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_unknown_source_is_bad_request() {
        let error = ApiError::from(AnifoldError::UnknownSource {
            name: "zoro".to_string(),
        });
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_host_failures_are_internal_and_hide_io_detail() {
        let error = ApiError::from(AnifoldError::LogFile {
            path: "/var/log/anifold".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, "Cannot write logs to /var/log/anifold");
    }
}
