//! Error classification for source operations.

use std::time::Duration;

use thiserror::Error;

/// Errors a source operation can produce.
///
/// The failure tracker only counts errors for which
/// [`SourceError::counts_as_failure`] is true.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// Caller aborted the request.
    #[error("Request cancelled")]
    Cancelled,

    /// Operation exceeded its local deadline.
    #[error("Request timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Deadline that elapsed
        after: Duration,
    },

    /// Upstream answered with a non-success status.
    #[error("Upstream returned HTTP {status} for {url}")]
    Upstream {
        /// HTTP status code returned by the upstream
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Transport-level failure talking to the upstream.
    #[error("Network error: {reason}")]
    Network {
        /// Underlying transport error
        reason: String,
    },

    /// Upstream payload did not have the expected shape.
    #[error("Parse error: {reason}")]
    Parse {
        /// What could not be parsed
        reason: String,
    },

    /// Requested entity does not exist upstream.
    #[error("Not found: {id}")]
    NotFound {
        /// Identifier that was looked up
        id: String,
    },

    /// Source does not implement the operation.
    #[error("Operation not supported: {operation}")]
    Unsupported {
        /// Operation name
        operation: &'static str,
    },
}

impl SourceError {
    /// Returns true when the error should increment the consecutive
    /// failure counter of the source.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            SourceError::Upstream { .. } | SourceError::Network { .. } | SourceError::Parse { .. }
        )
    }

    /// Returns true for caller aborts and deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SourceError::Cancelled | SourceError::Timeout { .. })
    }

    /// Returns true when another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Timeout { .. }
                | SourceError::Upstream { .. }
                | SourceError::Network { .. }
                | SourceError::Parse { .. }
        )
    }

    /// Short machine-readable code used in JSON diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            SourceError::Cancelled => "cancelled",
            SourceError::Timeout { .. } => "timeout",
            SourceError::Upstream { .. } => "upstream_error",
            SourceError::Network { .. } => "connection_error",
            SourceError::Parse { .. } => "parse_error",
            SourceError::NotFound { .. } => "not_found",
            SourceError::Unsupported { .. } => "unsupported",
        }
    }
}

impl SourceError {
    /// Classifies a reqwest failure. Client-side deadline expiry becomes
    /// [`SourceError::Timeout`] so it is never counted against the source.
    pub fn from_reqwest(error: reqwest::Error, deadline: Duration) -> Self {
        if error.is_timeout() {
            return SourceError::Timeout { after: deadline };
        }
        if error.is_decode() {
            return SourceError::Parse {
                reason: error.to_string(),
            };
        }
        if let Some(status) = error.status() {
            return SourceError::Upstream {
                status: status.as_u16(),
                url: error.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        SourceError::Network {
            reason: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(error: serde_json::Error) -> Self {
        SourceError::Parse {
            reason: error.to_string(),
        }
    }
}

/// Convenience alias for source operation results.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_a_failure() {
        assert!(!SourceError::Cancelled.counts_as_failure());
        assert!(
            !SourceError::Timeout {
                after: Duration::from_secs(5)
            }
            .counts_as_failure()
        );
        assert!(SourceError::Cancelled.is_cancellation());
    }

    #[test]
    fn test_upstream_and_parse_count() {
        let upstream = SourceError::Upstream {
            status: 502,
            url: "https://example.test".to_string(),
        };
        assert!(upstream.counts_as_failure());
        assert!(
            SourceError::Parse {
                reason: "bad json".to_string()
            }
            .counts_as_failure()
        );
        assert!(
            !SourceError::Unsupported {
                operation: "get_genres"
            }
            .counts_as_failure()
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SourceError::Cancelled.code(), "cancelled");
        assert_eq!(
            SourceError::Network {
                reason: "reset".to_string()
            }
            .code(),
            "connection_error"
        );
    }
}
