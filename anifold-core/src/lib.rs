//! Anifold Core - source aggregation, failover and verification
//!
//! This crate provides the building blocks for serving anime metadata and
//! playable streams from many unreliable upstream sources: the source
//! capability contract, per-source failure tracking, result caching and
//! admission throttling, the source manager that picks a working source per
//! request, and the end-to-end source verifier.

pub mod cache;
pub mod config;
pub mod failure;
pub mod manager;
pub mod retry;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod throttle;
pub mod tracing_setup;
pub mod verifier;

// Re-export main types for convenient access
pub use cache::{SourceCache, TtlCache, TtlClass};
pub use config::AnifoldConfig;
pub use failure::FailureTracker;
pub use manager::{SourceManager, WatchFailure, WatchOutcome};
pub use retry::{RetryPolicy, with_retry, with_timeout};
pub use source::{RequestOptions, Source, SourceError, SourceResult};
pub use throttle::AdmissionThrottle;
pub use verifier::{SourceVerifier, StreamQuality, VerificationReport, VerificationStatus};

/// Core errors that can bubble up from any Anifold subsystem.
#[derive(Debug, thiserror::Error)]
pub enum AnifoldError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Unknown source: {name}")]
    UnknownSource { name: String },

    #[error("No sources registered")]
    NoSources,

    #[error("Cannot write log file {}: {source}", path.display())]
    LogFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AnifoldError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            AnifoldError::Source(e) => match e {
                SourceError::Cancelled => "Request was cancelled".to_string(),
                SourceError::Timeout { .. } => "The source took too long to respond".to_string(),
                SourceError::NotFound { id } => format!("{id} was not found"),
                SourceError::Unsupported { operation } => {
                    format!("This source does not support {operation}")
                }
                _ => "The source failed to answer".to_string(),
            },
            AnifoldError::Configuration { reason } => format!("Configuration error: {reason}"),
            AnifoldError::UnknownSource { name } => format!("Unknown source: {name}"),
            AnifoldError::NoSources => "No sources are configured".to_string(),
            AnifoldError::LogFile { path, .. } => {
                format!("Cannot write logs to {}", path.display())
            }
        }
    }

    /// Checks if this error was caused by the caller's input or settings
    /// rather than by a source or the host.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AnifoldError::Configuration { .. }
                | AnifoldError::UnknownSource { .. }
                | AnifoldError::Source(SourceError::NotFound { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, AnifoldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors() {
        assert!(
            AnifoldError::UnknownSource {
                name: "nope".to_string()
            }
            .is_user_error()
        );
        assert!(!AnifoldError::NoSources.is_user_error());
        assert!(!AnifoldError::Source(SourceError::Cancelled).is_user_error());
        assert!(
            !AnifoldError::LogFile {
                path: "logs".into(),
                source: std::io::Error::other("read-only filesystem"),
            }
            .is_user_error()
        );
    }

    #[test]
    fn test_user_message_hides_transport_details() {
        let error = AnifoldError::from(SourceError::Network {
            reason: "tcp connect error: 10.0.0.1:443".to_string(),
        });
        assert_eq!(error.user_message(), "The source failed to answer");
    }
}
