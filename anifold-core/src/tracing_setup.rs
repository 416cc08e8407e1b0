//! Logging for the server and the CLI.
//!
//! The console shows Anifold's own events at the operator's level together
//! with the per-request spans from the HTTP layer. The log file under
//! [`LoggingConfig::logs_dir`] is recreated on every run and keeps the
//! verbose upstream detail needed to diagnose a failing source afterwards.

use std::fs::{File, create_dir_all};
use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::LoggingConfig;
use crate::{AnifoldError, Result};

pub const LOG_FILE_NAME: &str = "anifold.log";

/// Console directives: everything else at `warn`, our crates and request
/// spans at `level`.
fn console_directives(level: Level) -> String {
    let level = level.to_string().to_ascii_lowercase();
    format!("warn,anifold={level},anifold_core={level},anifold_web={level},tower_http={level}")
}

fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).map_err(|e| AnifoldError::Configuration {
        reason: format!("invalid log filter {directives:?}: {e}"),
    })
}

/// Installs the global subscriber and returns the path of the log file.
///
/// `RUST_LOG` replaces the console directives when set.
///
/// # Errors
///
/// - `AnifoldError::Configuration` - Bad file directives, or a subscriber is
///   already installed
/// - `AnifoldError::LogFile` - The logs directory or file cannot be created
pub fn init_tracing(console_level: Level, logging: &LoggingConfig) -> Result<PathBuf> {
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(&console_directives(console_level))?,
    };
    let file_filter = parse_filter(&logging.file_directives)?;

    create_dir_all(&logging.logs_dir).map_err(|source| AnifoldError::LogFile {
        path: logging.logs_dir.clone(),
        source,
    })?;
    let path = logging.logs_dir.join(LOG_FILE_NAME);
    let file = File::create(&path).map_err(|source| AnifoldError::LogFile {
        path: path.clone(),
        source,
    })?;

    let console_layer = fmt::layer().compact().with_filter(console_filter);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(file)
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AnifoldError::Configuration {
            reason: format!("tracing already initialized: {e}"),
        })?;

    tracing::debug!(log_file = %path.display(), "Logging initialized");
    Ok(path)
}

/// Console verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_directives_scope_our_crates() {
        let directives = console_directives(CliLogLevel::Debug.into());
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("anifold_web=debug"));
        assert!(directives.contains("tower_http=debug"));
        assert!(parse_filter(&directives).is_ok());
    }

    #[test]
    fn test_default_file_directives_parse() {
        assert!(parse_filter(&LoggingConfig::default().file_directives).is_ok());
    }

    #[test]
    fn test_bad_file_directives_are_a_configuration_error() {
        let logs = tempfile::tempdir().unwrap();
        let logging = LoggingConfig {
            logs_dir: logs.path().to_path_buf(),
            file_directives: "anifold_core=loudest".to_string(),
        };

        let result = init_tracing(Level::INFO, &logging);
        assert!(matches!(result, Err(AnifoldError::Configuration { .. })));
        assert!(!logs.path().join(LOG_FILE_NAME).exists());
    }

    #[test]
    fn test_unwritable_logs_dir_reports_path() {
        let scratch = tempfile::tempdir().unwrap();
        let blocker = scratch.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let logging = LoggingConfig {
            logs_dir: blocker.join("logs"),
            ..LoggingConfig::default()
        };

        match init_tracing(Level::INFO, &logging) {
            Err(AnifoldError::LogFile { path, .. }) => assert_eq!(path, blocker.join("logs")),
            other => panic!("expected LogFile error, got {other:?}"),
        }
    }

    #[test]
    fn test_writes_log_file_into_logs_dir() {
        let logs = tempfile::tempdir().unwrap();
        let logging = LoggingConfig {
            logs_dir: logs.path().join("nested"),
            ..LoggingConfig::default()
        };

        let path = init_tracing(Level::WARN, &logging).unwrap();
        assert_eq!(path, logs.path().join("nested").join(LOG_FILE_NAME));
        assert!(path.exists());
    }
}
