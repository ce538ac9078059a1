//! # Observability
//!
//! Logging setup for the order pipeline. A process calls [`init`] or
//! [`init_with_config`] once at startup and logs with ordinary `tracing`
//! macros from then on.
//!
//! Output:
//! - compact, human-readable lines on stderr
//! - optionally, structured JSONL appended to `log_path`, one object per
//!   event carrying the service name and pid so several processes can
//!   share one file
//!
//! `RUST_LOG` takes precedence over the configured default level.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "order-pipeline".into(),
//!     default_level: "debug".into(),
//!     log_path: Some("/var/log/orders/pipeline.jsonl".into()),
//!     also_stderr: true,
//! })?;
//! ```

mod file;
mod json;

pub use file::LogFile;
pub use json::JsonLayer;

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Included in every JSONL record.
    pub service_name: String,

    /// Default filter directive, e.g. `info` or `order_queue=debug,info`.
    pub default_level: String,

    /// JSONL file. When unset, logs go to stderr only.
    pub log_path: Option<PathBuf>,

    /// Also write to stderr when `log_path` is set.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
        }
    }
}

/// Logging could not be initialised.
#[derive(Error, Debug)]
pub enum ObservabilityError {
    /// The JSONL file could not be opened
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A global subscriber is already installed
    #[error("logging already initialised: {0}")]
    AlreadyInitialized(String),
}

/// Initialise with defaults for `service_name`.
pub fn init(service_name: &str) -> Result<(), ObservabilityError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialise the global subscriber.
pub fn init_with_config(config: LogConfig) -> Result<(), ObservabilityError> {
    let json_layer = match &config.log_path {
        Some(path) => {
            let file = LogFile::open(path).map_err(|source| ObservabilityError::LogFile {
                path: path.clone(),
                source,
            })?;
            Some(
                JsonLayer::new(config.service_name.clone(), file)
                    .with_filter(env_filter(&config.default_level)),
            )
        }
        None => None,
    };

    let stderr_layer = (json_layer.is_none() || config.also_stderr).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| ObservabilityError::AlreadyInitialized(e.to_string()))?;

    tracing::debug!(
        service = %config.service_name,
        log_path = ?config.log_path,
        "observability initialized"
    );
    Ok(())
}

/// `RUST_LOG` if set and valid, else `default_level`, else `info`.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub use tracing::{debug, error, info, instrument, trace, warn, Level};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(config.also_stderr);
    }

    #[test]
    fn test_unopenable_log_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let result = init_with_config(LogConfig {
            service_name: "test".into(),
            log_path: Some(blocker.join("nested.jsonl")),
            ..Default::default()
        });
        assert!(matches!(result, Err(ObservabilityError::LogFile { .. })));
    }

    #[test]
    fn test_bad_directive_falls_back() {
        // Builds a usable filter rather than panicking.
        let _ = env_filter("[[not a directive");
    }
}
