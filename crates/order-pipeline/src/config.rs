//! Process configuration.
//!
//! Precedence, lowest first: built-in defaults, JSON config file,
//! environment, command-line flags.

use anyhow::{Context, Result};
use order_queue::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default HTTP intake address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:3000";

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// JSONL log file. Logs go to stderr only when unset.
    pub log_path: Option<PathBuf>,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// HTTP intake listen address.
    pub http_addr: SocketAddr,
    /// Broker connection, topology and consumer settings.
    pub broker: BrokerConfig,
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("order-pipeline"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("orders.db")
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_path: None,
            db_path: default_db_path(),
            http_addr: default_http_addr(),
            broker: BrokerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from an optional file, then apply environment overrides.
    ///
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Apply `ORDER_DB_PATH`, `ORDER_HTTP_ADDR`, `ORDER_LOG_LEVEL`,
    /// `ORDER_LOG_PATH` and the broker variables from `lookup`.
    /// Unparseable addresses are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.broker.apply_env(&lookup);
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(path) = lookup("ORDER_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("ORDER_HTTP_ADDR").and_then(|s| s.parse().ok()) {
            self.http_addr = addr;
        }
        if let Some(level) = lookup("ORDER_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(path) = lookup("ORDER_LOG_PATH") {
            self.log_path = Some(PathBuf::from(path));
        }
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        self.broker.validate().context("invalid broker settings")?;
        if self.db_path.as_os_str().is_empty() {
            anyhow::bail!("db_path is empty");
        }
        Ok(())
    }
}
