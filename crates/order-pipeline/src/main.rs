//! Order pipeline entry point.
//!
//! Usage: order-pipeline [--config <file>] [--broker amqp|memory] [serve|consume|intake|topology]

mod app;
mod config;

use app::{BrokerKind, Mode};
use clap::{Parser, Subcommand};
use config::PipelineConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

/// Reliable order ingestion over a message broker.
#[derive(Parser, Debug)]
#[command(name = "order-pipeline")]
#[command(about = "HTTP order intake, broker topology and retry-aware order consumer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Broker backend
    #[arg(long, value_enum, default_value_t = BrokerKind::Amqp, global = true)]
    broker: BrokerKind,

    /// Broker URL, overrides RABBITMQ_URL and the config file
    #[arg(long, global = true)]
    broker_url: Option<String>,

    /// SQLite database file
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long, global = true)]
    http_addr: Option<SocketAddr>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Declare topology, then run the consumer and the HTTP intake (default)
    Serve,
    /// Declare topology and run the consumer only
    Consume,
    /// Declare topology and run the HTTP intake only
    Intake,
    /// Declare topology and exit
    Topology,
}

impl From<Option<Commands>> for Mode {
    fn from(command: Option<Commands>) -> Self {
        match command {
            None | Some(Commands::Serve) => Mode::Serve,
            Some(Commands::Consume) => Mode::Consume,
            Some(Commands::Intake) => Mode::Intake,
            Some(Commands::Topology) => Mode::Topology,
        }
    }
}

impl Cli {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(url) = &self.broker_url {
            config.broker.url = url.clone();
        }
        if let Some(path) = &self.db_path {
            config.db_path = path.clone();
        }
        if let Some(addr) = self.http_addr {
            config.http_addr = addr;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The file carries the log level and log path, so it is read first.
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    observability::init_with_config(observability::LogConfig {
        service_name: "order-pipeline".into(),
        default_level: config.log_level.clone(),
        log_path: config.log_path.clone(),
        also_stderr: true,
    })?;

    config.validate()?;

    let mode = Mode::from(cli.command);
    info!(
        ?mode,
        broker = ?cli.broker,
        db_path = %config.db_path.display(),
        http_addr = %config.http_addr,
        queue = %config.broker.topology.queue,
        dead_letter_queue = %config.broker.topology.dead_letter_queue,
        retry_limit = config.broker.retry_limit,
        "Configuration loaded"
    );

    app::run(config, cli.broker, mode).await
}
