//! Component wiring and lifecycle.

use crate::config::PipelineConfig;
use anyhow::{Context, Result};
use clap::ValueEnum;
use order_intake::IntakeState;
use order_queue::{
    AmqpBroker, Broker, ConsumerHandle, MemoryBroker, OrderConsumer, OrderProducer,
    TopologyManager,
};
use order_store::SqliteOrderStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Broker backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BrokerKind {
    /// RabbitMQ over AMQP 0-9-1
    Amqp,
    /// In-process broker; messages do not survive a restart
    Memory,
}

/// Which components to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Consume,
    Intake,
    Topology,
}

impl Mode {
    fn runs_consumer(self) -> bool {
        matches!(self, Mode::Serve | Mode::Consume)
    }

    fn runs_intake(self) -> bool {
        matches!(self, Mode::Serve | Mode::Intake)
    }
}

/// Open the broker. An AMQP broker connects eagerly so a bad URL fails startup.
async fn open_broker(kind: BrokerKind, config: &PipelineConfig) -> Result<Arc<dyn Broker>> {
    match kind {
        BrokerKind::Amqp => {
            let broker = AmqpBroker::connect(config.broker.url.as_str())
                .await
                .context("failed to connect to broker")?;
            Ok(Arc::new(broker))
        }
        BrokerKind::Memory => {
            warn!("Using in-memory broker; queued orders are lost on exit");
            Ok(Arc::new(MemoryBroker::new()))
        }
    }
}

/// Run `mode` until ctrl-c or until a component fails.
pub async fn run(config: PipelineConfig, kind: BrokerKind, mode: Mode) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping...");
        }
        signal.cancel();
    });
    run_until(config, kind, mode, shutdown).await
}

/// Run `mode` until `shutdown` is cancelled or a component fails.
pub async fn run_until(
    config: PipelineConfig,
    kind: BrokerKind,
    mode: Mode,
    shutdown: CancellationToken,
) -> Result<()> {
    let store = if mode.runs_consumer() {
        let store = SqliteOrderStore::open(&config.db_path)
            .await
            .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;
        info!(path = %config.db_path.display(), "Order store ready");
        Some(Arc::new(store))
    } else {
        None
    };

    let broker = open_broker(kind, &config).await?;
    let topology = config.broker.topology.clone();

    TopologyManager::new(broker.clone(), topology.clone())
        .ensure_topology()
        .await
        .context("failed to declare broker topology")?;

    if mode == Mode::Topology {
        broker.close().await?;
        return Ok(());
    }

    let mut consumer: Option<ConsumerHandle> = match &store {
        Some(store) => Some(
            OrderConsumer::new(broker.clone(), store.clone(), config.broker.consumer_config())
                .start(),
        ),
        None => None,
    };

    let mut intake: Option<JoinHandle<order_intake::IntakeResult<()>>> = if mode.runs_intake() {
        let listener = TcpListener::bind(config.http_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.http_addr))?;
        let producer = OrderProducer::new(broker.clone(), topology.exchange.clone());
        let state = IntakeState::new(producer, topology.routing_key.clone());
        Some(tokio::spawn(order_intake::serve(
            listener,
            state,
            shutdown.clone(),
        )))
    } else {
        None
    };

    info!(?mode, "Order pipeline running");

    // First of: shutdown requested, consumer exited, server exited.
    let mut failure: Option<anyhow::Error> = None;
    tokio::select! {
        _ = shutdown.cancelled() => {}
        result = wait_consumer(&mut consumer) => {
            consumer = None;
            if let Err(e) = result {
                error!(error = %e, "Order consumer exited with error");
                failure = Some(e.into());
            }
        }
        result = wait_intake(&mut intake) => {
            intake = None;
            if let Err(e) = result {
                error!(error = %e, "HTTP intake exited with error");
                failure = Some(e);
            }
        }
    }
    shutdown.cancel();

    if let Some(handle) = intake {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "HTTP intake stopped with error"),
            Err(e) => warn!(error = %e, "HTTP intake task failed"),
        }
    }
    if let Some(handle) = consumer {
        if let Err(e) = handle.stop().await {
            warn!(error = %e, "Order consumer stopped with error");
        }
    }
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Failed to close broker cleanly");
    }
    if let Some(store) = store {
        match Arc::try_unwrap(store) {
            Ok(store) => {
                if let Err(e) = store.close().await {
                    warn!(error = %e, "Failed to close store cleanly");
                }
            }
            Err(_) => warn!("Order store still shared at shutdown"),
        }
    }

    info!("Order pipeline stopped");
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn wait_consumer(consumer: &mut Option<ConsumerHandle>) -> order_queue::QueueResult<()> {
    match consumer {
        Some(handle) => handle.wait().await,
        None => std::future::pending().await,
    }
}

async fn wait_intake(
    intake: &mut Option<JoinHandle<order_intake::IntakeResult<()>>>,
) -> Result<()> {
    match intake {
        Some(handle) => match handle.await {
            Ok(result) => result.map_err(Into::into),
            Err(e) => Err(anyhow::anyhow!("intake task failed: {}", e)),
        },
        None => std::future::pending().await,
    }
}
