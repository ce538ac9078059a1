//! Router and server loop.

use crate::error::IntakeResult;
use crate::handlers;
use axum::routing::{get, post};
use axum::Router;
use order_queue::OrderProducer;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state.
#[derive(Clone)]
pub struct IntakeState {
    pub producer: OrderProducer,
    /// Routing key accepted orders are published under
    pub routing_key: String,
}

impl IntakeState {
    pub fn new(producer: OrderProducer, routing_key: impl Into<String>) -> Self {
        Self {
            producer,
            routing_key: routing_key.into(),
        }
    }
}

/// Build the intake router.
pub fn router(state: IntakeState) -> Router {
    Router::new()
        .route("/order", post(handlers::create_order))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` is cancelled, then drain open requests.
pub async fn serve(
    listener: TcpListener,
    state: IntakeState,
    shutdown: CancellationToken,
) -> IntakeResult<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP intake listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP intake stopped");
    Ok(())
}
