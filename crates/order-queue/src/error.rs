//! Error types for the order queue.

use thiserror::Error;

/// Order queue error type.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Broker connection could not be established or was lost
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// AMQP protocol or channel error
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// Declared topology disagrees with what the broker already has.
    /// Fatal at startup.
    #[error("Topology conflict: {0}")]
    TopologyConflict(String),

    /// The broker did not accept a publish
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Publish was attempted with an empty routing key
    #[error("Routing key must not be empty")]
    InvalidRoutingKey,

    /// Broker refused an operation (unknown queue, unknown delivery tag)
    #[error("Broker error: {0}")]
    Broker(String),

    /// Message body is not a valid order
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] order_domain::DecodeError),

    /// The order store failed to persist
    #[error("Store error: {0}")]
    Store(#[from] order_store::StoreError),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The consumer task panicked or was aborted
    #[error("Consumer task failed: {0}")]
    Worker(String),
}

/// Result type for order queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
