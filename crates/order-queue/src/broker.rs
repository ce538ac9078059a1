//! The broker seam.
//!
//! Topology, producer and consumer only talk to a [`Broker`]. The AMQP
//! backend speaks to a real server; the in-memory backend reproduces the same
//! observable contract inside the process.

use crate::QueueResult;
use async_trait::async_trait;

/// Content type stamped on every published order.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A direct exchange declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub durable: bool,
}

impl ExchangeSpec {
    /// Durable direct exchange.
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }
}

/// A queue declaration, optionally dead-lettering into another exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    /// `x-dead-letter-exchange`; `Some("")` is the default exchange.
    pub dead_letter_exchange: Option<String>,
    /// `x-dead-letter-routing-key`
    pub dead_letter_routing_key: Option<String>,
}

impl QueueSpec {
    /// Durable queue without dead-lettering.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
        }
    }

    /// Route rejected messages to `exchange` under `routing_key`.
    pub fn with_dead_letter(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self.dead_letter_routing_key = Some(routing_key.into());
        self
    }
}

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Broker-assigned tag, only meaningful to the stream that delivered it.
    pub delivery_tag: u64,
    /// Raw body, expected to be UTF-8 JSON of an order.
    pub body: Vec<u8>,
    /// Decoded `x-retry-count`; 0 when absent.
    pub retry_count: u32,
    /// True when the broker has delivered this copy before.
    pub redelivered: bool,
}

/// A message about to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    /// Written to `x-retry-count` when set. First publishes carry no header.
    pub retry_count: Option<u32>,
    /// Survive a broker restart while queued.
    pub persistent: bool,
}

impl OutgoingMessage {
    /// Persistent message without retry metadata.
    pub fn persistent(body: Vec<u8>) -> Self {
        Self {
            body,
            retry_count: None,
            persistent: true,
        }
    }

    /// Set the retry counter.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }
}

/// A message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare an exchange. Identical redeclaration is a no-op; a
    /// conflicting one fails with [`crate::QueueError::TopologyConflict`].
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> QueueResult<()>;

    /// Declare a queue, same idempotence rules as exchanges.
    async fn declare_queue(&self, spec: &QueueSpec) -> QueueResult<()>;

    /// Bind `queue` to `exchange` under `routing_key`.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> QueueResult<()>;

    /// Publish and wait until the broker has accepted the message.
    ///
    /// The empty exchange name is the default exchange, which routes to the
    /// queue named by `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutgoingMessage,
    ) -> QueueResult<()>;

    /// Subscribe to `queue` with at most `prefetch` unacknowledged deliveries.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> QueueResult<Box<dyn DeliveryStream>>;

    /// Release the connection. Unacknowledged deliveries return to their queue.
    async fn close(&self) -> QueueResult<()>;
}

/// Deliveries for one subscription, plus the settlement operations for them.
///
/// Dropping a stream releases its unacknowledged deliveries back to the queue.
#[async_trait]
pub trait DeliveryStream: Send {
    /// Wait for the next delivery. `None` once the subscription has ended.
    async fn next_delivery(&mut self) -> Option<QueueResult<Envelope>>;

    /// Remove the delivery from the queue for good.
    async fn ack(&mut self, delivery_tag: u64) -> QueueResult<()>;

    /// Reject without requeue; the queue's dead-letter target receives it.
    async fn reject(&mut self, delivery_tag: u64) -> QueueResult<()>;

    /// Hand the delivery back to the queue unchanged, headers included.
    async fn requeue(&mut self, delivery_tag: u64) -> QueueResult<()>;

    /// Stop receiving new deliveries.
    async fn cancel(&mut self) -> QueueResult<()>;
}
