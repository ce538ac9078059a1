//! Broker topology: exchange, primary queue, dead-letter queue, binding.

use crate::broker::{Broker, ExchangeSpec, QueueSpec};
use crate::error::QueueResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Names of the broker entities the pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    /// Direct exchange producers publish to
    pub exchange: String,
    /// Primary queue the consumer reads
    pub queue: String,
    /// Terminal sink for messages that exhausted their retries
    pub dead_letter_queue: String,
    /// Key binding the primary queue to the exchange
    pub routing_key: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            exchange: "orders_exchange".to_string(),
            queue: "order".to_string(),
            dead_letter_queue: "order_dlq".to_string(),
            routing_key: "order_created".to_string(),
        }
    }
}

impl Topology {
    pub fn exchange_spec(&self) -> ExchangeSpec {
        ExchangeSpec::direct(&self.exchange)
    }

    /// Primary queue, dead-lettering through the default exchange.
    pub fn queue_spec(&self) -> QueueSpec {
        QueueSpec::durable(&self.queue).with_dead_letter("", &self.dead_letter_queue)
    }

    pub fn dead_letter_spec(&self) -> QueueSpec {
        QueueSpec::durable(&self.dead_letter_queue)
    }
}

/// Declares the topology on startup.
pub struct TopologyManager {
    broker: Arc<dyn Broker>,
    topology: Topology,
}

impl TopologyManager {
    pub fn new(broker: Arc<dyn Broker>, topology: Topology) -> Self {
        Self { broker, topology }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Declare everything. Safe to run on every startup and from several
    /// processes at once; a conflicting existing declaration fails with
    /// [`crate::QueueError::TopologyConflict`].
    ///
    /// The dead-letter queue is declared before the primary queue so nothing
    /// rejected in between can be dropped.
    pub async fn ensure_topology(&self) -> QueueResult<()> {
        let t = &self.topology;

        self.broker.declare_exchange(&t.exchange_spec()).await?;
        self.broker.declare_queue(&t.dead_letter_spec()).await?;
        self.broker.declare_queue(&t.queue_spec()).await?;
        self.broker
            .bind_queue(&t.queue, &t.exchange, &t.routing_key)
            .await?;

        info!(
            exchange = %t.exchange,
            queue = %t.queue,
            dead_letter_queue = %t.dead_letter_queue,
            routing_key = %t.routing_key,
            "Broker topology ready"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        let t = Topology::default();
        assert_eq!(t.exchange, "orders_exchange");
        assert_eq!(t.queue, "order");
        assert_eq!(t.dead_letter_queue, "order_dlq");
        assert_eq!(t.routing_key, "order_created");
    }

    #[test]
    fn test_primary_queue_dead_letters_to_dlq() {
        let spec = Topology::default().queue_spec();
        assert!(spec.durable);
        assert_eq!(spec.dead_letter_exchange.as_deref(), Some(""));
        assert_eq!(spec.dead_letter_routing_key.as_deref(), Some("order_dlq"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let t: Topology = serde_json::from_str(r#"{"queue":"orders_v2"}"#).unwrap();
        assert_eq!(t.queue, "orders_v2");
        assert_eq!(t.exchange, "orders_exchange");
    }
}
