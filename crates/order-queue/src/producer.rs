//! Publishes orders to the exchange.

use crate::broker::{Broker, OutgoingMessage};
use crate::error::{QueueError, QueueResult};
use order_domain::Order;
use std::sync::Arc;
use tracing::debug;

/// Order producer.
///
/// Publishing waits for the broker to accept the message, never for a
/// consumer. There is no retry here; callers decide what a failure means.
#[derive(Clone)]
pub struct OrderProducer {
    broker: Arc<dyn Broker>,
    exchange: String,
}

impl OrderProducer {
    pub fn new(broker: Arc<dyn Broker>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }

    /// Publish `order` as persistent JSON under `routing_key`.
    ///
    /// The order is trusted as given. Any broker failure surfaces as
    /// [`QueueError::Publish`].
    pub async fn publish(&self, routing_key: &str, order: &Order) -> QueueResult<()> {
        if routing_key.trim().is_empty() {
            return Err(QueueError::InvalidRoutingKey);
        }

        let body = order.encode()?;
        let size = body.len();

        match self
            .broker
            .publish(&self.exchange, routing_key, OutgoingMessage::persistent(body))
            .await
        {
            Ok(()) => {}
            Err(e @ QueueError::Publish(_)) => return Err(e),
            Err(other) => return Err(QueueError::Publish(other.to_string())),
        }

        debug!(
            exchange = %self.exchange,
            routing_key,
            order_id = ?order.order_id,
            size,
            "Order published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use crate::topology::{Topology, TopologyManager};

    async fn setup() -> (MemoryBroker, OrderProducer) {
        let broker = MemoryBroker::new();
        let topology = Topology::default();
        TopologyManager::new(Arc::new(broker.clone()), topology.clone())
            .ensure_topology()
            .await
            .unwrap();
        let producer = OrderProducer::new(Arc::new(broker.clone()), topology.exchange);
        (broker, producer)
    }

    #[tokio::test]
    async fn test_publish_lands_in_bound_queue_without_retry_header() {
        let (broker, producer) = setup().await;
        let order = Order::new("c1", 42.5);

        producer.publish("order_created", &order).await.unwrap();

        let queued = broker.peek("order");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].retry_count, 0);
        assert_eq!(Order::decode(&queued[0].body).unwrap(), order);
    }

    #[tokio::test]
    async fn test_empty_routing_key_is_rejected() {
        let (broker, producer) = setup().await;

        let err = producer.publish("  ", &Order::new("c1", 1.0)).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidRoutingKey));
        assert_eq!(broker.queue_depth("order"), 0);
    }

    #[tokio::test]
    async fn test_closed_broker_is_publish_error() {
        let (broker, producer) = setup().await;
        broker.close().await.unwrap();

        let err = producer
            .publish("order_created", &Order::new("c1", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Publish(_)));
    }

    #[tokio::test]
    async fn test_missing_exchange_is_publish_error() {
        let broker = MemoryBroker::new();
        let producer = OrderProducer::new(Arc::new(broker), "orders_exchange");

        let err = producer
            .publish("order_created", &Order::new("c1", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Publish(_)));
    }
}
