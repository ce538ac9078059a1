//! Retry-aware consumer loop.
//!
//! Per delivery:
//!
//! ```text
//! Delivered -> decode + save ok            -> ack                       (Persisted)
//!           -> failed, retry_count < limit -> republish +1, ack original (Requeued)
//!           -> failed, retry_count >= limit -> reject into DLQ           (DeadLettered)
//! ```
//!
//! A malformed body and a store failure take the same path.

use crate::broker::{Broker, DeliveryStream, Envelope, OutgoingMessage};
use crate::error::{QueueError, QueueResult};
use order_domain::Order;
use order_store::{OrderStore, SaveOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Resubmissions allowed before a message is dead-lettered.
pub const RETRY_LIMIT: u32 = 3;

/// Consumer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Queue to consume, also the routing key for retry copies
    pub queue: String,
    pub consumer_tag: String,
    /// Unacknowledged deliveries allowed at once
    pub prefetch: u16,
    pub retry_limit: u32,
    /// Pause before returning a delivery whose retry copy could not be published
    pub requeue_backoff: Duration,
}

impl ConsumerConfig {
    /// Defaults for `queue` with a fresh consumer tag.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            consumer_tag: format!("order-consumer-{}", Uuid::new_v4()),
            prefetch: 1,
            retry_limit: RETRY_LIMIT,
            requeue_backoff: Duration::from_secs(1),
        }
    }
}

/// How one delivery was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Stored and acknowledged.
    Persisted,
    /// Already stored by an earlier attempt; acknowledged.
    Duplicate,
    /// A copy carrying `retry_count` was queued and the original acknowledged.
    Requeued { retry_count: u32 },
    /// Rejected into the dead-letter queue at `retry_count`.
    DeadLettered { retry_count: u32 },
    /// The retry copy could not be published, so the original went back to
    /// the broker unchanged with its `retry_count`.
    Returned { retry_count: u32 },
}

/// What the processing failure was about, for the logs.
#[derive(Debug, Default)]
struct OrderContext {
    order_id: Option<String>,
    customer_id: Option<String>,
}

impl OrderContext {
    /// Best-effort identifiers from a body that may not be a valid order.
    fn from_body(body: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
            return Self::default();
        };
        let field = |name: &str| {
            value.get(name).and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };
        Self {
            order_id: field("orderId"),
            customer_id: field("customerId"),
        }
    }
}

/// Consumes orders from a queue into an [`OrderStore`].
#[derive(Clone)]
pub struct OrderConsumer {
    broker: Arc<dyn Broker>,
    store: Arc<dyn OrderStore>,
    config: ConsumerConfig,
}

impl OrderConsumer {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn OrderStore>, config: ConsumerConfig) -> Self {
        Self {
            broker,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Decode and persist. Every failure here leads to retry or dead-letter.
    async fn process(&self, body: &[u8]) -> QueueResult<SaveOutcome> {
        let order = Order::decode(body)?;
        Ok(self.store.save(&order).await?)
    }

    /// Resolve one delivery. Never fails: settlement errors are logged and the
    /// broker's redelivery covers anything left unsettled.
    pub async fn handle(
        &self,
        stream: &mut dyn DeliveryStream,
        envelope: Envelope,
    ) -> ProcessingOutcome {
        let tag = envelope.delivery_tag;

        match self.process(&envelope.body).await {
            Ok(saved) => {
                if let Err(e) = stream.ack(tag).await {
                    error!(delivery_tag = tag, error = %e, "Failed to ack persisted order");
                }
                match saved {
                    SaveOutcome::Inserted => {
                        debug!(delivery_tag = tag, retry_count = envelope.retry_count, "Order persisted");
                        ProcessingOutcome::Persisted
                    }
                    SaveOutcome::Duplicate => {
                        info!(delivery_tag = tag, "Order already persisted, acknowledged duplicate");
                        ProcessingOutcome::Duplicate
                    }
                }
            }
            Err(e) => self.handle_failure(stream, envelope, e).await,
        }
    }

    async fn handle_failure(
        &self,
        stream: &mut dyn DeliveryStream,
        envelope: Envelope,
        cause: QueueError,
    ) -> ProcessingOutcome {
        let tag = envelope.delivery_tag;
        let retry_count = envelope.retry_count;
        let context = OrderContext::from_body(&envelope.body);

        if retry_count >= self.config.retry_limit {
            if let Err(e) = stream.reject(tag).await {
                error!(delivery_tag = tag, error = %e, "Failed to reject message");
            }
            error!(
                delivery_tag = tag,
                order_id = ?context.order_id,
                customer_id = ?context.customer_id,
                retry_count,
                error = %cause,
                "Retry limit reached, message dead-lettered"
            );
            return ProcessingOutcome::DeadLettered { retry_count };
        }

        let next = retry_count + 1;
        let retry = OutgoingMessage::persistent(envelope.body).with_retry_count(next);

        // The default exchange routes straight to the queue named by the key.
        match self.broker.publish("", &self.config.queue, retry).await {
            Ok(()) => {
                if let Err(e) = stream.ack(tag).await {
                    error!(
                        delivery_tag = tag,
                        error = %e,
                        "Failed to ack original after queuing retry"
                    );
                }
                warn!(
                    delivery_tag = tag,
                    order_id = ?context.order_id,
                    customer_id = ?context.customer_id,
                    retry_count = next,
                    error = %cause,
                    "Order processing failed, retry queued"
                );
                ProcessingOutcome::Requeued { retry_count: next }
            }
            Err(publish_error) => {
                error!(
                    delivery_tag = tag,
                    order_id = ?context.order_id,
                    customer_id = ?context.customer_id,
                    retry_count,
                    error = %cause,
                    publish_error = %publish_error,
                    "Could not queue retry, returning message to broker"
                );
                if !self.config.requeue_backoff.is_zero() {
                    tokio::time::sleep(self.config.requeue_backoff).await;
                }
                if let Err(e) = stream.requeue(tag).await {
                    error!(delivery_tag = tag, error = %e, "Failed to requeue message");
                }
                ProcessingOutcome::Returned { retry_count }
            }
        }
    }

    /// Consume until `shutdown` is cancelled.
    ///
    /// In-flight work always finishes before the subscription is cancelled.
    /// Returns [`QueueError::Connection`] if the broker ends the subscription.
    pub async fn run(&self, shutdown: CancellationToken) -> QueueResult<()> {
        let mut stream = self
            .broker
            .consume(
                &self.config.queue,
                &self.config.consumer_tag,
                self.config.prefetch,
            )
            .await?;

        info!(
            queue = %self.config.queue,
            consumer_tag = %self.config.consumer_tag,
            prefetch = self.config.prefetch,
            retry_limit = self.config.retry_limit,
            "Order consumer running"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = stream.next_delivery() => next,
            };

            match next {
                Some(Ok(envelope)) => {
                    let outcome = self.handle(stream.as_mut(), envelope).await;
                    debug!(?outcome, "Delivery resolved");
                }
                Some(Err(e)) => {
                    error!(error = %e, "Error receiving delivery");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                None => {
                    warn!(queue = %self.config.queue, "Delivery stream closed by broker");
                    return Err(QueueError::Connection(format!(
                        "delivery stream for '{}' closed",
                        self.config.queue
                    )));
                }
            }
        }

        if let Err(e) = stream.cancel().await {
            warn!(error = %e, "Failed to cancel subscription cleanly");
        }
        info!(consumer_tag = %self.config.consumer_tag, "Order consumer stopped");
        Ok(())
    }

    /// Run on a background task.
    pub fn start(self) -> ConsumerHandle {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        ConsumerHandle {
            shutdown,
            task: Some(task),
        }
    }
}

/// A consumer running on a background task.
pub struct ConsumerHandle {
    shutdown: CancellationToken,
    task: Option<JoinHandle<QueueResult<()>>>,
}

impl ConsumerHandle {
    /// Token that stops the consumer when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Wait for the consumer to exit on its own. Cancel-safe.
    pub async fn wait(&mut self) -> QueueResult<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        flatten(result)
    }

    /// Stop taking new deliveries, let the current one finish, and wait.
    pub async fn stop(mut self) -> QueueResult<()> {
        self.shutdown.cancel();
        match self.task.take() {
            Some(task) => flatten(task.await),
            None => Ok(()),
        }
    }
}

fn flatten(result: Result<QueueResult<()>, tokio::task::JoinError>) -> QueueResult<()> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(QueueError::Worker(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_defaults() {
        let config = ConsumerConfig::new("order");
        assert_eq!(config.queue, "order");
        assert_eq!(config.prefetch, 1);
        assert_eq!(config.retry_limit, 3);
        assert!(config.consumer_tag.starts_with("order-consumer-"));
    }

    #[test]
    fn test_context_from_valid_body() {
        let context = OrderContext::from_body(
            br#"{"orderId":"5b0c1a0e-0000-4000-8000-000000000001","customerId":"c1","total":1}"#,
        );
        assert_eq!(
            context.order_id.as_deref(),
            Some("5b0c1a0e-0000-4000-8000-000000000001")
        );
        assert_eq!(context.customer_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_context_from_garbage_is_empty() {
        let context = OrderContext::from_body(b"\xff\xfe not json");
        assert!(context.order_id.is_none());
        assert!(context.customer_id.is_none());

        let context = OrderContext::from_body(br#"[1,2,3]"#);
        assert!(context.customer_id.is_none());
    }
}
