//! Broker configuration.

use crate::consumer::{ConsumerConfig, RETRY_LIMIT};
use crate::error::{QueueError, QueueResult};
use crate::topology::Topology;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Default broker URL when `RABBITMQ_URL` is unset.
pub const DEFAULT_BROKER_URL: &str = "amqp://localhost:5672";

/// Broker and consumer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// AMQP URL (`amqp://` or `amqps://`)
    pub url: String,

    /// Exchange, queue and dead-letter names
    pub topology: Topology,

    /// Unacknowledged deliveries per worker
    pub prefetch: u16,

    /// Resubmissions before a message is dead-lettered
    pub retry_limit: u32,

    /// Consumer tag; a unique one is generated when unset
    pub consumer_tag: Option<String>,

    /// Pause before handing a delivery back after its retry could not be published
    pub requeue_backoff_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_string(),
            topology: Topology::default(),
            prefetch: 1,
            retry_limit: RETRY_LIMIT,
            consumer_tag: None,
            requeue_backoff_ms: 1000,
        }
    }
}

impl BrokerConfig {
    /// Apply `RABBITMQ_URL`, `ORDER_PREFETCH` and `ORDER_RETRY_LIMIT` from
    /// `lookup`. Blank or unparseable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = lookup("RABBITMQ_URL") {
            self.url = url;
        }
        if let Some(prefetch) = lookup("ORDER_PREFETCH").and_then(|s| s.trim().parse().ok()) {
            self.prefetch = prefetch;
        }
        if let Some(limit) = lookup("ORDER_RETRY_LIMIT").and_then(|s| s.trim().parse().ok()) {
            self.retry_limit = limit;
        }
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> QueueResult<()> {
        let url = Url::parse(&self.url)
            .map_err(|e| QueueError::Config(format!("invalid broker url: {}", e)))?;
        if !matches!(url.scheme(), "amqp" | "amqps") {
            return Err(QueueError::Config(format!(
                "broker url must use amqp or amqps, got '{}'",
                url.scheme()
            )));
        }
        if self.prefetch == 0 {
            return Err(QueueError::Config(
                "prefetch must be at least 1".to_string(),
            ));
        }
        let t = &self.topology;
        for (field, value) in [
            ("exchange", &t.exchange),
            ("queue", &t.queue),
            ("dead_letter_queue", &t.dead_letter_queue),
            ("routing_key", &t.routing_key),
        ] {
            if value.trim().is_empty() {
                return Err(QueueError::Config(format!("topology.{} is empty", field)));
            }
        }
        if t.queue == t.dead_letter_queue {
            return Err(QueueError::Config(
                "queue and dead_letter_queue must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Consumer settings for the primary queue.
    pub fn consumer_config(&self) -> ConsumerConfig {
        let mut config = ConsumerConfig::new(&self.topology.queue);
        if let Some(tag) = &self.consumer_tag {
            config.consumer_tag = tag.clone();
        }
        config.prefetch = self.prefetch;
        config.retry_limit = self.retry_limit;
        config.requeue_backoff = Duration::from_millis(self.requeue_backoff_ms);
        config
    }
}
