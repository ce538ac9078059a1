//! The store seam used by the consumer.

use crate::StoreResult;
use async_trait::async_trait;
use order_domain::Order;

/// What a successful `save` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new order row was written.
    Inserted,
    /// An order with the same idempotency key already exists; nothing written.
    Duplicate,
}

/// Durable destination for processed orders.
///
/// Implementations own their concurrency discipline (pooling, transactions).
/// Callers only learn whether the order is durably present.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist an order.
    async fn save(&self, order: &Order) -> StoreResult<SaveOutcome>;
}
