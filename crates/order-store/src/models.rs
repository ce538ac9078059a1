//! Row types returned by store queries.

use chrono::{DateTime, Utc};
use order_domain::Order;

/// An order as persisted, with store-assigned metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    /// Store-assigned row id
    pub row_id: i64,
    /// Deduplication key, if the order carried a producer id
    pub idempotency_key: Option<String>,
    /// The persisted order
    pub order: Order,
    /// When the row was written
    pub persisted_at: DateTime<Utc>,
}
