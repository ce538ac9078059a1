//! The order payload and its wire encoding.

use crate::{DecodeError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A single line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Item name
    pub name: String,
    /// Unit price, non-negative
    pub price: f64,
}

/// An order as it travels through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Producer-assigned identifier, the source of the idempotency key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    /// Opaque customer identifier.
    pub customer_id: String,
    /// Only read by the notification side; the store still requires it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    /// Order total, non-negative.
    pub total: f64,
    /// Line items in submission order. May be empty.
    #[serde(default)]
    pub items: Vec<OrderItem>,
    /// Enqueue time when the submitter did not provide one.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Create an order stamped with the current time and no producer id.
    pub fn new(customer_id: impl Into<String>, total: f64) -> Self {
        Self {
            order_id: None,
            customer_id: customer_id.into(),
            customer_email: None,
            total,
            items: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a producer-assigned identifier.
    pub fn with_order_id(mut self, order_id: Uuid) -> Self {
        self.order_id = Some(order_id);
        self
    }

    /// Attach the customer email.
    pub fn with_customer_email(mut self, email: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self
    }

    /// Append a line item.
    pub fn with_item(mut self, name: impl Into<String>, price: f64) -> Self {
        self.items.push(OrderItem {
            name: name.into(),
            price,
        });
        self
    }

    /// Check the minimal schema enforced at the consumer boundary.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.customer_id.trim().is_empty() {
            return Err(ValidationError::MissingCustomerId);
        }
        if !self.total.is_finite() || self.total < 0.0 {
            return Err(ValidationError::InvalidTotal(self.total));
        }
        for (index, item) in self.items.iter().enumerate() {
            if !item.price.is_finite() || item.price < 0.0 {
                return Err(ValidationError::InvalidItemPrice {
                    index,
                    price: item.price,
                });
            }
        }
        Ok(())
    }

    /// Decode a message body, rejecting anything that is not a valid order.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let order: Order = serde_json::from_slice(body)?;
        order.validate()?;
        Ok(order)
    }

    /// Encode as UTF-8 JSON.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deterministic deduplication key derived from the producer id.
    ///
    /// Orders without an `order_id` have no key and are never deduplicated.
    pub fn idempotency_key(&self) -> Option<String> {
        self.order_id
            .map(|id| hex::encode(Sha256::digest(format!("order:{}", id.as_hyphenated()))))
    }
}
