//! Request handlers.

use crate::error::{IntakeError, IntakeResult};
use crate::server::IntakeState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use order_domain::{Order, OrderItem};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

/// Body returned for any rejected submission.
pub const INVALID_ORDER_MESSAGE: &str = "Invalid order data";

/// A customer id as submitted. Numeric ids are kept as their decimal text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CustomerId {
    Text(String),
    Number(serde_json::Number),
}

impl CustomerId {
    fn into_text(self) -> String {
        match self {
            CustomerId::Text(text) => text,
            CustomerId::Number(number) => number.to_string(),
        }
    }
}

/// Untrusted order submission. Every field is optional until validated.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
    pub customer_id: Option<CustomerId>,
    pub customer_email: Option<String>,
    pub total: Option<f64>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    pub created_at: Option<DateTime<Utc>>,
}

impl OrderSubmission {
    /// Turn the submission into an order with a fresh producer id.
    pub fn into_order(self) -> IntakeResult<Order> {
        let customer_id = self
            .customer_id
            .map(CustomerId::into_text)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| IntakeError::InvalidOrder("customerId is required".to_string()))?;
        let total = self
            .total
            .ok_or_else(|| IntakeError::InvalidOrder("total is required".to_string()))?;

        let order = Order {
            order_id: Some(Uuid::new_v4()),
            customer_id,
            customer_email: self.customer_email,
            total,
            items: self.items,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        };
        order
            .validate()
            .map_err(|e| IntakeError::InvalidOrder(e.to_string()))?;
        Ok(order)
    }
}

/// `POST /order`
pub async fn create_order(
    State(state): State<IntakeState>,
    body: Bytes,
) -> IntakeResult<(StatusCode, Json<serde_json::Value>)> {
    let submission: OrderSubmission = serde_json::from_slice(&body).map_err(|e| {
        debug!(error = %e, "Rejected malformed order body");
        IntakeError::InvalidOrder(e.to_string())
    })?;
    let order = submission.into_order().inspect_err(|e| {
        debug!(error = %e, "Rejected order submission");
    })?;

    state.producer.publish(&state.routing_key, &order).await?;

    info!(
        order_id = ?order.order_id,
        customer_id = %order.customer_id,
        total = order.total,
        items = order.items.len(),
        "Order received"
    );
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Order received",
            "order": order,
        })),
    ))
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "order-intake",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(json: &str) -> OrderSubmission {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_valid_submission_gets_an_id() {
        let order = submission(r#"{"customerId":"c1","total":42.5}"#)
            .into_order()
            .unwrap();
        assert!(order.order_id.is_some());
        assert!(order.items.is_empty());
        assert_eq!(order.total, 42.5);
    }

    #[test]
    fn test_zero_total_is_accepted() {
        assert!(submission(r#"{"customerId":"c1","total":0}"#)
            .into_order()
            .is_ok());
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        assert!(submission(r#"{"total":1}"#).into_order().is_err());
        assert!(submission(r#"{"customerId":"  ","total":1}"#).into_order().is_err());
        assert!(submission(r#"{"customerId":"c1"}"#).into_order().is_err());
        assert!(submission(r#"{"customerId":"c1","total":-1}"#).into_order().is_err());
    }

    #[test]
    fn test_numeric_customer_id_is_kept_as_text() {
        let order = submission(r#"{"customerId":123,"total":1}"#)
            .into_order()
            .unwrap();
        assert_eq!(order.customer_id, "123");
    }

    #[test]
    fn test_non_scalar_customer_id_is_not_a_submission() {
        assert!(serde_json::from_str::<OrderSubmission>(r#"{"customerId":true,"total":1}"#).is_err());
        assert!(serde_json::from_str::<OrderSubmission>(r#"{"customerId":{},"total":1}"#).is_err());
    }

    #[test]
    fn test_negative_item_price_is_rejected() {
        let result = submission(
            r#"{"customerId":"c1","total":1,"items":[{"name":"a","price":-2}]}"#,
        )
        .into_order();
        assert!(matches!(result, Err(IntakeError::InvalidOrder(_))));
    }

    #[test]
    fn test_client_order_id_is_ignored() {
        let order = submission(
            r#"{"orderId":"00000000-0000-4000-8000-000000000000","customerId":"c1","total":1}"#,
        )
        .into_order()
        .unwrap();
        assert_ne!(order.order_id, Some(Uuid::nil()));
        assert_ne!(
            order.order_id.map(|id| id.to_string()).as_deref(),
            Some("00000000-0000-4000-8000-000000000000")
        );
    }
}
