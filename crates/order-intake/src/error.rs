//! Intake errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

/// Intake error type.
#[derive(Error, Debug)]
pub enum IntakeError {
    /// The submission failed validation
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// The producer could not hand the order to the broker
    #[error("Publish failed: {0}")]
    Publish(#[from] order_queue::QueueError),

    /// Listener error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for intake operations.
pub type IntakeResult<T> = Result<T, IntakeError>;

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        // Details stay in the log; callers get a fixed message.
        let (status, message) = match &self {
            IntakeError::InvalidOrder(_) => {
                (StatusCode::BAD_REQUEST, crate::INVALID_ORDER_MESSAGE)
            }
            IntakeError::Publish(_) | IntakeError::Io(_) => {
                error!(error = %self, "Error processing order");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
