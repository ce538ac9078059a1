//! Error types for order decoding and validation.

use thiserror::Error;

/// An order violated the minimal schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `customerId` missing or empty
    #[error("customerId is required")]
    MissingCustomerId,

    /// `total` is negative, NaN or infinite
    #[error("total must be a finite, non-negative number (got {0})")]
    InvalidTotal(f64),

    /// An item price is negative, NaN or infinite
    #[error("item {index} has an invalid price ({price})")]
    InvalidItemPrice {
        /// Position of the item in the order
        index: usize,
        /// Offending price
        price: f64,
    },
}

/// A payload could not be turned into a valid [`crate::Order`].
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Body is not JSON or does not match the order shape
    #[error("malformed order payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Body parsed but failed validation
    #[error("invalid order: {0}")]
    Invalid(#[from] ValidationError),
}
