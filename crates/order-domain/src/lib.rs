//! Order model for the ingestion pipeline.
//!
//! An [`Order`] is created once at the HTTP boundary, published as UTF-8 JSON,
//! and never mutated afterwards. Consumers only ever decode it through
//! [`Order::decode`], which fails closed on malformed or out-of-schema
//! payloads.

mod error;
mod order;

pub use error::{DecodeError, ValidationError};
pub use order::{Order, OrderItem};
