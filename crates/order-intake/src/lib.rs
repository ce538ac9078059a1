//! HTTP boundary for order submission.
//!
//! `POST /order` validates an untrusted body, stamps it with an order id and
//! hands it to the producer. `GET /health` reports liveness. The boundary is
//! stateless; everything durable happens behind the broker.

mod error;
mod handlers;
mod server;

pub use error::{IntakeError, IntakeResult};
pub use handlers::{CustomerId, OrderSubmission, INVALID_ORDER_MESSAGE};
pub use server::{router, serve, IntakeState};
