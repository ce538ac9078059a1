//! Order queue: moves orders from the HTTP boundary to the store through a
//! message broker, with bounded retry and a dead-letter fallback.
//!
//! # Core Invariants
//!
//! 1. **At-Least-Once**: a delivery is acknowledged only after the order is
//!    persisted, a retry copy is accepted by the broker, or it is dead-lettered
//! 2. **Explicit Retry Counter**: `x-retry-count` travels with the message and
//!    grows by exactly one per resubmission
//! 3. **Bounded Retry**: a delivery at the retry limit is rejected into the
//!    dead-letter queue, never resubmitted
//! 4. **One In-Flight**: prefetch 1 caps each worker at one persistence attempt
//! 5. **Loop Survives Poison**: processing failures are logged and resolved,
//!    never propagated out of the worker loop
//!
//! # Architecture
//!
//! ```text
//! Producer -> orders_exchange --order_created--> order --> Consumer -> Store
//!                                                  ^  |         |
//!                                                  |  |  retry  |
//!                                                  |__|_________|
//!                                                     | reject at limit
//!                                                     v
//!                                                 order_dlq
//! ```

pub mod amqp;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod headers;
pub mod memory;
pub mod producer;
pub mod topology;

#[cfg(test)]
mod tests;

pub use amqp::AmqpBroker;
pub use broker::{Broker, DeliveryStream, Envelope, ExchangeSpec, OutgoingMessage, QueueSpec};
pub use config::BrokerConfig;
pub use consumer::{ConsumerConfig, ConsumerHandle, OrderConsumer, ProcessingOutcome, RETRY_LIMIT};
pub use error::{QueueError, QueueResult};
pub use memory::{MemoryBroker, QueuedMessage, TopologySnapshot};
pub use producer::OrderProducer;
pub use topology::{Topology, TopologyManager};
