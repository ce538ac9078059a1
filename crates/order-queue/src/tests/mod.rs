//! Behaviour tests for the order queue, run against the memory broker
//! unless noted.
//!
//! - `harness.rs`      - scripted store and pipeline fixture
//! - `topology.rs`     - declaration idempotence and conflicts
//! - `delivery.rs`     - success path, duplicates, ack once
//! - `retry.rs`        - retry counter propagation and republish failure
//! - `dead_letter.rs`  - retry ceiling and dead-letter routing
//! - `lifecycle.rs`    - start/stop, crash redelivery, broker loss
//! - `backpressure.rs` - prefetch limits in-flight work
//! - `scenarios.rs`    - end-to-end flows through the running loop
//! - `rabbitmq.rs`     - the AMQP backend against a live broker (ignored)

mod dead_letter;
mod delivery;
mod lifecycle;
