//! Order Store Adapter for the ingestion pipeline.
//!
//! This crate provides:
//! - [`OrderStore`]: the narrow seam the consumer calls to persist an order
//! - [`SqliteOrderStore`]: SQLite implementation with idempotent inserts
//! - [`SqliteExecutor`]: async SQLite executor on a dedicated thread
//! - Versioned schema migrations
//!
//! The consumer treats the store as a black box: any failure surfaces as a
//! [`StoreError`] and routes the message into the retry path. An order is
//! either durably stored (order row and all items in one transaction) or not
//! stored at all.

mod error;
mod executor;
mod migrations;
mod models;
mod sqlite;
mod store;

pub use error::{StoreError, StoreResult};
pub use executor::SqliteExecutor;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::StoredOrder;
pub use sqlite::SqliteOrderStore;
pub use store::{OrderStore, SaveOutcome};
