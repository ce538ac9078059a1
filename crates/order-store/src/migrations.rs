//! Database migrations.
//!
//! Migrations run in order and are tracked in the `migrations` table.

use crate::StoreResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version >= CURRENT_VERSION {
        debug!(current_version, "Schema up to date");
        return Ok(());
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_orders(conn)?;
    }
    if current_version < 2 {
        migrate_v2_idempotency_key(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: orders and their line items.
fn migrate_v1_orders(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v1: orders");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id TEXT,
            customer_id TEXT NOT NULL,
            customer_email TEXT NOT NULL,
            total REAL NOT NULL,
            created_at TEXT NOT NULL,
            persisted_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS order_items (
            order_row_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            price REAL NOT NULL,
            PRIMARY KEY (order_row_id, position)
        );

        CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders(customer_id);
        ",
    )?;

    record_migration(conn, 1, "orders")
}

/// V2: deduplicate retried deliveries on the producer-assigned id.
fn migrate_v2_idempotency_key(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v2: idempotency key");

    conn.execute_batch(
        "
        ALTER TABLE orders ADD COLUMN idempotency_key TEXT;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_idempotency_key
            ON orders(idempotency_key);
        ",
    )?;

    record_migration(conn, 2, "idempotency_key")
}
