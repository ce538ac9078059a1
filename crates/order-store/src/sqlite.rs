//! SQLite-backed order store.

use crate::{
    OrderStore, SaveOutcome, SqliteExecutor, StoreError, StoreResult, StoredOrder,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use order_domain::{Order, OrderItem};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Order store writing one row per order plus its items, in one transaction.
#[derive(Clone)]
pub struct SqliteOrderStore {
    db: SqliteExecutor,
}

/// Raw column values before conversion into domain types.
struct OrderRow {
    row_id: i64,
    idempotency_key: Option<String>,
    order_id: Option<String>,
    customer_id: String,
    customer_email: String,
    total: f64,
    created_at: String,
    persisted_at: String,
}

const ORDER_COLUMNS: &str = "id, idempotency_key, order_id, customer_id, customer_email, \
                             total, created_at, persisted_at";

impl SqliteOrderStore {
    /// Open (or create) the store at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let db = SqliteExecutor::open(path).await?;
        Ok(Self { db })
    }

    /// Open a throwaway in-memory store.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let db = SqliteExecutor::open_in_memory().await?;
        Ok(Self { db })
    }

    /// Wrap an already-open executor.
    pub fn from_executor(db: SqliteExecutor) -> Self {
        Self { db }
    }

    /// Verify the executor thread still answers.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.db.health_check().await
    }

    /// Number of persisted orders.
    pub async fn count_orders(&self) -> StoreResult<u64> {
        self.db
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
    }

    /// Look up an order by idempotency key.
    pub async fn get_order(&self, idempotency_key: &str) -> StoreResult<Option<StoredOrder>> {
        let key = idempotency_key.to_string();
        self.db
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM orders WHERE idempotency_key = ?1",
                            ORDER_COLUMNS
                        ),
                        params![key],
                        map_order_row,
                    )
                    .optional()?;
                row.map(|row| hydrate(conn, row)).transpose()
            })
            .await
    }

    /// Most recently persisted orders, newest first.
    pub async fn list_recent(&self, limit: usize) -> StoreResult<Vec<StoredOrder>> {
        self.db
            .call(move |conn| {
                let rows = {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM orders ORDER BY id DESC LIMIT ?1",
                        ORDER_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map(params![limit as i64], map_order_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                };
                rows.into_iter().map(|row| hydrate(conn, row)).collect()
            })
            .await
    }

    /// Stop the executor thread after pending writes drain.
    pub async fn close(self) -> StoreResult<()> {
        self.db.close().await
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn save(&self, order: &Order) -> StoreResult<SaveOutcome> {
        let email = check_store_rules(order)?;

        let key = order.idempotency_key();
        let order_id = order.order_id.map(|id| id.to_string());
        let customer_id = order.customer_id.clone();
        let total = order.total;
        let created_at = order.created_at.to_rfc3339();
        let items = order.items.clone();

        let outcome = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let inserted = tx.execute(
                    "INSERT INTO orders
                        (idempotency_key, order_id, customer_id, customer_email,
                         total, created_at, persisted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(idempotency_key) DO NOTHING",
                    params![
                        key,
                        order_id,
                        customer_id,
                        email,
                        total,
                        created_at,
                        Utc::now().to_rfc3339(),
                    ],
                )?;

                if inserted == 0 {
                    return Ok(SaveOutcome::Duplicate);
                }

                let row_id = tx.last_insert_rowid();
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO order_items (order_row_id, position, name, price)
                         VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for (position, item) in items.iter().enumerate() {
                        stmt.execute(params![row_id, position as i64, item.name, item.price])?;
                    }
                }
                tx.commit()?;
                Ok(SaveOutcome::Inserted)
            })
            .await?;

        match outcome {
            SaveOutcome::Inserted => {
                info!(customer_id = %order.customer_id, items = order.items.len(), "Order persisted")
            }
            SaveOutcome::Duplicate => {
                debug!(customer_id = %order.customer_id, "Order already persisted, skipping")
            }
        }
        Ok(outcome)
    }
}

/// Schema rules the durable record requires, stricter than the wire schema.
///
/// Returns the customer email, which must be present here.
fn check_store_rules(order: &Order) -> StoreResult<String> {
    if order.customer_id.trim().is_empty() {
        return Err(StoreError::Validation("customerId is required".into()));
    }
    let email = match order.customer_email.as_deref().map(str::trim) {
        Some(email) if !email.is_empty() => email.to_string(),
        _ => {
            warn!(customer_id = %order.customer_id, "Order rejected: customerEmail missing");
            return Err(StoreError::Validation("customerEmail is required".into()));
        }
    };
    if !order.total.is_finite() || order.total < 0.0 {
        return Err(StoreError::Validation(format!(
            "total must be a finite, non-negative number (got {})",
            order.total
        )));
    }
    for (index, item) in order.items.iter().enumerate() {
        if item.name.trim().is_empty() {
            return Err(StoreError::Validation(format!("item {} has no name", index)));
        }
        if !item.price.is_finite() || item.price < 0.0 {
            return Err(StoreError::Validation(format!(
                "item {} has an invalid price ({})",
                index, item.price
            )));
        }
    }
    Ok(email)
}

fn map_order_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrderRow> {
    Ok(OrderRow {
        row_id: row.get(0)?,
        idempotency_key: row.get(1)?,
        order_id: row.get(2)?,
        customer_id: row.get(3)?,
        customer_email: row.get(4)?,
        total: row.get(5)?,
        created_at: row.get(6)?,
        persisted_at: row.get(7)?,
    })
}

fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("bad timestamp {:?}: {}", value, e)))
}

/// Load items and convert a raw row into a [`StoredOrder`].
fn hydrate(conn: &Connection, row: OrderRow) -> StoreResult<StoredOrder> {
    let mut stmt = conn.prepare(
        "SELECT name, price FROM order_items WHERE order_row_id = ?1 ORDER BY position",
    )?;
    let items = stmt
        .query_map(params![row.row_id], |r| {
            Ok(OrderItem {
                name: r.get(0)?,
                price: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let order_id = row
        .order_id
        .as_deref()
        .map(Uuid::parse_str)
        .transpose()
        .map_err(|e| StoreError::InvalidData(format!("bad order id: {}", e)))?;

    Ok(StoredOrder {
        row_id: row.row_id,
        idempotency_key: row.idempotency_key,
        order: Order {
            order_id,
            customer_id: row.customer_id,
            customer_email: Some(row.customer_email),
            total: row.total,
            items,
            created_at: parse_timestamp(&row.created_at)?,
        },
        persisted_at: parse_timestamp(&row.persisted_at)?,
    })
}
