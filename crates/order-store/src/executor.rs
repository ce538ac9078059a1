//! Async SQLite executor using a dedicated background thread.
//!
//! All statements are sent over a channel to one thread that owns the
//! connection, so callers never block the Tokio runtime and writes execute in
//! FIFO order. Only SQL and row mapping belong inside [`SqliteExecutor::call`].

use crate::{migrations, StoreError, StoreResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to StoreError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => StoreError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => StoreError::Connection("Connection closed".to_string()),
        other => StoreError::Connection(other.to_string()),
    }
}

/// Async SQLite connection with a dedicated executor thread.
#[derive(Clone)]
pub struct SqliteExecutor {
    conn: Connection,
    path: String,
}

impl SqliteExecutor {
    /// Open a database file, enabling WAL and running pending migrations.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening order database");

        let conn = Connection::open(path)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let executor = Self {
            conn,
            path: path_str,
        };

        executor
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA synchronous = NORMAL;
                    PRAGMA foreign_keys = ON;
                    PRAGMA busy_timeout = 5000;
                    ",
                )?;
                migrations::run_migrations(conn)
            })
            .await?;

        info!(path = %executor.path, "Order database ready");
        Ok(executor)
    }

    /// Open an in-memory database. WAL does not apply here.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let executor = Self {
            conn,
            path: ":memory:".to_string(),
        };

        executor
            .call(|conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                migrations::run_migrations(conn)
            })
            .await?;

        Ok(executor)
    }

    /// Run a closure on the executor thread and await its result.
    pub async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // The closure's own StoreResult rides inside tokio_rusqlite's Ok.
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a trivial statement to prove the executor is alive.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.call(|conn| {
            conn.execute_batch("SELECT 1")?;
            Ok(())
        })
        .await?;
        debug!("Order database health check passed");
        Ok(())
    }

    /// Wait for queued statements, then stop the executor thread.
    pub async fn close(self) -> StoreResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Order database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("orders.db");

        let db = SqliteExecutor::open(&db_path).await.unwrap();
        assert!(db.health_check().await.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("orders.db");

        let db = SqliteExecutor::open(&db_path).await.unwrap();
        db.close().await.unwrap();

        let db = SqliteExecutor::open(&db_path).await.unwrap();
        let version: i32 = db
            .call(|conn| {
                Ok(conn.query_row("SELECT MAX(version) FROM migrations", [], |row| {
                    row.get(0)
                })?)
            })
            .await
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_serialized() {
        let db = SqliteExecutor::open_in_memory().await.unwrap();
        db.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE counter (id INTEGER PRIMARY KEY, val INTEGER);
                 INSERT INTO counter (val) VALUES (0);",
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let mut handles = vec![];
        for _ in 0..10 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.call(|conn| {
                    conn.execute("UPDATE counter SET val = val + 1 WHERE id = 1", [])?;
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let count: i32 = db
            .call(|conn| {
                Ok(conn.query_row("SELECT val FROM counter WHERE id = 1", [], |row| {
                    row.get(0)
                })?)
            })
            .await
            .unwrap();
        assert_eq!(count, 10);
    }
}
