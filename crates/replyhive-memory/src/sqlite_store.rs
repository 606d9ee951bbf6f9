use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::clock::{Clock, SystemClock};
use crate::migrations::run_migrations;
use crate::store::{StoreError, StoreResult, TtlStore};

/// SQLite-backed store; survives restarts of the operator CLI.
#[derive(Clone)]
pub struct SqliteTtlStore {
    db: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteTtlStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating store dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening store {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    /// Drop rows whose expiry has passed. Returns how many were removed.
    pub async fn purge_expired(&self) -> StoreResult<usize> {
        let now_ms = self.now_ms();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM kv WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?1",
                params![now_ms],
            )
            .map_err(StoreError::unavailable)
        })
        .await
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::unavailable("failed to lock sqlite connection"))?;
            f(&conn)
        })
        .await
        .map_err(StoreError::unavailable)?
    }
}

#[async_trait]
impl TtlStore for SqliteTtlStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_owned();
        let now_ms = self.now_ms();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM kv WHERE key = ?1 AND (expires_at_ms IS NULL OR expires_at_ms > ?2)",
                params![key, now_ms],
                |r| r.get::<_, String>(0),
            )
            .optional()
            .map_err(StoreError::unavailable)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let key = key.to_owned();
        let value = value.to_owned();
        let now_ms = self.now_ms();
        // Out-of-range TTLs store no expiry.
        let expires_at_ms = ttl.and_then(|t| {
            i64::try_from(t.as_millis())
                .ok()
                .and_then(|ms| now_ms.checked_add(ms))
        });
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO kv(key, value, expires_at_ms) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at_ms = excluded.expires_at_ms
                "#,
                params![key, value, expires_at_ms],
            )
            .map(|_| ())
            .map_err(StoreError::unavailable)
        })
        .await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map(|_| ())
                .map_err(StoreError::unavailable)
        })
        .await
    }

    async fn scan(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let prefix = prefix.to_owned();
        let now_ms = self.now_ms();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT key FROM kv
                    WHERE substr(key, 1, length(?1)) = ?1
                      AND (expires_at_ms IS NULL OR expires_at_ms > ?2)
                    ORDER BY key
                    "#,
                )
                .map_err(StoreError::unavailable)?;
            let rows = stmt
                .query_map(params![prefix, now_ms], |r| r.get::<_, String>(0))
                .map_err(StoreError::unavailable)?;
            let mut keys = Vec::new();
            for row in rows {
                keys.push(row.map_err(StoreError::unavailable)?);
            }
            Ok(keys)
        })
        .await
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let key = key.to_owned();
        let now_ms = self.now_ms();
        self.with_conn(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(StoreError::unavailable)?;
            let existing: Option<(String, Option<i64>)> = tx
                .query_row(
                    "SELECT value, expires_at_ms FROM kv WHERE key = ?1 AND (expires_at_ms IS NULL OR expires_at_ms > ?2)",
                    params![key, now_ms],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
                .map_err(StoreError::unavailable)?;
            let (current, expires_at_ms) = match existing {
                Some((raw, exp)) => {
                    let n = raw.parse::<i64>().map_err(|e| StoreError::Malformed {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
                    (n, exp)
                }
                None => (0, None),
            };
            let next = current + 1;
            tx.execute(
                r#"
                INSERT INTO kv(key, value, expires_at_ms) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at_ms = excluded.expires_at_ms
                "#,
                params![key, next.to_string(), expires_at_ms],
            )
            .map_err(StoreError::unavailable)?;
            tx.commit().map_err(StoreError::unavailable)?;
            Ok(next)
        })
        .await
    }
}
