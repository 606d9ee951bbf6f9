use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::store::{StoreError, StoreResult, TtlStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

/// Process-local store. Expiry follows the injected clock.
pub struct MemoryTtlStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryTtlStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Expiry instant of a live key, for inspection.
    pub async fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
    }

    /// A TTL past the representable range means no expiry at all.
    fn expiry_from(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl?).ok()?;
        self.clock.now().checked_add_signed(ttl)
    }
}

impl Default for MemoryTtlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = self.expiry_from(ttl);
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.is_live(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let (current, expires_at) = match entries.get(key).filter(|e| e.is_live(now)) {
            Some(entry) => {
                let n = entry
                    .value
                    .parse::<i64>()
                    .map_err(|e| StoreError::Malformed {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                (n, entry.expires_at)
            }
            None => (0, None),
        };
        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }
}
