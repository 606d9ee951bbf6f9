//! Key-value store with per-key expiry.
//!
//! Every operation is a single-key atomic step. Multi-key sequences built on
//! top of this trait are not transactional.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed value at {key}: {reason}")]
    Malformed { key: String, reason: String },
}

impl StoreError {
    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        Self::Unavailable(reason.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Current value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value. `ttl = None` keeps it until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Live keys starting with `prefix`, sorted.
    async fn scan(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Atomically increment an integer value (absent counts as 0) and return the new value.
    /// An existing expiry is preserved.
    async fn incr(&self, key: &str) -> StoreResult<i64>;
}

pub async fn get_json<T>(store: &dyn TtlStore, key: &str) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
{
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StoreError::Malformed {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

pub async fn set_json<T>(
    store: &dyn TtlStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> StoreResult<()>
where
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_string(value).map_err(|e| StoreError::Malformed {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.set(key, &raw, ttl).await
}
