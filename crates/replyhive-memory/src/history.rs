use std::sync::Arc;
use std::time::Duration;

use replyhive_schema::HistoryEntry;

use crate::store::{get_json, set_json, StoreResult, TtlStore};

pub const HISTORY_PREFIX: &str = "history:";

pub fn history_key(contact_id: &str) -> String {
    format!("{HISTORY_PREFIX}{contact_id}")
}

/// Bounded per-contact conversation log kept in the TTL store.
///
/// Appends are read-modify-write; two concurrent appends for the same
/// contact may lose one entry.
#[derive(Clone)]
pub struct ConversationLog {
    store: Arc<dyn TtlStore>,
    max_entries: usize,
    ttl: Option<Duration>,
}

impl ConversationLog {
    pub fn new(store: Arc<dyn TtlStore>, max_entries: usize, ttl: Option<Duration>) -> Self {
        Self {
            store,
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub async fn append(&self, contact_id: &str, entry: HistoryEntry) -> StoreResult<()> {
        let key = history_key(contact_id);
        let mut entries: Vec<HistoryEntry> = get_json(self.store.as_ref(), &key)
            .await?
            .unwrap_or_default();
        entries.push(entry);
        if entries.len() > self.max_entries {
            let overflow = entries.len() - self.max_entries;
            entries.drain(..overflow);
        }
        set_json(self.store.as_ref(), &key, &entries, self.ttl).await
    }

    /// Up to `limit` most recent entries, oldest first.
    pub async fn recent(&self, contact_id: &str, limit: usize) -> StoreResult<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = get_json(self.store.as_ref(), &history_key(contact_id))
            .await?
            .unwrap_or_default();
        if entries.len() > limit {
            let overflow = entries.len() - limit;
            entries.drain(..overflow);
        }
        Ok(entries)
    }

    pub async fn clear(&self, contact_id: &str) -> StoreResult<()> {
        self.store.delete(&history_key(contact_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryTtlStore;
    use chrono::Utc;

    fn entry(text: &str) -> HistoryEntry {
        HistoryEntry {
            speaker: "contact".into(),
            text: text.into(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_trims_to_max_entries() {
        let log = ConversationLog::new(Arc::new(MemoryTtlStore::new()), 3, None);
        for i in 0..5 {
            log.append("c1", entry(&format!("m{i}"))).await.unwrap();
        }
        let all = log.recent("c1", 10).await.unwrap();
        let texts: Vec<_> = all.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn recent_returns_tail_in_order() {
        let log = ConversationLog::new(Arc::new(MemoryTtlStore::new()), 10, None);
        for i in 0..4 {
            log.append("c1", entry(&format!("m{i}"))).await.unwrap();
        }
        let tail = log.recent("c1", 2).await.unwrap();
        assert_eq!(tail[0].text, "m2");
        assert_eq!(tail[1].text, "m3");
        assert!(log.recent("other", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_drops_history() {
        let log = ConversationLog::new(Arc::new(MemoryTtlStore::new()), 10, None);
        log.append("c1", entry("hi")).await.unwrap();
        log.clear("c1").await.unwrap();
        assert!(log.recent("c1", 5).await.unwrap().is_empty());
    }
}
