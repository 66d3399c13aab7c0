//! Bounded in-process cache used while the remote store is unreachable.
//!
//! Eviction is by insertion order (oldest inserted first), not LRU.
//! Expired records are removed lazily on `get` and by
//! [`LocalCache::sweep_expired`], which the fallback maintenance task runs.

use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct LocalRecord {
    value: Value,
    expires_at: Instant,
}

impl LocalRecord {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

pub struct LocalCache {
    records: Mutex<IndexMap<String, LocalRecord>>,
    max_entries: usize,
}

impl LocalCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            records: Mutex::new(IndexMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut records = self.records.lock();
        let record = records.get(key)?;
        if record.is_expired(Instant::now()) {
            records.shift_remove(key);
            return None;
        }
        Some(record.value.clone())
    }

    /// Insert or replace a record. Replacing keeps the original insertion
    /// slot, so a hot key is still evicted in its first-inserted order.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let mut records = self.records.lock();
        records.insert(
            key.to_string(),
            LocalRecord {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        while records.len() > self.max_entries {
            if let Some((evicted, _)) = records.shift_remove_index(0) {
                tracing::debug!(key = %evicted, "local cache evicted oldest entry");
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.records.lock().shift_remove(key).is_some()
    }

    /// Remove every key for which `matches` returns true.
    pub fn delete_where(&self, matches: impl Fn(&str) -> bool) -> u64 {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|k, _| !matches(k));
        (before - records.len()) as u64
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired records. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        let removed = before - records.len();
        crate::metrics::set_local_entries(records.len());
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_get_expires_lazily() {
        let cache = LocalCache::new(10);
        cache.set("a", json!(1), Duration::from_secs(5));
        assert_eq!(cache.get("a"), Some(json!(1)));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_evicts_oldest_inserted() {
        let cache = LocalCache::new(3);
        for key in ["a", "b", "c"] {
            cache.set(key, json!(key), Duration::from_secs(60));
        }
        // Touching "a" does not protect it: eviction is FIFO, not LRU
        assert!(cache.get("a").is_some());
        cache.set("a", json!("a2"), Duration::from_secs(60));
        cache.set("d", json!("d"), Duration::from_secs(60));

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a"), None);
        assert!(cache.get("b").is_some());
        assert!(cache.get("d").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired() {
        let cache = LocalCache::new(10);
        cache.set("short", json!(1), Duration::from_secs(1));
        cache.set("long", json!(2), Duration::from_secs(120));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_where() {
        let cache = LocalCache::new(10);
        cache.set("v1:clan:1", json!(1), Duration::from_secs(60));
        cache.set("v1:clan:2", json!(1), Duration::from_secs(60));
        cache.set("v1:user:1", json!(1), Duration::from_secs(60));
        assert_eq!(cache.delete_where(|k| k.starts_with("v1:clan:")), 2);
        assert!(cache.delete("v1:user:1"));
        assert!(cache.is_empty());
    }
}
