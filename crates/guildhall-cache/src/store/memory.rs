//! In-process store with Redis-compatible TTL and glob semantics.
//!
//! Expiry uses the tokio clock so paused-time tests can advance past TTLs.
//! An availability switch simulates the store becoming unreachable.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use tokio::time::Instant;

use super::{KeyValueStore, StoreResult, TTL_MISSING, TTL_PERSISTENT};
use crate::error::StoreError;

#[derive(Debug, Clone)]
enum StoredValue {
    Str(String),
    List(VecDeque<String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: StoredValue, ttl_secs: Option<u64>) -> Self {
        Self {
            value,
            expires_at: ttl_secs.map(|s| Instant::now() + Duration::from_secs(s)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    data: DashMap<String, Entry>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }

    /// Drop the key if it has expired, then report whether it is still live.
    fn purge_if_expired(&self, key: &str) -> bool {
        let now = Instant::now();
        self.data.remove_if(key, |_, e| e.is_expired(now));
        self.data.contains_key(key)
    }

    fn get_live(&self, key: &str) -> Option<Entry> {
        if !self.purge_if_expired(key) {
            return None;
        }
        self.data.get(key).map(|e| e.clone())
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        match self.get_live(key).map(|e| e.value) {
            None => Ok(None),
            Some(StoredValue::Str(s)) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()> {
        self.check_available()?;
        self.data.insert(
            key.to_string(),
            Entry::new(StoredValue::Str(value.to_string()), ttl_secs),
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<bool> {
        self.check_available()?;
        self.purge_if_expired(key);
        let mut written = false;
        self.data.entry(key.to_string()).or_insert_with(|| {
            written = true;
            Entry::new(StoredValue::Str(value.to_string()), Some(ttl_secs))
        });
        Ok(written)
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        self.check_available()?;
        let removed = keys
            .iter()
            .filter(|k| self.purge_if_expired(k) && self.data.remove(k.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.check_available()?;
        self.purge_if_expired(key);
        let removed = self
            .data
            .remove_if(key, |_, e| matches!(&e.value, StoredValue::Str(s) if s == expected));
        Ok(removed.is_some())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.purge_if_expired(key))
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        self.check_available()?;
        let Some(entry) = self.get_live(key) else {
            return Ok(TTL_MISSING);
        };
        Ok(match entry.expires_at {
            None => TTL_PERSISTENT,
            // Redis rounds the remaining milliseconds to the nearest second
            Some(at) => {
                let remaining = at.saturating_duration_since(Instant::now());
                ((remaining.as_millis() + 500) / 1000) as i64
            }
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<bool> {
        self.check_available()?;
        if !self.purge_if_expired(key) {
            return Ok(false);
        }
        Ok(match self.data.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                true
            }
            None => false,
        })
    }

    async fn incr_by(&self, key: &str, by: i64) -> StoreResult<i64> {
        self.check_available()?;
        self.purge_if_expired(key);
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(StoredValue::Str("0".into()), None));
        let StoredValue::Str(current) = &entry.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        let current: i64 = current
            .parse()
            .map_err(|_| StoreError::Command("value is not an integer".into()))?;
        let next = current
            .checked_add(by)
            .ok_or_else(|| StoreError::Command("increment would overflow".into()))?;
        entry.value = StoredValue::Str(next.to_string());
        Ok(next)
    }

    async fn list_push(&self, key: &str, values: &[String]) -> StoreResult<u64> {
        self.check_available()?;
        self.purge_if_expired(key);
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(StoredValue::List(VecDeque::new()), None));
        let StoredValue::List(list) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        list.extend(values.iter().cloned());
        Ok(list.len() as u64)
    }

    async fn list_pop(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        if !self.purge_if_expired(key) {
            return Ok(None);
        }
        let (popped, now_empty) = match self.data.get_mut(key) {
            Some(mut entry) => {
                let StoredValue::List(list) = &mut entry.value else {
                    return Err(StoreError::WrongType(key.to_string()));
                };
                let popped = list.pop_front();
                (popped, list.is_empty())
            }
            None => (None, false),
        };
        // Redis deletes empty aggregates
        if now_empty {
            self.data.remove(key);
        }
        Ok(popped)
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let Some(entry) = self.get_live(key) else {
            return Ok(Vec::new());
        };
        let StoredValue::List(list) = entry.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        let len = list.len() as i64;
        let norm = |i: i64| if i < 0 { len + i } else { i };
        let start = norm(start).max(0);
        let stop = norm(stop).min(len - 1);
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(list
            .into_iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .collect())
    }

    async fn set_add(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        self.check_available()?;
        self.purge_if_expired(key);
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(StoredValue::Set(HashSet::new()), None));
        let StoredValue::Set(set) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        Ok(members.iter().filter(|m| set.insert((*m).clone())).count() as u64)
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        self.check_available()?;
        if !self.purge_if_expired(key) {
            return Ok(0);
        }
        let (removed, now_empty) = match self.data.get_mut(key) {
            Some(mut entry) => {
                let StoredValue::Set(set) = &mut entry.value else {
                    return Err(StoreError::WrongType(key.to_string()));
                };
                let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
                (removed, set.is_empty())
            }
            None => (0, false),
        };
        if now_empty {
            self.data.remove(key);
        }
        Ok(removed as u64)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check_available()?;
        match self.get_live(key).map(|e| e.value) {
            None => Ok(Vec::new()),
            Some(StoredValue::Set(set)) => Ok(set.into_iter().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        self.check_available()?;
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();

        // The cursor is a hash slot threshold, so keys deleted between steps
        // never shift the keys that are still pending.
        let mut pending: Vec<(u64, String)> = self
            .data
            .iter()
            .filter(|e| !e.is_expired(now))
            .map(|e| (slot(e.key()), e.key().clone()))
            .filter(|(s, _)| *s >= cursor)
            .collect();
        pending.sort_unstable();

        let take = count.max(1);
        let next = pending.get(take).map_or(0, |(s, _)| *s);
        let batch = pending
            .into_iter()
            .take(take)
            .map(|(_, k)| k)
            .filter(|k| matcher.is_match(k))
            .collect();
        Ok((next, batch))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.data.retain(|_, e| {
            let expired = e.is_expired(now);
            removed += usize::from(expired);
            !expired
        });
        removed
    }
}

/// Stable, never-zero scan slot for a key.
fn slot(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish().max(1)
}

/// Translate a Redis glob (`*`, `?`, `[...]`, `\` escapes) into an anchored
/// regular expression.
pub(crate) fn glob_to_regex(pattern: &str) -> StoreResult<Regex> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    re.push('^');
                }
                let mut closed = false;
                for c in chars.by_ref() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | '&' | '~' => {
                            re.push('\\');
                            re.push(c);
                        }
                        _ => re.push(c),
                    }
                }
                if !closed {
                    return Err(StoreError::Command(format!("unterminated '[' in pattern '{pattern}'")));
                }
                re.push(']');
            }
            _ => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| StoreError::Command(format!("invalid pattern '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_reclaims_untouched_expired_entries() {
        let store = InMemoryStore::new();
        for i in 0..1000 {
            store.set(&format!("v1:stats:q{i}"), "1", Some(1)).await.unwrap();
        }
        store.set("v1:stats:kept", "1", Some(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.purge_expired(), 1000);
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_glob_translation() {
        let re = glob_to_regex("v1:clan:*").unwrap();
        assert!(re.is_match("v1:clan:77"));
        assert!(re.is_match("v1:clan:list:p1_l10"));
        assert!(!re.is_match("v1:user:77"));

        let re = glob_to_regex("v1:user:4?").unwrap();
        assert!(re.is_match("v1:user:42"));
        assert!(!re.is_match("v1:user:420"));

        let re = glob_to_regex("v1:user:[12]").unwrap();
        assert!(re.is_match("v1:user:1"));
        assert!(!re.is_match("v1:user:3"));

        let re = glob_to_regex("v1:user:[^12]").unwrap();
        assert!(re.is_match("v1:user:3"));

        let re = glob_to_regex(r"v1:config:a\*b").unwrap();
        assert!(re.is_match("v1:config:a*b"));
        assert!(!re.is_match("v1:config:axb"));

        assert!(glob_to_regex("v1:[abc").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_and_expiry() {
        let store = InMemoryStore::new();
        store.set("k", "v", Some(10)).await.unwrap();
        store.set("p", "v", None).await.unwrap();

        assert_eq!(store.ttl("k").await.unwrap(), 10);
        assert_eq!(store.ttl("p").await.unwrap(), TTL_PERSISTENT);
        assert_eq!(store.ttl("absent").await.unwrap(), TTL_MISSING);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), TTL_MISSING);
        assert!(store.exists("p").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_walks_every_key_in_batches() {
        let store = InMemoryStore::new();
        for i in 0..25 {
            store.set(&format!("v1:clan:{i}"), "x", None).await.unwrap();
        }
        store.set("v1:user:1", "x", None).await.unwrap();

        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch) = store.scan(cursor, "v1:clan:*", 10).await.unwrap();
            assert!(batch.len() <= 10);
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(found.len(), 25);
        assert!(found.iter().all(|k| k.starts_with("v1:clan:")));
    }

    #[tokio::test]
    async fn test_lists_and_sets() {
        let store = InMemoryStore::new();
        assert_eq!(store.list_push("l", &keys(&["a", "b", "c"])).await.unwrap(), 3);
        assert_eq!(store.list_range("l", 0, -1).await.unwrap(), keys(&["a", "b", "c"]));
        assert_eq!(store.list_range("l", -2, 10).await.unwrap(), keys(&["b", "c"]));
        assert_eq!(store.list_pop("l").await.unwrap().as_deref(), Some("a"));

        assert_eq!(store.set_add("s", &keys(&["x", "y", "x"])).await.unwrap(), 2);
        assert_eq!(store.set_remove("s", &keys(&["x", "z"])).await.unwrap(), 1);
        assert_eq!(store.set_members("s").await.unwrap(), keys(&["y"]));

        assert!(matches!(
            store.get("l").await,
            Err(StoreError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn test_conditional_writes() {
        let store = InMemoryStore::new();
        assert!(store.set_if_absent("lock", "a", 30).await.unwrap());
        assert!(!store.set_if_absent("lock", "b", 30).await.unwrap());
        assert!(!store.delete_if_equals("lock", "b").await.unwrap());
        assert!(store.delete_if_equals("lock", "a").await.unwrap());
        assert!(!store.exists("lock").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_switch() {
        let store = InMemoryStore::new();
        store.set_available(false);
        assert!(store.get("k").await.unwrap_err().is_unavailable());
        assert!(store.ping().await.is_err());
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
