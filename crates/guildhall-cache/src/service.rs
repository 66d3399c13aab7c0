//! Fail-open typed cache primitives.
//!
//! ## Failure Policy
//!
//! Every store error is caught, counted and logged here. Reads degrade to a
//! miss, writes to `false`, counts to `0`. Callers always fall back to the
//! source of truth, so cache unavailability costs latency, never correctness.
//!
//! ## Encoding
//!
//! Values are always stored as JSON text (strings included), so a stored
//! `"42"` and a stored `42` stay distinguishable. Payloads written by other
//! clients that are not JSON come back as [`Value::String`].

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::CacheConfig;
use crate::error::StoreError;
use crate::keys::{KeyPattern, is_pattern};
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::store::{KeyValueStore, TTL_MISSING};

/// Result of a store health probe.
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub healthy: bool,
    pub backend: &'static str,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn KeyValueStore>,
    metrics: Arc<CacheMetrics>,
    default_ttl_secs: u64,
    scan_batch_size: usize,
}

impl CacheService {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            metrics: Arc::new(CacheMetrics::new("remote")),
            default_ttl_secs: config.default_ttl_secs,
            scan_batch_size: config.scan_batch_size,
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn default_ttl_secs(&self) -> u64 {
        self.default_ttl_secs
    }

    fn record_error(&self, op: &str, key: &str, e: &StoreError) {
        self.metrics.record_error();
        tracing::warn!(op, key = %key, error = %e, "cache operation failed");
    }

    /// Get and decode a value. Any failure is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_json(key).await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Get a value as JSON, falling back to a raw string for non-JSON payloads.
    pub async fn get_json(&self, key: &str) -> Option<Value> {
        match self.store.get(key).await {
            Ok(Some(raw)) => {
                tracing::debug!(key = %key, "cache hit");
                self.metrics.record_hit();
                Some(decode(raw))
            }
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
                self.metrics.record_miss();
                None
            }
            Err(e) => {
                self.record_error("get", key, &e);
                None
            }
        }
    }

    /// Store a value as JSON with `ttl_secs`, or the configured default TTL.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> bool {
        if key.is_empty() {
            tracing::warn!("refusing to cache under an empty key");
            return false;
        }
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(e) => {
                self.record_error("set", key, &StoreError::from(e));
                return false;
            }
        };
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        match self.store.set(key, &payload, Some(ttl)).await {
            Ok(()) => {
                tracing::debug!(key = %key, ttl_secs = ttl, "cache set");
                self.metrics.record_set();
                true
            }
            Err(e) => {
                self.record_error("set", key, &e);
                false
            }
        }
    }

    /// True iff the key existed and was removed.
    pub async fn delete(&self, key: &str) -> bool {
        match self.store.del(&[key.to_string()]).await {
            Ok(removed) => {
                self.metrics.record_deletes(removed);
                removed > 0
            }
            Err(e) => {
                self.record_error("delete", key, &e);
                false
            }
        }
    }

    /// Delete every key matching a glob, scanning in bounded batches.
    ///
    /// Not atomic: keys created after the scan passes their slot survive.
    /// Patterns outside the active namespace are refused.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        if !KeyPattern::is_in_namespace(pattern) {
            tracing::warn!(pattern = %pattern, "refusing pattern outside the cache namespace");
            return 0;
        }
        let mut cursor = 0;
        let mut removed = 0;
        loop {
            let (next, keys) = match self.store.scan(cursor, pattern, self.scan_batch_size).await {
                Ok(step) => step,
                Err(e) => {
                    self.record_error("delete_pattern", pattern, &e);
                    break;
                }
            };
            if !keys.is_empty() {
                match self.store.del(&keys).await {
                    Ok(n) => removed += n,
                    Err(e) => {
                        self.record_error("delete_pattern", pattern, &e);
                        break;
                    }
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        self.metrics.record_deletes(removed);
        tracing::debug!(pattern = %pattern, removed, "cache pattern deleted");
        removed
    }

    /// Route to [`Self::delete_pattern`] when the target holds a wildcard,
    /// otherwise to [`Self::delete`]. Returns the number of keys removed.
    pub async fn evict(&self, target: &str) -> u64 {
        if is_pattern(target) {
            self.delete_pattern(target).await
        } else {
            u64::from(self.delete(target).await)
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.store.exists(key).await.unwrap_or_else(|e| {
            self.record_error("exists", key, &e);
            false
        })
    }

    /// Remaining seconds, `-1` without expiry, `-2` when absent (or on error).
    pub async fn ttl(&self, key: &str) -> i64 {
        self.store.ttl(key).await.unwrap_or_else(|e| {
            self.record_error("ttl", key, &e);
            TTL_MISSING
        })
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        self.store.expire(key, ttl_secs).await.unwrap_or_else(|e| {
            self.record_error("expire", key, &e);
            false
        })
    }

    /// Atomic counter increment. `None` on error.
    pub async fn increment(&self, key: &str, by: i64) -> Option<i64> {
        match self.store.incr_by(key, by).await {
            Ok(v) => Some(v),
            Err(e) => {
                self.record_error("increment", key, &e);
                None
            }
        }
    }

    /// Append to the tail of a list. Returns the new length, 0 on error.
    pub async fn list_push<T: Serialize>(&self, key: &str, values: &[T]) -> u64 {
        let encoded = match encode_all(values) {
            Ok(v) => v,
            Err(e) => {
                self.record_error("list_push", key, &e);
                return 0;
            }
        };
        self.store.list_push(key, &encoded).await.unwrap_or_else(|e| {
            self.record_error("list_push", key, &e);
            0
        })
    }

    /// Remove and return the head of a list.
    pub async fn list_pop<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.list_pop(key).await {
            Ok(raw) => raw.and_then(|r| decode_as(key, r)),
            Err(e) => {
                self.record_error("list_pop", key, &e);
                None
            }
        }
    }

    pub async fn list_range<T: DeserializeOwned>(&self, key: &str, start: i64, stop: i64) -> Vec<T> {
        match self.store.list_range(key, start, stop).await {
            Ok(raw) => raw.into_iter().filter_map(|r| decode_as(key, r)).collect(),
            Err(e) => {
                self.record_error("list_range", key, &e);
                Vec::new()
            }
        }
    }

    /// Returns the number of members newly added.
    pub async fn set_add<T: Serialize>(&self, key: &str, members: &[T]) -> u64 {
        let encoded = match encode_all(members) {
            Ok(v) => v,
            Err(e) => {
                self.record_error("set_add", key, &e);
                return 0;
            }
        };
        self.store.set_add(key, &encoded).await.unwrap_or_else(|e| {
            self.record_error("set_add", key, &e);
            0
        })
    }

    pub async fn set_remove<T: Serialize>(&self, key: &str, members: &[T]) -> u64 {
        let encoded = match encode_all(members) {
            Ok(v) => v,
            Err(e) => {
                self.record_error("set_remove", key, &e);
                return 0;
            }
        };
        self.store.set_remove(key, &encoded).await.unwrap_or_else(|e| {
            self.record_error("set_remove", key, &e);
            0
        })
    }

    pub async fn set_members<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        match self.store.set_members(key).await {
            Ok(raw) => raw.into_iter().filter_map(|r| decode_as(key, r)).collect(),
            Err(e) => {
                self.record_error("set_members", key, &e);
                Vec::new()
            }
        }
    }

    /// Administrative: remove every key in the active namespace.
    pub async fn flush(&self) -> bool {
        if let Err(e) = self.store.ping().await {
            self.record_error("flush", &KeyPattern::namespace(), &e);
            return false;
        }
        let removed = self.delete_pattern(&KeyPattern::namespace()).await;
        tracing::info!(removed, "cache namespace flushed");
        true
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub async fn health(&self) -> CacheHealth {
        let started = Instant::now();
        let result = self.store.ping().await;
        CacheHealth {
            healthy: result.is_ok(),
            backend: self.store.backend(),
            latency_ms: started.elapsed().as_millis() as u64,
            error: result.err().map(|e| e.to_string()),
        }
    }
}

pub(crate) fn decode(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn decode_as<T: DeserializeOwned>(key: &str, raw: String) -> Option<T> {
    match serde_json::from_value(decode(raw)) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "cached member has unexpected shape");
            None
        }
    }
}

fn encode_all<T: Serialize>(values: &[T]) -> Result<Vec<String>, StoreError> {
    values
        .iter()
        .map(|v| serde_json::to_string(v).map_err(StoreError::from))
        .collect()
}
