//! Remote cache client with a local fallback tier.
//!
//! ## Modes
//!
//! - **Remote available**: reads go to the store; writes go to the store and
//!   are mirrored into the [`LocalCache`]
//! - **Remote unavailable**: entered when a remote call fails because the
//!   store cannot be reached; reads and writes are served by the local map
//!   only. Error replies (wrong type, rejected command) leave the mode alone
//!
//! The maintenance task sweeps expired local records and pings the store;
//! a successful ping switches back to remote mode.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::CacheConfig;
use crate::error::StoreError;
use crate::keys::is_pattern;
use crate::local::LocalCache;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::service::decode;
use crate::store::{KeyValueStore, glob_to_regex};

pub struct FallbackCache {
    store: Arc<dyn KeyValueStore>,
    local: LocalCache,
    metrics: CacheMetrics,
    remote_available: AtomicBool,
    default_ttl: Duration,
}

impl FallbackCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            local: LocalCache::new(config.local_max_entries),
            metrics: CacheMetrics::new("fallback"),
            remote_available: AtomicBool::new(true),
            default_ttl: config.default_ttl(),
        }
    }

    pub fn is_remote_available(&self) -> bool {
        self.remote_available.load(Ordering::SeqCst)
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    /// Count a failed remote call. Only an unreachable store switches to
    /// local mode: any other error means the store answered.
    fn record_failure(&self, op: &str, key: &str, e: &StoreError) {
        self.metrics.record_error();
        if !e.is_unavailable() {
            tracing::warn!(op, key = %key, error = %e, "remote cache operation failed");
            return;
        }
        if self.remote_available.swap(false, Ordering::SeqCst) {
            tracing::warn!(op, key = %key, error = %e, "remote cache unavailable, serving from local fallback");
        } else {
            tracing::debug!(op, key = %key, error = %e, "remote cache still unavailable");
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_json(key).await?;
        serde_json::from_value(value)
            .inspect_err(|e| tracing::warn!(key = %key, error = %e, "cached value has unexpected shape"))
            .ok()
    }

    pub async fn get_json(&self, key: &str) -> Option<Value> {
        if self.is_remote_available() {
            match self.store.get(key).await {
                Ok(Some(raw)) => {
                    self.metrics.record_hit();
                    return Some(decode(raw));
                }
                Ok(None) => {
                    self.metrics.record_miss();
                    return None;
                }
                Err(e) => {
                    self.record_failure("get", key, &e);
                    if !e.is_unavailable() {
                        return None;
                    }
                }
            }
        }

        match self.local.get(key) {
            Some(value) => {
                tracing::debug!(key = %key, "cache hit (local fallback)");
                self.metrics.record_hit();
                Some(value)
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Mirror into the local map, then write through to the store when it is
    /// reachable. Returns false only when the value cannot be encoded.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to encode value for cache");
                self.metrics.record_error();
                return false;
            }
        };
        let ttl = ttl_secs.map_or(self.default_ttl, Duration::from_secs);
        let payload = value.to_string();
        self.local.set(key, value, ttl);
        self.metrics.record_set();

        if self.is_remote_available()
            && let Err(e) = self.store.set(key, &payload, Some(ttl.as_secs())).await
        {
            self.record_failure("set", key, &e);
            if !e.is_unavailable() {
                // The store kept whatever it held; a local copy would diverge
                self.local.delete(key);
            }
        }
        true
    }

    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = self.local.delete(key);
        if self.is_remote_available() {
            match self.store.del(&[key.to_string()]).await {
                Ok(n) => removed |= n > 0,
                Err(e) => self.record_failure("delete", key, &e),
            }
        }
        self.metrics.record_deletes(u64::from(removed));
        removed
    }

    /// Drop local records for an invalidation target: one key, or every key
    /// matching a glob. Returns the number of records removed.
    pub fn evict_local(&self, target: &str) -> u64 {
        if !is_pattern(target) {
            return u64::from(self.local.delete(target));
        }
        match glob_to_regex(target) {
            Ok(matcher) => self.local.delete_where(|key| matcher.is_match(key)),
            Err(e) => {
                tracing::warn!(pattern = %target, error = %e, "invalid local eviction pattern");
                0
            }
        }
    }

    /// Ping the store and update the availability flag.
    pub async fn probe_remote(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => {
                if !self.remote_available.swap(true, Ordering::SeqCst) {
                    tracing::info!("remote cache reachable again, leaving local fallback mode");
                }
                true
            }
            Err(e) => {
                if self.remote_available.swap(false, Ordering::SeqCst) {
                    tracing::warn!(error = %e, "remote cache ping failed, entering local fallback mode");
                }
                false
            }
        }
    }

    /// One maintenance pass: sweep expired local records and probe the store.
    pub async fn maintain(&self) {
        let removed = self.local.sweep_expired();
        if removed > 0 {
            tracing::debug!(removed, "local fallback sweep completed");
        }
        self.probe_remote().await;
    }

    pub fn start_maintenance(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.maintain().await;
            }
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}
