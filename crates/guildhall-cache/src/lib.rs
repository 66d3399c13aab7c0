//! Cache layer for Guildhall.
//!
//! ## Components
//!
//! - [`keys`]: versioned `v1:{category}:{id}[:{suffix}]` key builder
//! - [`CacheService`]: fail-open typed primitives over a [`KeyValueStore`]
//! - [`FallbackCache`]: remote client that keeps serving from a bounded local
//!   map while the store is down
//! - [`InvalidationEngine`] / [`InvalidationQueue`]: domain events to evictions
//! - [`PresenceTracker`]: TTL-based online state with heartbeat renewal
//! - [`CacheLock`]: advisory `SET NX EX` lock
//!
//! ## Graceful Degradation
//!
//! If Redis is disabled or unreachable at startup, [`CacheContext::connect`]
//! runs everything on the in-process [`InMemoryStore`]. Failures after startup
//! are absorbed by the fail-open primitives.

pub mod config;
pub mod error;
pub mod fallback;
pub mod invalidation;
pub mod keys;
pub mod local;
pub mod lock;
pub mod metrics;
pub mod presence;
pub mod service;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

pub use config::{CacheConfig, EngineConfig, PresenceConfig, RedisConfig};
pub use error::{KeyError, StoreError};
pub use fallback::FallbackCache;
pub use invalidation::{InvalidationEngine, InvalidationEvent, InvalidationQueue};
pub use keys::{
    CacheCategory, CacheKey, KEY_VERSION, KeyPattern, ParsedKey, ROUTE_SEGMENT, escape_glob, is_pattern,
    is_valid_key, parse_key,
};
pub use local::LocalCache;
pub use lock::{CacheLock, LockGuard};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use presence::{PresenceTracker, SweepReport};
pub use service::{CacheHealth, CacheService};
pub use store::{InMemoryStore, KeyValueStore, RedisStore};

/// Owned service graph for one process.
///
/// Built once at startup and handed to whoever needs it; nothing in this
/// crate is global.
pub struct CacheContext {
    pub cache: CacheService,
    pub fallback: Arc<FallbackCache>,
    pub invalidation: Arc<InvalidationEngine>,
    pub queue: InvalidationQueue,
    pub presence: Arc<PresenceTracker>,
    pub lock: CacheLock,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheContext {
    /// Connect to the configured store and start the background tasks.
    pub async fn connect(config: &EngineConfig) -> Self {
        let store = create_store(&config.redis).await;
        Self::with_store(store, config)
    }

    /// Build on an existing store. Must be called inside a tokio runtime.
    pub fn with_store(store: Arc<dyn KeyValueStore>, config: &EngineConfig) -> Self {
        let cache = CacheService::new(store.clone(), &config.cache);
        let fallback = Arc::new(FallbackCache::new(store.clone(), &config.cache));
        let invalidation = Arc::new(
            InvalidationEngine::with_default_rules(cache.clone()).with_fallback(fallback.clone()),
        );
        let (queue, worker) =
            InvalidationQueue::start(invalidation.clone(), config.cache.invalidation_queue_size);
        let presence = Arc::new(PresenceTracker::new(cache.clone(), &config.presence));

        let tasks = vec![
            worker,
            fallback.clone().start_maintenance(config.cache.local_sweep_interval()),
            presence.clone().start_heartbeat(),
            start_store_purge(store.clone(), config.cache.local_sweep_interval()),
        ];

        tracing::info!(backend = store.backend(), "cache context ready");

        Self {
            cache,
            fallback,
            invalidation,
            queue,
            presence,
            lock: CacheLock::new(store),
            tasks: Mutex::new(tasks),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.cache.store().backend()
    }

    /// Stop every background task. Operations still in flight fail open.
    pub fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        tracing::info!("cache context shut down");
    }
}

impl Drop for CacheContext {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Periodically reclaim expired entries from stores that only expire lazily.
fn start_store_purge(store: Arc<dyn KeyValueStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.purge_expired();
            if removed > 0 {
                tracing::debug!(backend = store.backend(), removed, "expired store entries purged");
            }
        }
    })
}

/// Create the store for `config`, falling back to [`InMemoryStore`] when
/// Redis is disabled, misconfigured or not answering.
pub async fn create_store(config: &RedisConfig) -> Arc<dyn KeyValueStore> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-process cache store");
        return Arc::new(InMemoryStore::new());
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let store = match RedisStore::from_config(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create Redis pool. Falling back to in-process store.");
            return Arc::new(InMemoryStore::new());
        }
    };

    match store.ping().await {
        Ok(()) => {
            tracing::info!("Connected to Redis");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to connect to Redis. Falling back to in-process store.");
            Arc::new(InMemoryStore::new())
        }
    }
}
