//! Advisory lock on a `v1:lock:{name}` key.
//!
//! Acquire is `SET NX EX` with a random token; release deletes the key only
//! while it still holds that token. There is no fencing: a holder that outlives
//! the TTL can overlap with the next one.

use std::sync::Arc;
use std::time::Duration;

use crate::keys::CacheKey;
use crate::store::KeyValueStore;

/// Proof of a successful acquire. Pass back to [`CacheLock::release`].
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    token: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Clone)]
pub struct CacheLock {
    store: Arc<dyn KeyValueStore>,
}

impl CacheLock {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Take the lock for at most `ttl` (rounded up to whole seconds). `None`
    /// when it is held elsewhere or the store is unreachable.
    pub async fn try_acquire(&self, name: &str, ttl: Duration) -> Option<LockGuard> {
        let key = match CacheKey::lock(name) {
            Ok(key) => key.to_string(),
            Err(e) => {
                tracing::warn!(lock = %name, error = %e, "invalid lock name");
                return None;
            }
        };
        let ttl_secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        let token = uuid::Uuid::new_v4().to_string();

        match self.store.set_if_absent(&key, &token, ttl_secs.max(1)).await {
            Ok(true) => {
                tracing::debug!(key = %key, ttl_secs, "lock acquired");
                Some(LockGuard { key, token })
            }
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "lock acquire failed");
                None
            }
        }
    }

    /// Release if still held by `guard`. False when it already expired or was
    /// taken over.
    pub async fn release(&self, guard: LockGuard) -> bool {
        match self.store.delete_if_equals(&guard.key, &guard.token).await {
            Ok(released) => {
                if !released {
                    tracing::debug!(key = %guard.key, "lock expired before release");
                }
                released
            }
            Err(e) => {
                tracing::warn!(key = %guard.key, error = %e, "lock release failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let lock = CacheLock::new(Arc::new(InMemoryStore::new()));
        let guard = lock.try_acquire("leaderboard", Duration::from_secs(30)).await.unwrap();
        assert_eq!(guard.key(), "v1:lock:leaderboard");
        assert!(lock.try_acquire("leaderboard", Duration::from_secs(30)).await.is_none());
        assert!(lock.try_acquire("other", Duration::from_secs(30)).await.is_some());

        assert!(lock.release(guard).await);
        assert!(lock.try_acquire("leaderboard", Duration::from_secs(30)).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_holder_releases() {
        let store = Arc::new(InMemoryStore::new());
        let lock = CacheLock::new(store.clone());
        let stale = lock.try_acquire("job", Duration::from_millis(1500)).await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        let current = lock.try_acquire("job", Duration::from_secs(30)).await.unwrap();
        assert_ne!(stale.token(), current.token());

        assert!(!lock.release(stale).await);
        assert!(store.exists("v1:lock:job").await.unwrap());
        assert!(lock.release(current).await);
    }

    #[tokio::test]
    async fn test_unavailable_store_never_grants() {
        let store = Arc::new(InMemoryStore::new());
        store.set_available(false);
        let lock = CacheLock::new(store);
        assert!(lock.try_acquire("job", Duration::from_secs(5)).await.is_none());
        assert!(lock.try_acquire("bad:name", Duration::from_secs(5)).await.is_none());
    }
}
