//! Event name to key generator registry.

use std::sync::Arc;

use dashmap::DashMap;

use super::events::{InvalidationEvent, default_keys};
use crate::error::KeyError;
use crate::fallback::FallbackCache;
use crate::keys::CacheCategory;
use crate::metrics;
use crate::service::CacheService;

/// Produces the keys and patterns an event makes stale.
pub type KeyGenerator = Arc<dyn Fn(&InvalidationEvent) -> Result<Vec<String>, KeyError> + Send + Sync>;

/// Maps event names to key generators and evicts what they produce.
///
/// Strings holding a wildcard are removed with a SCAN-based pattern delete,
/// everything else with a single DEL. The returned count is what the store
/// actually removed. An attached [`FallbackCache`] has the same targets
/// dropped from its local tier, so an outage never resurrects stale data.
pub struct InvalidationEngine {
    cache: CacheService,
    fallback: Option<Arc<FallbackCache>>,
    rules: DashMap<String, KeyGenerator>,
}

impl InvalidationEngine {
    /// Engine with no rules.
    pub fn new(cache: CacheService) -> Self {
        Self {
            cache,
            fallback: None,
            rules: DashMap::new(),
        }
    }

    /// Also evict every target from `fallback`'s local tier.
    pub fn with_fallback(mut self, fallback: Arc<FallbackCache>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Engine with a rule for every built-in event.
    pub fn with_default_rules(cache: CacheService) -> Self {
        let engine = Self::new(cache);
        for name in InvalidationEvent::BUILT_IN {
            engine.add_rule(name, default_keys);
        }
        engine
    }

    /// Register (or replace) the generator for `name`.
    pub fn add_rule<F>(&self, name: impl Into<String>, generator: F)
    where
        F: Fn(&InvalidationEvent) -> Result<Vec<String>, KeyError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.rules.insert(name.clone(), Arc::new(generator)).is_some() {
            tracing::debug!(event = %name, "replaced invalidation rule");
        }
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        self.rules.remove(name).is_some()
    }

    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn rule_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rules.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Run the rule registered for the event. Returns the number of keys removed.
    pub async fn invalidate(&self, event: &InvalidationEvent) -> u64 {
        let name = event.name();
        // Clone the generator out so no map guard is held across awaits
        let Some(generator) = self.rules.get(name).map(|r| r.value().clone()) else {
            tracing::warn!(event = %name, "no invalidation rule registered for event");
            return 0;
        };

        let targets = match generator(event) {
            Ok(targets) => targets,
            Err(e) => {
                tracing::warn!(event = %name, error = %e, "invalidation rule produced an invalid key");
                return 0;
            }
        };

        let mut removed = 0;
        for target in &targets {
            removed += self.cache.evict(target).await;
            if let Some(fallback) = &self.fallback {
                fallback.evict_local(target);
            }
        }

        metrics::record_invalidation(name, removed);
        tracing::debug!(event = %name, targets = targets.len(), removed, "cache invalidated");
        removed
    }

    pub async fn invalidate_user(&self, user_id: &str) -> u64 {
        self.invalidate(&InvalidationEvent::user_updated(user_id)).await
    }

    pub async fn invalidate_clan(&self, clan_id: &str) -> u64 {
        self.invalidate(&InvalidationEvent::clan_updated(clan_id)).await
    }

    pub async fn invalidate_federation(&self, federation_id: &str) -> u64 {
        self.invalidate(&InvalidationEvent::federation_updated(federation_id)).await
    }

    pub async fn invalidate_category(&self, category: CacheCategory) -> u64 {
        self.invalidate(&InvalidationEvent::CategoryFlush { category }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::keys::CacheKey;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn engine() -> (CacheService, InvalidationEngine) {
        let cache = CacheService::new(Arc::new(InMemoryStore::new()), &CacheConfig::default());
        let engine = InvalidationEngine::with_default_rules(cache.clone());
        (cache, engine)
    }

    #[tokio::test]
    async fn test_unknown_event_returns_zero() {
        let (cache, engine) = engine();
        cache.set("v1:chat:1", &1, None).await;
        assert_eq!(engine.invalidate(&InvalidationEvent::custom("chat.purged", json!({}))).await, 0);
        assert!(cache.exists("v1:chat:1").await);
    }

    #[tokio::test]
    async fn test_custom_rule_reads_payload() {
        let (cache, engine) = engine();
        engine.add_rule("chat.purged", |event| match event {
            InvalidationEvent::Custom { data, .. } => {
                let room = data["room"].as_str().unwrap_or_default();
                Ok(vec![CacheKey::chat(room)?.with_suffix("*").to_string()])
            }
            _ => Ok(Vec::new()),
        });
        cache.set("v1:chat:lobby:recent", &1, None).await;
        cache.set("v1:chat:lobby:pinned", &1, None).await;
        cache.set("v1:chat:other:recent", &1, None).await;

        let event = InvalidationEvent::custom("chat.purged", json!({"room": "lobby"}));
        assert_eq!(engine.invalidate(&event).await, 2);
        assert!(cache.exists("v1:chat:other:recent").await);

        // Missing room yields an empty identifier, which the key builder rejects
        assert_eq!(engine.invalidate(&InvalidationEvent::custom("chat.purged", json!({}))).await, 0);
    }

    #[tokio::test]
    async fn test_count_is_removed_not_requested() {
        let (cache, engine) = engine();
        cache.set("v1:clan:5", &1, None).await;
        assert_eq!(engine.invalidate_clan("5").await, 1);
        assert_eq!(engine.invalidate_clan("5").await, 0);
    }

    #[tokio::test]
    async fn test_rule_registry() {
        let (_, engine) = engine();
        assert!(engine.has_rule("clan.updated"));
        assert_eq!(engine.rule_names().len(), InvalidationEvent::BUILT_IN.len());
        assert!(engine.remove_rule("clan.updated"));
        assert!(!engine.remove_rule("clan.updated"));
        assert_eq!(engine.invalidate_clan("5").await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_category() {
        let (cache, engine) = engine();
        cache.set("v1:voice:room1", &1, None).await;
        cache.set("v1:voice:room2", &1, None).await;
        cache.set("v1:user:1", &1, None).await;
        assert_eq!(engine.invalidate_category(CacheCategory::Voice).await, 2);
        assert!(cache.exists("v1:user:1").await);
    }

    #[tokio::test]
    async fn test_invalidation_reaches_fallback_tier() {
        let store = Arc::new(InMemoryStore::new());
        let config = CacheConfig::default();
        let cache = CacheService::new(store.clone(), &config);
        let fallback = Arc::new(FallbackCache::new(store.clone(), &config));
        let engine = InvalidationEngine::with_default_rules(cache).with_fallback(fallback.clone());

        fallback.set("v1:clan:77", &json!({"v": 0}), None).await;
        fallback.set("v1:clan:list:p1", &json!([]), None).await;
        assert_eq!(engine.invalidate_clan("77").await, 2);

        // Once the store is gone, the local tier must not bring them back
        store.set_available(false);
        assert_eq!(fallback.get_json("v1:clan:77").await, None);
        assert_eq!(fallback.get_json("v1:clan:list:p1").await, None);
        assert!(!fallback.is_remote_available());
    }
}
