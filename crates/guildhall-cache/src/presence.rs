//! User presence with TTL records and heartbeat renewal.
//!
//! ## Storage
//!
//! - `v1:user:{id}:presence`: session handle, expires after `presence.ttl_secs`
//! - `v1:session:online`: set of user ids, used only for enumeration
//!
//! A user is online exactly while the record exists. The online set can lag
//! behind expired records by up to one heartbeat interval; reads and sweeps
//! prune it.
//!
//! ## Renewal
//!
//! Each process remembers the sessions it opened and when they were last
//! active. The sweep re-extends records for sessions active within the TTL
//! window and forgets the rest, so a client that stops heartbeating goes
//! offline at most one TTL after its last renewal.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::PresenceConfig;
use crate::keys::{CacheCategory, CacheKey, KEY_VERSION};
use crate::metrics;
use crate::service::CacheService;

#[derive(Debug, Clone)]
struct LocalSession {
    last_seen: Instant,
}

/// Outcome of one [`PresenceTracker::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records whose TTL was extended.
    pub renewed: usize,
    /// Local sessions dropped for inactivity or a vanished record.
    pub dropped: usize,
    /// Users still listed online afterwards.
    pub online: usize,
}

pub struct PresenceTracker {
    cache: CacheService,
    sessions: DashMap<String, LocalSession>,
    ttl_secs: u64,
    heartbeat_interval: Duration,
}

impl PresenceTracker {
    pub fn new(cache: CacheService, config: &PresenceConfig) -> Self {
        Self {
            cache,
            sessions: DashMap::new(),
            ttl_secs: config.ttl_secs,
            heartbeat_interval: config.heartbeat_interval(),
        }
    }

    fn record_key(user_id: &str) -> Option<String> {
        match CacheKey::user(user_id) {
            Ok(key) => Some(key.with_suffix("presence").to_string()),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "invalid presence user id");
                None
            }
        }
    }

    fn online_set_key() -> String {
        format!("{KEY_VERSION}:{}:online", CacheCategory::Session)
    }

    /// Mark a user online with the given session handle.
    pub async fn set_online(&self, user_id: &str, handle: &str) -> bool {
        let Some(key) = Self::record_key(user_id) else {
            return false;
        };
        let stored = self.cache.set(&key, handle, Some(self.ttl_secs)).await;
        self.cache.set_add(&Self::online_set_key(), &[user_id]).await;
        self.sessions.insert(
            user_id.to_string(),
            LocalSession {
                last_seen: Instant::now(),
            },
        );
        tracing::debug!(user_id = %user_id, "user online");
        stored
    }

    /// Rewrite the record with a fresh TTL. False when the user already went
    /// offline (the record is gone).
    pub async fn heartbeat(&self, user_id: &str) -> bool {
        let Some(key) = Self::record_key(user_id) else {
            return false;
        };
        let Some(handle) = self.cache.get::<String>(&key).await else {
            self.sessions.remove(user_id);
            return false;
        };
        let renewed = self.cache.set(&key, &handle, Some(self.ttl_secs)).await;
        // A sweep may have dropped an idle user from the set while the record lived on
        self.cache.set_add(&Self::online_set_key(), &[user_id]).await;
        self.sessions.insert(
            user_id.to_string(),
            LocalSession {
                last_seen: Instant::now(),
            },
        );
        renewed
    }

    /// Note activity without a store round trip. The next sweep renews the
    /// record.
    pub fn record_activity(&self, user_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(user_id) {
            session.last_seen = Instant::now();
        }
    }

    /// Remove the record and the set membership.
    pub async fn set_offline(&self, user_id: &str) -> bool {
        self.sessions.remove(user_id);
        let Some(key) = Self::record_key(user_id) else {
            return false;
        };
        let removed = self.cache.delete(&key).await;
        self.cache.set_remove(&Self::online_set_key(), &[user_id]).await;
        tracing::debug!(user_id = %user_id, "user offline");
        removed
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        match Self::record_key(user_id) {
            Some(key) => self.cache.exists(&key).await,
            None => false,
        }
    }

    pub async fn get_handle(&self, user_id: &str) -> Option<String> {
        let key = Self::record_key(user_id)?;
        self.cache.get::<String>(&key).await
    }

    /// Users with a live record. Members whose record expired are pruned from
    /// the online set on the way.
    pub async fn list_online(&self) -> Vec<String> {
        let set_key = Self::online_set_key();
        let members: Vec<String> = self.cache.set_members(&set_key).await;
        let mut online = Vec::with_capacity(members.len());
        let mut stale = Vec::new();
        for user_id in members {
            if self.is_online(&user_id).await {
                online.push(user_id);
            } else {
                stale.push(user_id);
            }
        }
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "pruning expired users from online set");
            self.cache.set_remove(&set_key, &stale).await;
        }
        online.sort();
        metrics::set_presence_online(online.len());
        online
    }

    /// Renew records of recently active local sessions, drop idle ones and
    /// reconcile the online set. Safe to run concurrently with itself.
    pub async fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let window = Duration::from_secs(self.ttl_secs);
        let (active, idle): (Vec<_>, Vec<_>) = self
            .sessions
            .iter()
            .map(|s| (s.key().clone(), now.duration_since(s.last_seen) < window))
            .partition(|(_, active)| *active);

        let mut report = SweepReport::default();
        let mut forget = Vec::new();
        let mut renewed = Vec::new();

        for (user_id, _) in active {
            let Some(key) = Self::record_key(&user_id) else {
                continue;
            };
            if self.cache.expire(&key, self.ttl_secs).await {
                renewed.push(user_id);
            } else {
                forget.push(user_id);
            }
        }
        if !renewed.is_empty() {
            self.cache.set_add(&Self::online_set_key(), &renewed).await;
            report.renewed = renewed.len();
        }
        for (user_id, _) in idle {
            // Activity may have arrived since the snapshot
            if self
                .sessions
                .remove_if(&user_id, |_, s| now.duration_since(s.last_seen) >= window)
                .is_some()
            {
                forget.push(user_id);
            }
        }

        if !forget.is_empty() {
            for user_id in &forget {
                self.sessions.remove(user_id);
            }
            self.cache.set_remove(&Self::online_set_key(), &forget).await;
            report.dropped = forget.len();
        }

        report.online = self.list_online().await.len();
        tracing::debug!(
            renewed = report.renewed,
            dropped = report.dropped,
            online = report.online,
            "presence sweep completed"
        );
        report
    }

    /// Run [`Self::sweep`] every heartbeat interval until the handle is aborted.
    pub fn start_heartbeat(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::InMemoryStore;

    fn tracker() -> (CacheService, Arc<PresenceTracker>) {
        let cache = CacheService::new(Arc::new(InMemoryStore::new()), &CacheConfig::default());
        let tracker = Arc::new(PresenceTracker::new(cache.clone(), &PresenceConfig::default()));
        (cache, tracker)
    }

    #[tokio::test]
    async fn test_online_offline_cycle() {
        let (cache, presence) = tracker();
        assert!(presence.set_online("u1", "sock-abc").await);
        assert!(presence.is_online("u1").await);
        assert_eq!(presence.get_handle("u1").await.as_deref(), Some("sock-abc"));
        assert_eq!(presence.list_online().await, vec!["u1".to_string()]);
        assert_eq!(cache.ttl("v1:user:u1:presence").await, 300);

        assert!(presence.set_offline("u1").await);
        assert!(!presence.is_online("u1").await);
        assert!(presence.list_online().await.is_empty());
        assert!(!presence.heartbeat("u1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_refreshes_ttl() {
        let (cache, presence) = tracker();
        presence.set_online("u1", "sock-abc").await;
        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(cache.ttl("v1:user:u1:presence").await, 100);

        assert!(presence.heartbeat("u1").await);
        assert_eq!(cache.ttl("v1:user:u1:presence").await, 300);
        assert_eq!(presence.get_handle("u1").await.as_deref(), Some("sock-abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_online_prunes_expired_records() {
        let (cache, presence) = tracker();
        presence.set_online("u1", "a").await;
        presence.set_online("u2", "b").await;
        cache.delete("v1:user:u2:presence").await;

        assert_eq!(presence.list_online().await, vec!["u1".to_string()]);
        assert_eq!(cache.set_members::<String>("v1:session:online").await, vec!["u1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_renews_active_and_drops_idle() {
        let (cache, presence) = tracker();
        presence.set_online("active", "a").await;
        presence.set_online("idle", "b").await;

        tokio::time::advance(Duration::from_secs(250)).await;
        presence.record_activity("active");
        let report = presence.sweep().await;
        assert_eq!(report.renewed, 2);
        assert_eq!(cache.ttl("v1:user:idle:presence").await, 300);

        tokio::time::advance(Duration::from_secs(60)).await;
        let report = presence.sweep().await;
        assert_eq!(report.renewed, 1);
        assert_eq!(report.dropped, 1);
        // The idle record is left to lapse on its own TTL
        assert!(presence.is_online("idle").await);
        assert_eq!(report.online, 1);
        assert_eq!(presence.list_online().await, vec!["active".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_after_idle_drop_relists_user() {
        let (cache, presence) = tracker();
        presence.set_online("u1", "a").await;
        tokio::time::advance(Duration::from_secs(250)).await;
        presence.sweep().await;
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(presence.sweep().await.dropped, 1);
        assert!(presence.list_online().await.is_empty());

        assert!(presence.heartbeat("u1").await);
        assert_eq!(presence.list_online().await, vec!["u1".to_string()]);

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(60)).await;
            presence.record_activity("u1");
            let report = presence.sweep().await;
            assert_eq!(report.online, 1);
        }
        // Renewals also restore membership lost behind the tracker's back
        cache.set_remove("v1:session:online", &["u1"]).await;
        presence.sweep().await;
        assert_eq!(presence.list_online().await, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_user_id() {
        let (_, presence) = tracker();
        assert!(!presence.set_online("a:b", "x").await);
        assert!(!presence.is_online("").await);
        assert_eq!(presence.get_handle("a:b").await, None);
    }
}
