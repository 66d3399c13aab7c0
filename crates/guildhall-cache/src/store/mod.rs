//! Key-value store adapters.
//!
//! [`KeyValueStore`] is the narrow slice of the Redis command set the engine
//! relies on. Values are opaque strings; JSON encoding happens one layer up in
//! [`crate::CacheService`].
//!
//! - [`RedisStore`]: deadpool-redis pool, any Redis-protocol server
//! - [`InMemoryStore`]: per-process map with the same TTL and glob semantics,
//!   used when Redis is disabled or unreachable at startup, and in tests

pub mod memory;
pub mod redis;

pub use memory::InMemoryStore;
pub use self::redis::RedisStore;
pub(crate) use memory::glob_to_regex;

use async_trait::async_trait;

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// `TTL` reply for a key without expiry.
pub const TTL_PERSISTENT: i64 = -1;

/// `TTL` reply for an absent key.
pub const TTL_MISSING: i64 = -2;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short backend name for logs and stats ("redis", "memory").
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// `SET key value [EX ttl]`
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()>;

    /// `SET key value NX EX ttl`. Returns whether the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<bool>;

    /// `DEL key [key ...]`. Returns the number of keys removed.
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    /// Delete the key only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Remaining seconds, [`TTL_PERSISTENT`] or [`TTL_MISSING`].
    async fn ttl(&self, key: &str) -> StoreResult<i64>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<bool>;

    async fn incr_by(&self, key: &str, by: i64) -> StoreResult<i64>;

    /// `RPUSH`. Returns the new list length.
    async fn list_push(&self, key: &str, values: &[String]) -> StoreResult<u64>;

    /// `LPOP`
    async fn list_pop(&self, key: &str) -> StoreResult<Option<String>>;

    /// `LRANGE` with Redis index semantics (negative counts from the tail).
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    /// `SADD`. Returns the number of members added.
    async fn set_add(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    /// `SREM`. Returns the number of members removed.
    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// One `SCAN cursor MATCH pattern COUNT count` step. A returned cursor of
    /// zero ends the iteration.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
    -> StoreResult<(u64, Vec<String>)>;

    async fn ping(&self) -> StoreResult<()>;

    /// Reclaim expired entries the backend does not expire on its own.
    /// Returns the number removed. Redis expires keys itself.
    fn purge_expired(&self) -> usize {
        0
    }
}
