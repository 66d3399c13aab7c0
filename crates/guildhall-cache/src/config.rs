use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for everything the engine owns, embedded in the server's
/// `AppConfig` under `[redis]`, `[cache]` and `[presence]`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.redis.enabled && self.redis.url.is_empty() {
            return Err("redis.enabled=true requires redis.url".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.cache.default_ttl_secs == 0 {
            return Err("cache.default_ttl_secs must be > 0".into());
        }
        if self.cache.local_max_entries == 0 {
            return Err("cache.local_max_entries must be > 0".into());
        }
        if self.cache.local_sweep_interval_secs == 0 {
            return Err("cache.local_sweep_interval_secs must be > 0".into());
        }
        if self.cache.scan_batch_size == 0 {
            return Err("cache.scan_batch_size must be > 0".into());
        }
        if self.presence.ttl_secs == 0 {
            return Err("presence.ttl_secs must be > 0".into());
        }
        if self.presence.heartbeat_interval_secs == 0
            || self.presence.heartbeat_interval_secs >= self.presence.ttl_secs
        {
            return Err("presence.heartbeat_interval_secs must be > 0 and < presence.ttl_secs".into());
        }
        if self.cache.invalidation_queue_size == 0 {
            return Err("cache.invalidation_queue_size must be > 0".into());
        }
        Ok(())
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades to the in-process store without it)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Cache primitive and local fallback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Keys requested per SCAN round trip in pattern deletes
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Local fallback cache max entries
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,

    /// Local fallback sweep (and remote reconnect probe) interval
    #[serde(default = "default_local_sweep_interval_secs")]
    pub local_sweep_interval_secs: u64,

    /// Capacity of the background invalidation queue
    #[serde(default = "default_invalidation_queue_size")]
    pub invalidation_queue_size: usize,
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_scan_batch_size() -> usize {
    500
}

fn default_local_max_entries() -> usize {
    1000
}

fn default_local_sweep_interval_secs() -> u64 {
    60
}

fn default_invalidation_queue_size() -> usize {
    1024
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn local_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.local_sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            scan_batch_size: default_scan_batch_size(),
            local_max_entries: default_local_max_entries(),
            local_sweep_interval_secs: default_local_sweep_interval_secs(),
            invalidation_queue_size: default_invalidation_queue_size(),
        }
    }
}

/// Presence and session tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Lifetime of a presence record without renewal
    #[serde(default = "default_presence_ttl_secs")]
    pub ttl_secs: u64,

    /// Heartbeat sweep interval, must be shorter than `ttl_secs`
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_presence_ttl_secs() -> u64 {
    300
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

impl PresenceConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_presence_ttl_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}
