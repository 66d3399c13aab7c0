//! Error types for the cache engine.
//!
//! None of these escape into business code: [`crate::CacheService`] and the
//! components built on it catch every [`StoreError`], count it and degrade to
//! "no cache" behavior.

/// Errors raised by a [`crate::store::KeyValueStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connection refused, pool exhausted, timeout or a dropped connection.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error reply.
    #[error("store command failed: {0}")]
    Command(String),

    /// Operation against a key holding the wrong kind of value.
    #[error("wrong value type for key '{0}'")]
    WrongType(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the error means the store itself could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error()
            || e.is_timeout()
            || e.is_connection_refusal()
            || e.is_connection_dropped()
        {
            StoreError::Unavailable(e.to_string())
        } else if e.kind() == redis::ErrorKind::TypeError || e.code() == Some("WRONGTYPE") {
            StoreError::WrongType(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors raised while building or parsing cache keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("key identifier must not be empty")]
    Empty,

    #[error("key identifier '{0}' must not contain ':'")]
    ContainsSeparator(String),

    #[error("key identifier '{0}' must not contain glob characters")]
    ContainsGlob(String),

    #[error("key '{0}' has fewer than 3 segments")]
    TooFewSegments(String),

    #[error("unknown key category '{0}'")]
    UnknownCategory(String),
}
