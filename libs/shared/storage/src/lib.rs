pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryStore;
pub use redis::RedisStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Redis connection error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key/value surface every stateful component talks to.
///
/// Production runs on [`RedisStore`]; tests and single-instance development
/// run on [`MemoryStore`]. Keys are plain strings already scoped by tenant
/// where that matters (`conv:{tenant}:{phone}`, `sync:lock:{tenant}`, ...).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError>;

    /// Set-if-absent. Returns false when the key already exists. The
    /// distributed sync lock and the message-id dedup set are built on this.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>)
        -> Result<bool, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Increment a windowed counter, creating it with `window` TTL on first
    /// touch. Returns the post-increment value.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<i64, StorageError>;

    /// Append to an ordered list (append-only event logs, message history).
    async fn push_back(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn list_all(&self, key: &str) -> Result<Vec<String>, StorageError>;

    /// Every live key starting with `prefix`. Used by admin listings and the
    /// upsell job sweep; prefixes are narrow enough that a scan is fine.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
