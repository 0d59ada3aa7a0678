//! Backing stores for the shared window.
//!
//! A [`Store`] holds the shared window's bookkeeping (cursor, total, expiry)
//! and its ordered item list. Every operation is a single round trip and
//! atomic on its own key; nothing spans more than one call.
//!
//! - [`memory`]: in-process store, cloneable handle over one map
//! - `redis` (feature `redis`): Redis-backed store

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("key {key} does not hold {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("store transport error: {0}")]
    Transport(String),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Key-value / ordered-list capability used by the shared window.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read an integer; `None` when the key does not exist.
    async fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Unconditionally overwrite an integer.
    async fn set_int(&self, key: &str, value: i64) -> Result<(), StoreError>;

    /// Atomically add `delta` and return the post-increment value.
    /// A missing key counts as 0.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Replace the list at `key` wholesale, keeping input order.
    async fn set_list(&self, key: &str, items: Vec<String>) -> Result<(), StoreError>;

    /// Items at positions `[start, end)`. Out-of-range bounds are clamped.
    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>, StoreError>;
}
