//! Shared quota store contract
//!
//! The limiters only need optimistic transactions on a single key plus an
//! atomic increment that sets the expiry when it creates the key.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Quota store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Outcome of committing a watched key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Applied,
    /// Another writer changed the key after it was watched
    Conflict,
}

/// Key-value store shared by every dispatch process
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Start an optimistic transaction on `key`
    async fn watch(&self, key: &str) -> Result<Box<dyn WatchedKey>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Increment the integer at `key` and return the new value. A missing key
    /// is created at zero with a `ttl_secs` expiry in the same atomic step;
    /// an existing key keeps its expiry.
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<i64, StoreError>;
}

/// A key under watch. Consumed by `commit` or `unwatch`.
#[async_trait]
pub trait WatchedKey: Send {
    async fn get(&mut self) -> Result<Option<String>, StoreError>;

    /// Write `value` with a `ttl_secs` expiry unless the key changed since it
    /// was watched
    async fn commit(self: Box<Self>, value: String, ttl_secs: u64) -> Result<Commit, StoreError>;

    async fn unwatch(self: Box<Self>) -> Result<(), StoreError>;
}
