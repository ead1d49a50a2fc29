//! Distributed rate limiting
//!
//! Quota state lives in a shared [`QuotaStore`] so that every dispatch
//! process sees the same counters. Two strategies are provided:
//!
//! - **Token bucket** ([`TokenBucketLimiter`]): accurate, read-modify-write
//!   inside an optimistic transaction, retried on conflict
//! - **Fixed window** ([`FixedWindowLimiter`]): approximate, one read and
//!   one atomic increment
//!
//! [`RateLimitFilter`] turns either into a per-recipient admission filter.
//!
//! # Example
//!
//! ```rust,no_run
//! use dispatcher::filter::FilterRegistry;
//! use dispatcher::rate_limit::{
//!     MemoryQuotaStore, RateLimitFilter, TokenBucketConfig, TokenBucketLimiter,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryQuotaStore::new());
//!     let limiter = TokenBucketLimiter::new(store, TokenBucketConfig::new(5, 3, 10));
//!
//!     let registry = FilterRegistry::new();
//!     registry
//!         .register("test", Arc::new(RateLimitFilter::new(Arc::new(limiter))))
//!         .await;
//! }
//! ```

pub mod clock;
pub mod filter;
pub mod fixed_window;
pub mod memory;
pub mod redis;
pub mod store;
pub mod token_bucket;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use filter::RateLimitFilter;
pub use fixed_window::FixedWindowLimiter;
pub use memory::MemoryQuotaStore;
pub use self::redis::RedisQuotaStore;
pub use store::{Commit, QuotaStore, StoreError, WatchedKey};
pub use token_bucket::TokenBucketLimiter;
pub use types::{Admission, BucketState, ConflictBackoff, FixedWindowConfig, QuotaError, TokenBucketConfig};

use crate::dispatch::DispatchContext;
use async_trait::async_trait;
use std::future::Future;

/// A quota check against one key
#[async_trait]
pub trait QuotaLimiter: Send + Sync {
    /// Strategy name used in logs and metrics
    fn strategy(&self) -> &'static str;

    /// Take one slot for `key`
    async fn acquire(&self, ctx: &DispatchContext, key: &str) -> Result<Admission, QuotaError>;
}

/// Run one store round trip, giving up if the call is interrupted
async fn round_trip<T, F>(ctx: &DispatchContext, fut: F) -> Result<T, QuotaError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match ctx.guard(fut).await {
        Some(result) => result.map_err(QuotaError::Store),
        None => Err(QuotaError::Cancelled),
    }
}
