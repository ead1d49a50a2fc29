use super::clock::{Clock, SystemClock};
use super::store::{QuotaStore, StoreError};
use super::types::{Admission, FixedWindowConfig, QuotaError};
use super::{round_trip, QuotaLimiter};
use crate::dispatch::DispatchContext;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Fixed window counter over a shared store.
///
/// The read and the increment are separate round trips, so concurrent
/// callers that all read a below-limit counter may overshoot the limit
/// within a window.
pub struct FixedWindowLimiter {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    config: FixedWindowConfig,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn QuotaStore>, config: FixedWindowConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &FixedWindowConfig {
        &self.config
    }

    /// Store key for a logical key, suffixed with the window index when
    /// windows are aligned
    pub fn store_key(&self, key: &str) -> String {
        if self.config.aligned {
            let window = self.clock.now_secs() / self.config.window_secs.max(1);
            format!("{}{}:{}", self.config.key_prefix, key, window)
        } else {
            format!("{}{}", self.config.key_prefix, key)
        }
    }
}

#[async_trait]
impl QuotaLimiter for FixedWindowLimiter {
    fn strategy(&self) -> &'static str {
        "fixed_window"
    }

    async fn acquire(&self, ctx: &DispatchContext, key: &str) -> Result<Admission, QuotaError> {
        let key = self.store_key(key);
        let limit = self.config.limit;

        let count = match round_trip(ctx, self.store.get(&key)).await? {
            None => 0,
            Some(raw) => raw.parse::<u64>().map_err(|_| StoreError::Corrupt {
                key: key.clone(),
                reason: format!("not a counter: {:?}", raw),
            })?,
        };
        if count >= limit {
            debug!(key = %key, count, limit, "Fixed window limit reached");
            return Err(QuotaError::Exceeded);
        }

        let after = round_trip(ctx, self.store.increment(&key, self.config.window_secs)).await?;
        let remaining = limit.saturating_sub(after.max(0) as u64);
        debug!(key = %key, count = after, remaining, "Fixed window slot acquired");
        Ok(Admission { remaining })
    }
}
