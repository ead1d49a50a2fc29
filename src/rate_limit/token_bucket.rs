use super::clock::{Clock, SystemClock};
use super::store::{Commit, QuotaStore};
use super::types::{Admission, BucketState, QuotaError, TokenBucketConfig};
use super::{round_trip, QuotaLimiter};
use crate::dispatch::DispatchContext;
use crate::metrics;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use std::sync::Arc;
use tracing::{debug, warn};

const STRATEGY: &str = "token_bucket";

/// Result of one optimistic transaction
enum Attempt {
    Acquired { remaining: u64 },
    /// The key changed between watch and commit
    RetryableConflict,
}

/// Token bucket limiter over a shared store.
///
/// Each check is a compare-and-swap on the bucket key: watch, read, refill,
/// take a token, commit. A conflicting writer sends the check back to the
/// watch, up to `max_attempts` times.
pub struct TokenBucketLimiter {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    config: TokenBucketConfig,
}

impl TokenBucketLimiter {
    pub fn new(store: Arc<dyn QuotaStore>, config: TokenBucketConfig) -> Self {
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

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Store key for a logical key
    pub fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Refill a key's bucket to capacity
    pub async fn reset(&self, key: &str) -> Result<(), QuotaError> {
        let state = BucketState::full(self.clock.now_secs(), self.config.max_tokens);
        self.store
            .set_ex(&self.store_key(key), &state.encode(), self.config.key_ttl())
            .await?;
        Ok(())
    }

    async fn attempt(&self, ctx: &DispatchContext, key: &str) -> Result<Attempt, QuotaError> {
        let mut watched = round_trip(ctx, self.store.watch(key)).await?;
        let raw = round_trip(ctx, watched.get()).await?;

        let now = self.clock.now_secs();
        let stored = match raw {
            None => BucketState::full(now, self.config.max_tokens),
            Some(raw) => BucketState::decode(&raw).unwrap_or_else(|e| {
                warn!(key, error = %e, "Discarding undecodable bucket state");
                BucketState::full(now, self.config.max_tokens)
            }),
        };

        let mut state = stored.refill(now, &self.config);
        if state.tokens < 1 {
            if let Err(e) = watched.unwatch().await {
                debug!(key, error = %e, "Unwatch failed");
            }
            return Err(QuotaError::Exceeded);
        }
        state.tokens -= 1;

        let commit = round_trip(
            ctx,
            watched.commit(state.encode(), self.config.key_ttl()),
        )
        .await?;

        Ok(match commit {
            Commit::Applied => Attempt::Acquired {
                remaining: state.tokens,
            },
            Commit::Conflict => Attempt::RetryableConflict,
        })
    }
}

#[async_trait]
impl QuotaLimiter for TokenBucketLimiter {
    fn strategy(&self) -> &'static str {
        STRATEGY
    }

    async fn acquire(&self, ctx: &DispatchContext, key: &str) -> Result<Admission, QuotaError> {
        let key = self.store_key(key);
        let max_attempts = self.config.max_attempts;
        let mut backoff = self.config.backoff.build();

        for attempt in 1..=max_attempts {
            match self.attempt(ctx, &key).await? {
                Attempt::Acquired { remaining } => {
                    debug!(key = %key, attempt, remaining, "Token bucket slot acquired");
                    return Ok(Admission { remaining });
                }
                Attempt::RetryableConflict => {
                    metrics::record_quota_conflict(STRATEGY);
                    debug!(key = %key, attempt, max_attempts, "Token bucket commit conflicted");

                    if attempt < max_attempts {
                        let wait = backoff
                            .next_backoff()
                            .unwrap_or_else(|| self.config.backoff.max_backoff());
                        if ctx.guard(tokio::time::sleep(wait)).await.is_none() {
                            return Err(QuotaError::Cancelled);
                        }
                    }
                }
            }
        }

        warn!(key = %key, max_attempts, "Token bucket contention outlasted retries");
        Err(QuotaError::Unavailable {
            attempts: max_attempts,
        })
    }
}
