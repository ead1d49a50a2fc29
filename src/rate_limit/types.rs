use super::store::StoreError;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Why a recipient did not get a quota slot.
///
/// The `Display` text is what ends up as the recipient's failure reason.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// The key is over its limit
    #[error("exceed rate limit")]
    Exceeded,

    /// Contention on the key outlasted the retry budget
    #[error("couldn't acquire quota access after {attempts} attempts")]
    Unavailable { attempts: u32 },

    #[error("quota check cancelled")]
    Cancelled,

    #[error("quota store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl QuotaError {
    /// Whether quota status is unknown rather than known to be exhausted.
    ///
    /// Callers can resend such recipients later without waiting for a refill.
    pub fn is_transient(&self) -> bool {
        !matches!(self, QuotaError::Exceeded)
    }

    /// Metrics label for this outcome
    pub fn label(&self) -> &'static str {
        match self {
            QuotaError::Exceeded => "exceeded",
            QuotaError::Unavailable { .. } => "unavailable",
            QuotaError::Cancelled => "cancelled",
            QuotaError::Store(_) => "store_error",
        }
    }
}

/// A granted quota slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Slots left for the key after this one
    pub remaining: u64,
}

/// Backoff between conflicting commits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictBackoff {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

fn default_initial_backoff_ms() -> u64 {
    2
}

fn default_max_backoff_ms() -> u64 {
    50
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for ConflictBackoff {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl ConflictBackoff {
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn build(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_backoff_ms))
            .with_max_interval(self.max_backoff())
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None) // attempts are bounded by the limiter
            .build()
    }
}

/// Token bucket limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Bucket capacity, also the burst size
    pub max_tokens: u64,
    /// Tokens added per period
    pub refill_rate: u64,
    /// Period length in seconds
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Optimistic transaction attempts per check
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Expiry of the bucket key; defaults to the time a drained bucket
    /// takes to refill
    #[serde(default)]
    pub key_ttl_secs: Option<u64>,
    #[serde(default = "default_token_bucket_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub backoff: ConflictBackoff,
}

fn default_period_secs() -> u64 {
    1
}

fn default_max_attempts() -> u32 {
    5
}

/// Key prefix of token bucket state unless configured otherwise
pub const TOKEN_BUCKET_PREFIX: &str = "dispatch:ratelimit:tb:";

fn default_token_bucket_prefix() -> String {
    TOKEN_BUCKET_PREFIX.to_string()
}

impl TokenBucketConfig {
    pub fn new(max_tokens: u64, refill_rate: u64, period_secs: u64) -> Self {
        Self {
            max_tokens,
            refill_rate,
            period_secs,
            max_attempts: default_max_attempts(),
            key_ttl_secs: None,
            key_prefix: default_token_bucket_prefix(),
            backoff: ConflictBackoff::default(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_key_ttl(mut self, secs: u64) -> Self {
        self.key_ttl_secs = Some(secs);
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Key expiry in seconds
    pub fn key_ttl(&self) -> u64 {
        self.key_ttl_secs.unwrap_or_else(|| {
            let periods = self.max_tokens.div_ceil(self.refill_rate.max(1));
            periods.saturating_mul(self.period_secs).max(1)
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == 0 {
            return Err("token bucket max_tokens must be > 0".to_string());
        }
        if self.refill_rate == 0 {
            return Err("token bucket refill_rate must be > 0".to_string());
        }
        if self.period_secs == 0 {
            return Err("token bucket period_secs must be > 0".to_string());
        }
        if self.max_attempts == 0 {
            return Err("token bucket max_attempts must be > 0".to_string());
        }
        if self.key_ttl_secs == Some(0) {
            return Err("token bucket key_ttl_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// Fixed window limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedWindowConfig {
    /// Requests allowed per window
    pub limit: u64,
    pub window_secs: u64,
    #[serde(default = "default_fixed_window_prefix")]
    pub key_prefix: String,
    /// Align windows to multiples of `window_secs` since the epoch instead
    /// of starting them at the first request
    #[serde(default)]
    pub aligned: bool,
}

/// Key prefix of fixed window counters unless configured otherwise
pub const FIXED_WINDOW_PREFIX: &str = "dispatch:ratelimit:fw:";

fn default_fixed_window_prefix() -> String {
    FIXED_WINDOW_PREFIX.to_string()
}

impl FixedWindowConfig {
    pub fn new(limit: u64, window_secs: u64) -> Self {
        Self {
            limit,
            window_secs,
            key_prefix: default_fixed_window_prefix(),
            aligned: false,
        }
    }

    pub fn aligned(mut self) -> Self {
        self.aligned = true;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.limit == 0 {
            return Err("fixed window limit must be > 0".to_string());
        }
        if self.window_secs == 0 {
            return Err("fixed window window_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// Stored token bucket state, encoded as `[last_refill, tokens]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Unix seconds of the last refill
    pub last_refill: u64,
    pub tokens: u64,
}

impl BucketState {
    pub fn full(now: u64, max_tokens: u64) -> Self {
        Self {
            last_refill: now,
            tokens: max_tokens,
        }
    }

    pub fn encode(&self) -> String {
        serde_json::json!([self.last_refill, self.tokens]).to_string()
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        let (last_refill, tokens): (u64, u64) = serde_json::from_str(raw)?;
        Ok(Self {
            last_refill,
            tokens,
        })
    }

    /// Add the tokens earned since the last refill.
    ///
    /// Only whole tokens are added and the refill time jumps to `now`, so
    /// any fractional remainder is lost.
    pub fn refill(self, now: u64, config: &TokenBucketConfig) -> Self {
        let elapsed = now.saturating_sub(self.last_refill);
        let to_add = config.refill_rate.saturating_mul(elapsed) / config.period_secs.max(1);
        if to_add == 0 {
            return self;
        }
        Self {
            last_refill: now,
            tokens: self.tokens.saturating_add(to_add).min(config.max_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_state_encoding() {
        let state = BucketState {
            last_refill: 1_700_000_000,
            tokens: 4,
        };
        assert_eq!(state.encode(), "[1700000000,4]");
        assert_eq!(BucketState::decode("[1700000000,4]").unwrap(), state);
        assert!(BucketState::decode("garbage").is_err());
    }

    #[test]
    fn test_refill_whole_periods_only() {
        let config = TokenBucketConfig::new(10, 3, 10);
        let state = BucketState {
            last_refill: 100,
            tokens: 0,
        };

        // 3 tokens per 10s: 3s earns 0.9 of a token, nothing is added
        assert_eq!(state.refill(103, &config), state);

        // 4s earns 1.2 tokens: one is added and the remainder is dropped
        let refilled = state.refill(104, &config);
        assert_eq!(refilled.tokens, 1);
        assert_eq!(refilled.last_refill, 104);
    }

    #[test]
    fn test_refill_caps_at_max() {
        let config = TokenBucketConfig::new(5, 3, 1);
        let state = BucketState {
            last_refill: 0,
            tokens: 4,
        };
        assert_eq!(state.refill(100, &config).tokens, 5);
    }

    #[test]
    fn test_refill_ignores_clock_going_backwards() {
        let config = TokenBucketConfig::new(5, 1, 1);
        let state = BucketState {
            last_refill: 100,
            tokens: 1,
        };
        assert_eq!(state.refill(50, &config), state);
    }

    #[test]
    fn test_default_key_ttl_covers_full_refill() {
        assert_eq!(TokenBucketConfig::new(5, 3, 10).key_ttl(), 20);
        assert_eq!(TokenBucketConfig::new(3, 1, 1).key_ttl(), 3);
        assert_eq!(TokenBucketConfig::new(3, 1, 1).with_key_ttl(30).key_ttl(), 30);
    }

    #[test]
    fn test_config_validation() {
        assert!(TokenBucketConfig::new(5, 1, 1).validate().is_ok());
        assert!(TokenBucketConfig::new(0, 1, 1).validate().is_err());
        assert!(TokenBucketConfig::new(5, 0, 1).validate().is_err());
        assert!(TokenBucketConfig::new(5, 1, 0).validate().is_err());
        assert!(TokenBucketConfig::new(5, 1, 1)
            .with_max_attempts(0)
            .validate()
            .is_err());

        assert!(FixedWindowConfig::new(10, 60).validate().is_ok());
        assert!(FixedWindowConfig::new(0, 60).validate().is_err());
        assert!(FixedWindowConfig::new(10, 0).validate().is_err());
    }

    #[test]
    fn test_quota_error_reasons() {
        assert_eq!(QuotaError::Exceeded.to_string(), "exceed rate limit");
        assert_eq!(
            QuotaError::Unavailable { attempts: 5 }.to_string(),
            "couldn't acquire quota access after 5 attempts"
        );
        assert!(!QuotaError::Exceeded.is_transient());
        assert!(QuotaError::Unavailable { attempts: 1 }.is_transient());
        assert!(QuotaError::Cancelled.is_transient());
    }
}
