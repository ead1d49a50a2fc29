use crate::error::{DispatchError, Result};
use crate::filter::{Filter, FilterRegistry};
use crate::rate_limit::clock::Clock;
use crate::rate_limit::store::QuotaStore;
use crate::rate_limit::types::{
    FixedWindowConfig, TokenBucketConfig, FIXED_WINDOW_PREFIX, TOKEN_BUCKET_PREFIX,
};
use crate::rate_limit::{FixedWindowLimiter, QuotaLimiter, RateLimitFilter, TokenBucketLimiter};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Main dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DispatchConfig {
    /// Shared quota store; limiters need one to be installed
    #[serde(default)]
    pub store: Option<StoreConfig>,
    /// Filter chains per category
    #[serde(default)]
    pub filters: Vec<CategoryFilters>,
}

/// Quota store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Per-command timeout in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_op_timeout_ms() -> u64 {
    1000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Rate limits applied to one category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryFilters {
    /// Category name, or `"*"` for every request
    pub category: String,
    #[serde(default)]
    pub rate_limits: Vec<RateLimitRule>,
}

/// One rate limit, tagged by strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RateLimitRule {
    TokenBucket(TokenBucketConfig),
    FixedWindow(FixedWindowConfig),
}

impl RateLimitRule {
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            RateLimitRule::TokenBucket(config) => config.validate(),
            RateLimitRule::FixedWindow(config) => config.validate(),
        }
    }

    /// Copy of this rule whose quota keys belong to it alone.
    ///
    /// A rule still on its strategy's default prefix gets
    /// `<prefix><category>:<position>:` instead. Explicit prefixes are kept,
    /// which is how two rules can share a quota on purpose.
    pub fn scoped(&self, category: &str, position: usize) -> Self {
        let mut rule = self.clone();
        match &mut rule {
            RateLimitRule::TokenBucket(config) if config.key_prefix == TOKEN_BUCKET_PREFIX => {
                config.key_prefix = format!("{}{}:{}:", TOKEN_BUCKET_PREFIX, category, position);
            }
            RateLimitRule::FixedWindow(config) if config.key_prefix == FIXED_WINDOW_PREFIX => {
                config.key_prefix = format!("{}{}:{}:", FIXED_WINDOW_PREFIX, category, position);
            }
            _ => {}
        }
        rule
    }

    pub fn key_prefix(&self) -> &str {
        match self {
            RateLimitRule::TokenBucket(config) => &config.key_prefix,
            RateLimitRule::FixedWindow(config) => &config.key_prefix,
        }
    }

    /// Build the limiter this rule describes
    pub fn build(&self, store: Arc<dyn QuotaStore>, clock: Arc<dyn Clock>) -> Arc<dyn QuotaLimiter> {
        match self {
            RateLimitRule::TokenBucket(config) => {
                Arc::new(TokenBucketLimiter::new(store, config.clone()).with_clock(clock))
            }
            RateLimitRule::FixedWindow(config) => {
                Arc::new(FixedWindowLimiter::new(store, config.clone()).with_clock(clock))
            }
        }
    }
}

impl DispatchConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DispatchError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| DispatchError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(store) = &self.store {
            if store.redis_url.is_empty() {
                return Err(DispatchError::Config("Store redis_url cannot be empty".to_string()));
            }
            if store.op_timeout_ms == 0 {
                return Err(DispatchError::Config("Store op_timeout_ms must be > 0".to_string()));
            }
        }

        for entry in &self.filters {
            if entry.category.is_empty() {
                return Err(DispatchError::Config(
                    "Filter category cannot be empty".to_string(),
                ));
            }
            for rule in &entry.rate_limits {
                rule.validate().map_err(|e| {
                    DispatchError::Config(format!("{} for category: {}", e, entry.category))
                })?;
            }
        }

        Ok(())
    }

    /// Build the configured rate-limit filters and install them, replacing
    /// each listed category's chain.
    ///
    /// Categories listed more than once have their filters concatenated.
    /// Categories not mentioned keep whatever is registered. Every rule gets
    /// its own quota keys (see [`RateLimitRule::scoped`]).
    pub async fn install(
        &self,
        registry: &FilterRegistry,
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<()> {
        self.validate()?;

        let mut chains: Vec<(&str, Vec<Arc<dyn Filter>>)> = Vec::new();
        for entry in &self.filters {
            let index = match chains.iter().position(|(category, _)| *category == entry.category) {
                Some(index) => index,
                None => {
                    chains.push((entry.category.as_str(), Vec::new()));
                    chains.len() - 1
                }
            };
            let filters = &mut chains[index].1;

            for rule in &entry.rate_limits {
                let rule = rule.scoped(&entry.category, filters.len());
                debug!(
                    category = %entry.category,
                    prefix = rule.key_prefix(),
                    "Building rate limit filter"
                );
                let limiter = rule.build(store.clone(), clock.clone());
                filters.push(Arc::new(RateLimitFilter::new(limiter)));
            }
        }

        for (category, filters) in chains {
            info!(category, filters = filters.len(), "Installing filter chain");
            registry.reset(category, filters).await;
        }

        Ok(())
    }
}
