use super::{QuotaError, QuotaLimiter};
use crate::dispatch::{DispatchContext, SendRequest, SendResponse};
use crate::filter::{Filter, FilterFlow};
use crate::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Derives the quota key for a recipient
pub type KeyFn = Arc<dyn Fn(&SendRequest, &str) -> String + Send + Sync>;

/// Checks every recipient against a [`QuotaLimiter`] and drops the ones
/// without quota.
///
/// Rejected recipients are removed from the request together with their
/// template values and listed in the response with the limiter's reason.
/// Cancellation stops the checks and halts the chain. Nothing is delivered
/// after a halt, so every recipient still in the request is dropped as
/// cancelled, including those already granted a slot. Their slots stay
/// spent.
pub struct RateLimitFilter {
    name: String,
    limiter: Arc<dyn QuotaLimiter>,
    key_fn: Option<KeyFn>,
}

impl RateLimitFilter {
    /// Rate limit per recipient
    pub fn new(limiter: Arc<dyn QuotaLimiter>) -> Self {
        Self {
            name: format!("rate_limit:{}", limiter.strategy()),
            limiter,
            key_fn: None,
        }
    }

    /// Use a custom quota key, e.g. to share a quota across categories
    pub fn with_key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&SendRequest, &str) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(f));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn key_for(&self, req: &SendRequest, recipient: &str) -> String {
        match &self.key_fn {
            Some(f) => f(req, recipient),
            None => recipient.to_string(),
        }
    }
}

#[async_trait]
impl Filter for RateLimitFilter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        ctx: &DispatchContext,
        req: &mut SendRequest,
        resp: &mut SendResponse,
    ) -> FilterFlow {
        let strategy = self.limiter.strategy();
        let mut reasons: Vec<Option<String>> = vec![None; req.recipients.len()];
        let mut cancelled = false;

        for (index, recipient) in req.recipients.iter().enumerate() {
            if cancelled {
                reasons[index] = Some(QuotaError::Cancelled.to_string());
                continue;
            }

            let key = self.key_for(req, recipient);
            match self.limiter.acquire(ctx, &key).await {
                Ok(admission) => {
                    metrics::record_quota_decision(strategy, "accepted");
                    debug!(recipient = %recipient, remaining = admission.remaining, "Quota granted");
                }
                Err(err) => {
                    metrics::record_quota_decision(strategy, err.label());
                    match &err {
                        QuotaError::Cancelled => cancelled = true,
                        QuotaError::Store(_) => {
                            error!(recipient = %recipient, strategy, error = %err, "Quota store failed")
                        }
                        _ => warn!(
                            recipient = %recipient,
                            strategy,
                            error = %err,
                            transient = err.is_transient(),
                            "Recipient rejected by rate limit"
                        ),
                    }
                    reasons[index] = Some(err.to_string());
                }
            }
        }

        if cancelled {
            let reason = QuotaError::Cancelled.to_string();
            for slot in reasons.iter_mut().filter(|slot| slot.is_none()) {
                *slot = Some(reason.clone());
            }
        }

        let mut failures = Vec::new();
        req.retain_recipients(|index, recipient| match &reasons[index] {
            Some(reason) => {
                failures.push((recipient.to_string(), reason.clone()));
                false
            }
            None => true,
        });
        for (recipient, reason) in failures {
            resp.record_failure(recipient, reason);
        }

        if cancelled {
            FilterFlow::Halt
        } else {
            FilterFlow::Continue
        }
    }
}
