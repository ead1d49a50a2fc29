//! Admission filter chains
//!
//! Filters run before delivery, in registration order, and may drop
//! recipients from the request (recording why in the response). The chain of
//! [`GLOBAL_CATEGORY`] runs first for every request; a halt there skips the
//! category chain entirely.
//!
//! Chains are copy-on-write: registration builds a new sequence and swaps it
//! in, so an in-flight send keeps running the snapshot it started with.

use crate::dispatch::{DispatchContext, SendRequest, SendResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Category whose filters apply to every request
pub const GLOBAL_CATEGORY: &str = "*";

/// What the chain should do after a filter ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterFlow {
    Continue,
    Halt,
}

impl FilterFlow {
    pub fn is_halt(&self) -> bool {
        matches!(self, FilterFlow::Halt)
    }
}

/// An admission check.
///
/// A filter that rejects recipients must remove them from the request and
/// record a failure for each in the response. It never fails the whole
/// batch unless it returns [`FilterFlow::Halt`].
#[async_trait]
pub trait Filter: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "filter"
    }

    async fn apply(
        &self,
        ctx: &DispatchContext,
        req: &mut SendRequest,
        resp: &mut SendResponse,
    ) -> FilterFlow;
}

/// Adapts a synchronous closure into a [`Filter`]
pub struct FilterFn<F> {
    name: String,
    f: F,
}

impl<F> FilterFn<F>
where
    F: Fn(&DispatchContext, &mut SendRequest, &mut SendResponse) -> FilterFlow + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Filter for FilterFn<F>
where
    F: Fn(&DispatchContext, &mut SendRequest, &mut SendResponse) -> FilterFlow + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        ctx: &DispatchContext,
        req: &mut SendRequest,
        resp: &mut SendResponse,
    ) -> FilterFlow {
        (self.f)(ctx, req, resp)
    }
}

/// Immutable snapshot of one category's filters
pub type FilterChain = Arc<[Arc<dyn Filter>]>;

/// Filter chains per category
#[derive(Default)]
pub struct FilterRegistry {
    chains: RwLock<HashMap<String, FilterChain>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to a category's chain
    pub async fn register(&self, category: &str, filter: Arc<dyn Filter>) {
        self.extend(category, vec![filter]).await;
    }

    /// Append several filters at once; does nothing when `filters` is empty
    pub async fn extend(&self, category: &str, filters: Vec<Arc<dyn Filter>>) {
        if filters.is_empty() {
            return;
        }

        let mut chains = self.chains.write().await;
        let mut next: Vec<Arc<dyn Filter>> = chains
            .get(category)
            .map(|chain| chain.iter().cloned().collect())
            .unwrap_or_default();
        debug!(
            category,
            added = filters.len(),
            total = next.len() + filters.len(),
            "Registering filters"
        );
        next.extend(filters);
        chains.insert(category.to_string(), next.into());
    }

    /// Replace a category's chain; an empty list removes the category
    pub async fn reset(&self, category: &str, filters: Vec<Arc<dyn Filter>>) {
        let mut chains = self.chains.write().await;
        info!(category, filters = filters.len(), "Resetting filter chain");
        if filters.is_empty() {
            chains.remove(category);
        } else {
            chains.insert(category.to_string(), filters.into());
        }
    }

    /// Current chain for a category (empty when none is registered)
    pub async fn chain(&self, category: &str) -> FilterChain {
        self.chains
            .read()
            .await
            .get(category)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Registered category names, sorted
    pub async fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chains.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the global chain, then the category chain, stopping at the first
    /// halt.
    pub async fn run(
        &self,
        ctx: &DispatchContext,
        req: &mut SendRequest,
        resp: &mut SendResponse,
    ) -> FilterFlow {
        let global = self.chain(GLOBAL_CATEGORY).await;
        if run_chain(&global, ctx, req, resp).await.is_halt() {
            return FilterFlow::Halt;
        }

        if req.category == GLOBAL_CATEGORY {
            return FilterFlow::Continue;
        }

        let category = self.chain(&req.category).await;
        run_chain(&category, ctx, req, resp).await
    }
}

async fn run_chain(
    chain: &FilterChain,
    ctx: &DispatchContext,
    req: &mut SendRequest,
    resp: &mut SendResponse,
) -> FilterFlow {
    for filter in chain.iter() {
        if filter.apply(ctx, req, resp).await.is_halt() {
            debug!(filter = filter.name(), "Filter halted the chain");
            return FilterFlow::Halt;
        }
    }
    FilterFlow::Continue
}
