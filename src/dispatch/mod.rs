//! Dispatch orchestration
//!
//! [`send`] is the single entry point: it validates the request, runs the
//! filter chain for its category and hands the surviving recipients to a
//! sender picked by the context's selector.
//!
//! ```text
//! Validate -> Filter(global) -> Filter(category) -> Select -> Deliver
//! ```
//!
//! Every stage is a one-way gate. Failures recorded by filters stay in the
//! response whatever the later stages do.

pub mod id;
pub mod types;

pub use id::{IdGenerator, SequenceGenerator, UuidGenerator};
pub use types::{FailedRecipient, SendRequest, SendResponse, StatusCode};

use crate::error::DispatchError;
use crate::filter::FilterRegistry;
use crate::metrics;
use crate::selector::{RandomSelector, Selector};
use crate::sender::ResponseWriter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Collaborators shared by every send, plus per-call cancellation.
///
/// Cloning is cheap: registries are behind `Arc`s, so a per-call clone with
/// its own deadline still sees the same filters and senders.
#[derive(Clone)]
pub struct DispatchContext {
    filters: Arc<FilterRegistry>,
    selector: Arc<dyn Selector>,
    id_gen: Arc<dyn IdGenerator>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchContext {
    /// Create a context with an empty registry, an empty random selector and
    /// UUID identifiers
    pub fn new() -> Self {
        Self {
            filters: Arc::new(FilterRegistry::new()),
            selector: Arc::new(RandomSelector::new()),
            id_gen: Arc::new(UuidGenerator),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_filters(mut self, filters: Arc<FilterRegistry>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_id_generator(mut self, id_gen: Arc<dyn IdGenerator>) -> Self {
        self.id_gen = id_gen;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn filters(&self) -> &Arc<FilterRegistry> {
        &self.filters
    }

    pub fn selector(&self) -> &Arc<dyn Selector> {
        &self.selector
    }

    pub fn id_generator(&self) -> &Arc<dyn IdGenerator> {
        &self.id_gen
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the call was cancelled or ran past its deadline
    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Completes once the call is cancelled or its deadline passes
    pub async fn interrupted(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Run `fut` unless the call is interrupted first.
    ///
    /// Returns `None` when interrupted; `fut` is dropped at that point.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.is_interrupted() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.interrupted() => None,
            out = fut => Some(out),
        }
    }
}

/// Send a request through the filter chain and the selected sender.
///
/// Always returns a response. Request-level failures are reported through
/// `code`/`message`, per-recipient ones through `failed`.
pub async fn send(ctx: &DispatchContext, mut req: SendRequest) -> SendResponse {
    let mut resp = SendResponse::new(ctx.id_gen.next_id());
    let span = info_span!("send", id = %resp.id, category = %req.category);

    async {
        if !req.is_aligned() {
            let err = DispatchError::InvalidParam(format!(
                "recipients.length({}) != params.length({})",
                req.recipients.len(),
                req.params.len()
            ));
            warn!(error = %err, "Rejecting malformed request");
            resp.set_status(err.status_code(), Some(err.to_string()));
            return;
        }

        let flow = ctx.filters.run(ctx, &mut req, &mut resp).await;
        if flow.is_halt() || req.recipients.is_empty() {
            debug!(
                halted = flow.is_halt(),
                remaining = req.recipients.len(),
                failed = resp.failed.len(),
                "Filter chain stopped delivery"
            );
            return;
        }

        let sender = match ctx.selector.select(&req.category).await {
            Ok(sender) => sender,
            Err(err) => {
                warn!(error = %err, "Sender selection failed");
                resp.set_status(err.status_code(), Some(err.to_string()));
                return;
            }
        };

        sender
            .send(ctx, &req, &mut ResponseWriter::new(&mut resp))
            .await;

        info!(
            code = resp.code.as_u16(),
            delivered = req.recipients.len(),
            failed = resp.failed.len(),
            "Send finished"
        );
    }
    .instrument(span)
    .await;

    metrics::record_send(&req.category, resp.code);
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_runs_future_when_not_interrupted() {
        let ctx = DispatchContext::new();
        assert_eq!(ctx.guard(async { 5 }).await, Some(5));
    }

    #[tokio::test]
    async fn test_guard_stops_on_cancellation() {
        let cancel = CancellationToken::new();
        let ctx = DispatchContext::new().with_cancellation(cancel.clone());
        cancel.cancel();

        assert!(ctx.is_interrupted());
        assert_eq!(ctx.guard(std::future::pending::<()>()).await, None);
    }

    #[tokio::test]
    async fn test_guard_stops_at_deadline() {
        let ctx = DispatchContext::new().with_timeout(Duration::from_millis(20));
        let out = ctx.guard(std::future::pending::<()>()).await;
        assert_eq!(out, None);
        assert!(ctx.is_interrupted());
    }

    #[tokio::test]
    async fn test_send_without_sender_reports_no_sender() {
        let ctx = DispatchContext::new();
        let resp = send(&ctx, SendRequest::new("nobody", vec!["1".into()])).await;
        assert_eq!(resp.code, StatusCode::NoSender);
        assert_eq!(resp.message.as_deref(), Some("no sender under nobody"));
        assert!(!resp.id.is_empty());
    }
}
