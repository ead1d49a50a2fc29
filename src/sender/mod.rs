//! Delivery handlers
//!
//! A [`Sender`] owns the final status of a request. It receives a
//! [`ResponseWriter`] rather than the response itself, so failures recorded
//! by filters earlier in the pipeline cannot be dropped.

use crate::dispatch::{DispatchContext, SendRequest, SendResponse, StatusCode};
use async_trait::async_trait;
use tracing::debug;

/// Write access to a response for senders.
///
/// Status and message can be set freely. Failures can only be appended.
pub struct ResponseWriter<'a> {
    resp: &'a mut SendResponse,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(resp: &'a mut SendResponse) -> Self {
        Self { resp }
    }

    pub fn set_status(&mut self, code: StatusCode, message: Option<String>) {
        self.resp.set_status(code, message);
    }

    pub fn succeed(&mut self) {
        self.resp.set_status(StatusCode::Success, None);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.resp
            .set_status(StatusCode::DeliveryFailed, Some(message.into()));
    }

    pub fn record_failure(&mut self, recipient: impl Into<String>, reason: impl Into<String>) {
        self.resp.record_failure(recipient, reason);
    }

    /// The response as written so far
    pub fn response(&self) -> &SendResponse {
        self.resp
    }
}

/// Delivers a filtered request
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, ctx: &DispatchContext, req: &SendRequest, resp: &mut ResponseWriter<'_>);
}

/// Adapts a synchronous closure into a [`Sender`]
pub struct SenderFn<F>(pub F);

#[async_trait]
impl<F> Sender for SenderFn<F>
where
    F: Fn(&SendRequest, &mut ResponseWriter<'_>) + Send + Sync,
{
    async fn send(&self, _ctx: &DispatchContext, req: &SendRequest, resp: &mut ResponseWriter<'_>) {
        (self.0)(req, resp)
    }
}

/// Logs every recipient and reports success; stands in for a carrier in
/// development setups
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    async fn send(&self, _ctx: &DispatchContext, req: &SendRequest, resp: &mut ResponseWriter<'_>) {
        for (recipient, values) in req.recipients.iter().zip(&req.params) {
            debug!(
                category = %req.category,
                template = %req.template_id,
                recipient = %recipient,
                values = %values.join(","),
                "send message"
            );
        }
        resp.succeed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_appends_without_clearing() {
        let mut resp = SendResponse::new("1");
        resp.record_failure("a", "filtered");

        let mut writer = ResponseWriter::new(&mut resp);
        writer.fail("carrier down");
        writer.record_failure("b", "bounced");
        assert_eq!(writer.response().failed.len(), 2);

        assert_eq!(resp.code, StatusCode::DeliveryFailed);
        assert_eq!(resp.message.as_deref(), Some("carrier down"));
        assert_eq!(resp.failed[0].recipient, "a");
        assert_eq!(resp.failed[1].recipient, "b");
    }

    #[tokio::test]
    async fn test_log_sender_succeeds() {
        let ctx = DispatchContext::new();
        let req = SendRequest::new("test", vec!["1".into(), "2".into()]);
        let mut resp = SendResponse::default();

        LogSender
            .send(&ctx, &req, &mut ResponseWriter::new(&mut resp))
            .await;
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn test_sender_fn() {
        let ctx = DispatchContext::new();
        let req = SendRequest::new("test", vec!["1".into()]);
        let mut resp = SendResponse::default();

        let sender = SenderFn(|req: &SendRequest, resp: &mut ResponseWriter<'_>| {
            resp.record_failure(req.recipients[0].clone(), "no route");
            resp.fail("partial");
        });
        sender
            .send(&ctx, &req, &mut ResponseWriter::new(&mut resp))
            .await;

        assert_eq!(resp.code, StatusCode::DeliveryFailed);
        assert_eq!(resp.failed.len(), 1);
    }
}
