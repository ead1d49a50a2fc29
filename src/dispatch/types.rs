use serde::{Deserialize, Serialize};

/// Response status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// The handler accepted the remaining recipients
    Success,
    /// Structural validation failed, nothing was attempted
    InvalidParam,
    /// No sender is registered for the category
    NoSender,
    /// The request never reached a handler
    #[default]
    NotSent,
    /// The handler failed to deliver
    DeliveryFailed,
}

impl StatusCode {
    /// Stable numeric code exposed to transports
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Success => 0,
            StatusCode::InvalidParam => 1001,
            StatusCode::NoSender => 1002,
            StatusCode::NotSent => 1003,
            StatusCode::DeliveryFailed => 1004,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Success => "success",
            StatusCode::InvalidParam => "invalid_param",
            StatusCode::NoSender => "no_sender",
            StatusCode::NotSent => "not_sent",
            StatusCode::DeliveryFailed => "delivery_failed",
        }
    }
}

/// A send request as seen by filters and senders
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SendRequest {
    /// Selects the filter chain and the sender pool
    pub category: String,
    /// Recipient identifiers, in order
    pub recipients: Vec<String>,
    /// Message template rendered by the sender
    #[serde(default)]
    pub template_id: String,
    /// Per-recipient template values, index-aligned with `recipients`
    #[serde(default)]
    pub params: Vec<Vec<String>>,
}

impl SendRequest {
    /// Create a request without template values
    pub fn new(category: impl Into<String>, recipients: Vec<String>) -> Self {
        let params = vec![Vec::new(); recipients.len()];
        Self {
            category: category.into(),
            recipients,
            template_id: String::new(),
            params,
        }
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = template_id.into();
        self
    }

    pub fn with_params(mut self, params: Vec<Vec<String>>) -> Self {
        self.params = params;
        self
    }

    /// Whether `params` is index-aligned with `recipients`
    pub fn is_aligned(&self) -> bool {
        self.recipients.len() == self.params.len()
    }

    /// Remove the recipient at `index` together with its values.
    pub fn remove_recipient(&mut self, index: usize) -> Option<(String, Vec<String>)> {
        if index >= self.recipients.len() {
            return None;
        }
        let recipient = self.recipients.remove(index);
        let values = if index < self.params.len() {
            self.params.remove(index)
        } else {
            Vec::new()
        };
        Some((recipient, values))
    }

    /// Keep only recipients for which `keep` returns true, returning the
    /// removed ones in their original order.
    pub fn retain_recipients<F>(&mut self, mut keep: F) -> Vec<String>
    where
        F: FnMut(usize, &str) -> bool,
    {
        let mut removed = Vec::new();
        let mut index = 0;
        let mut original = 0;
        while index < self.recipients.len() {
            if keep(original, &self.recipients[index]) {
                index += 1;
            } else if let Some((recipient, _)) = self.remove_recipient(index) {
                removed.push(recipient);
            }
            original += 1;
        }
        removed
    }
}

/// A recipient dropped before or during delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedRecipient {
    pub recipient: String,
    pub reason: String,
}

impl FailedRecipient {
    pub fn new(recipient: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            reason: reason.into(),
        }
    }
}

/// Result of a send call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SendResponse {
    /// Correlation identifier
    pub id: String,
    pub code: StatusCode,
    #[serde(default)]
    pub message: Option<String>,
    /// Per-recipient failures, in the order they were recorded
    #[serde(default)]
    pub failed: Vec<FailedRecipient>,
}

impl SendResponse {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn record_failure(&mut self, recipient: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(FailedRecipient::new(recipient, reason));
    }

    pub fn set_status(&mut self, code: StatusCode, message: Option<String>) {
        self.code = code;
        self.message = message;
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SendRequest {
        SendRequest::new(
            "test",
            vec!["1000000".into(), "1000001".into(), "1000002".into()],
        )
        .with_params(vec![
            vec!["v1".into()],
            vec!["v2".into()],
            vec!["v3".into()],
        ])
    }

    #[test]
    fn test_remove_recipient_keeps_alignment() {
        let mut req = request();
        let (recipient, values) = req.remove_recipient(1).unwrap();
        assert_eq!(recipient, "1000001");
        assert_eq!(values, vec!["v2".to_string()]);
        assert_eq!(req.recipients, vec!["1000000", "1000002"]);
        assert_eq!(req.params, vec![vec!["v1".to_string()], vec!["v3".to_string()]]);
        assert!(req.is_aligned());
        assert!(req.remove_recipient(5).is_none());
    }

    #[test]
    fn test_retain_recipients_reports_original_indices() {
        let mut req = request();
        let mut seen = Vec::new();
        let removed = req.retain_recipients(|i, r| {
            seen.push(i);
            r != "1000000" && r != "1000002"
        });
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(removed, vec!["1000000", "1000002"]);
        assert_eq!(req.recipients, vec!["1000001"]);
        assert_eq!(req.params, vec![vec!["v2".to_string()]]);
    }

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(StatusCode::Success.as_u16(), 0);
        assert_eq!(StatusCode::InvalidParam.as_u16(), 1001);
        assert_eq!(StatusCode::NoSender.as_u16(), 1002);
        assert_eq!(StatusCode::default(), StatusCode::NotSent);
    }

    #[test]
    fn test_response_serializes_failures_in_order() {
        let mut resp = SendResponse::new("42");
        resp.record_failure("a", "first");
        resp.record_failure("b", "second");

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["code"], "not_sent");
        assert_eq!(json["failed"][0]["recipient"], "a");
        assert_eq!(json["failed"][1]["reason"], "second");
    }
}
