use crate::dispatch::StatusCode;
use ::metrics::{counter, describe_counter};

/// Register all metrics with descriptions.
///
/// Recording works without it; this only attaches help text for whatever
/// recorder the embedding application installs.
pub fn register_metrics() {
    describe_counter!(
        "dispatch_requests_total",
        "Total number of send requests by category and final status"
    );
    describe_counter!(
        "dispatch_quota_decisions_total",
        "Per-recipient rate limit decisions by strategy and outcome"
    );
    describe_counter!(
        "dispatch_quota_conflicts_total",
        "Optimistic transaction conflicts seen by rate limiters"
    );
}

/// Record a finished send request
pub fn record_send(category: &str, code: StatusCode) {
    let labels = [
        ("category", category.to_string()),
        ("code", code.as_str().to_string()),
    ];
    counter!("dispatch_requests_total", &labels).increment(1);
}

/// Record the outcome of one quota check
pub fn record_quota_decision(strategy: &'static str, outcome: &'static str) {
    counter!(
        "dispatch_quota_decisions_total",
        "strategy" => strategy,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a commit conflict in a rate limiter
pub fn record_quota_conflict(strategy: &'static str) {
    counter!("dispatch_quota_conflicts_total", "strategy" => strategy).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        // no recorder installed: calls must be no-ops
        register_metrics();
        record_send("verify", StatusCode::Success);
        record_send("verify", StatusCode::NoSender);
        record_quota_decision("token_bucket", "accepted");
        record_quota_decision("fixed_window", "exceeded");
        record_quota_conflict("token_bucket");
    }
}
