//! Relay metrics
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding application installs a recorder.
//!
//! # Metrics
//!
//! - `chatrelay_messages_total`: Counter of inbound messages by outcome
//! - `chatrelay_validation_errors_total`: Counter of rejected payloads
//! - `chatrelay_agent_calls_in_flight`: Gauge of outstanding agent calls
//! - `chatrelay_agent_duration_seconds`: Histogram of agent call duration
//! - `chatrelay_agent_errors_total`: Counter of failed agent calls by kind
//! - `chatrelay_delivery_failures_total`: Counter of failed reply emissions

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};
use std::time::Instant;

/// Record the final outcome of one inbound message
pub fn record_message(outcome: &'static str) {
    increment_counter!("chatrelay_messages_total", "outcome" => outcome);
}

/// Record a rejected inbound payload
pub fn record_validation_error() {
    increment_counter!("chatrelay_validation_errors_total");
}

/// Record a failed emission to a channel
pub fn record_delivery_failure(event: &'static str) {
    increment_counter!("chatrelay_delivery_failures_total", "event" => event);
}

/// Timer for a single agent call
///
/// Increments the in-flight gauge on creation; `finish` records duration
/// and outcome and decrements the gauge.
#[derive(Debug)]
pub struct AgentCallMetrics {
    start: Instant,
}

impl AgentCallMetrics {
    /// Start timing an agent call
    pub fn start() -> Self {
        increment_gauge!("chatrelay_agent_calls_in_flight", 1.0);
        Self {
            start: Instant::now(),
        }
    }

    /// Record completion; `error_kind` is `None` for a successful call
    pub fn finish(self, error_kind: Option<&'static str>) {
        let status = if error_kind.is_some() { "error" } else { "ok" };
        histogram!(
            "chatrelay_agent_duration_seconds",
            self.start.elapsed().as_secs_f64(),
            "status" => status
        );
        if let Some(kind) = error_kind {
            increment_counter!("chatrelay_agent_errors_total", "kind" => kind);
        }
        decrement_gauge!("chatrelay_agent_calls_in_flight", 1.0);
    }
}
