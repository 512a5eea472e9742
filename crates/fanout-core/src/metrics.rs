//! Broker instrumentation.
//!
//! Uses the `metrics` facade; nothing is recorded until the application
//! installs a recorder (the `fanout` binary installs a Prometheus exporter).

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const MESSAGES_PUBLISHED: &str = "fanout_messages_published_total";
    pub const MESSAGES_DELIVERED: &str = "fanout_messages_delivered_total";
    pub const MESSAGES_BUFFERED: &str = "fanout_messages_buffered_total";
    pub const MESSAGES_DROPPED: &str = "fanout_messages_dropped_total";
    pub const FACADE_TIMEOUTS: &str = "fanout_facade_timeouts_total";
    pub const PENDING_MESSAGES: &str = "fanout_pending_messages";
    pub const SUBSCRIBERS_ACTIVE: &str = "fanout_subscribers_active";
}

/// Why a message was discarded without delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Subscriber was unregistered with a non-empty backlog.
    Unregistered,
    /// Consumer dropped its inbox.
    ConsumerGone,
    /// Backlog cap was hit.
    Overflow,
    /// Drain deadline forced the subscriber closed.
    DrainTimeout,
}

impl DropReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::ConsumerGone => "consumer_gone",
            Self::Overflow => "overflow",
            Self::DrainTimeout => "drain_timeout",
        }
    }
}

/// Describe all broker metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(names::MESSAGES_PUBLISHED, "Messages accepted by the broker");
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED,
        "Messages handed to a subscriber inbox"
    );
    metrics::describe_counter!(
        names::MESSAGES_BUFFERED,
        "Messages appended to a subscriber backlog"
    );
    metrics::describe_counter!(
        names::MESSAGES_DROPPED,
        "Messages discarded without delivery"
    );
    metrics::describe_counter!(
        names::FACADE_TIMEOUTS,
        "Facade calls that hit their deadline"
    );
    metrics::describe_gauge!(
        names::PENDING_MESSAGES,
        "Messages currently buffered across all backlogs"
    );
    metrics::describe_gauge!(names::SUBSCRIBERS_ACTIVE, "Registered subscribers");
}

pub(crate) fn record_published() {
    counter!(names::MESSAGES_PUBLISHED).increment(1);
}

pub(crate) fn record_delivered(count: usize) {
    if count > 0 {
        counter!(names::MESSAGES_DELIVERED).increment(count as u64);
    }
}

pub(crate) fn record_buffered() {
    counter!(names::MESSAGES_BUFFERED).increment(1);
}

pub(crate) fn record_dropped(count: usize, reason: DropReason) {
    if count > 0 {
        counter!(names::MESSAGES_DROPPED, "reason" => reason.as_str()).increment(count as u64);
    }
}

pub(crate) fn record_timeout(op: &'static str) {
    counter!(names::FACADE_TIMEOUTS, "op" => op).increment(1);
}

pub(crate) fn set_pending(pending: usize) {
    gauge!(names::PENDING_MESSAGES).set(pending as f64);
}

pub(crate) fn set_subscribers(count: usize) {
    gauge!(names::SUBSCRIBERS_ACTIVE).set(count as f64);
}
