//! Broker configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default facade deadline and retry interval.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Default intake buffer size.
pub const DEFAULT_INTAKE_CAPACITY: usize = 16;

/// What to do when a subscriber's backlog is at its cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest buffered message to make room.
    #[default]
    DropOldest,
    /// Discard the message being published.
    DropNewest,
    /// Unregister the subscriber, discarding its backlog.
    Disconnect,
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Deadline for every facade hand-off.
    pub timeout: Duration,
    /// Intake buffer size (at least 1).
    pub intake_capacity: usize,
    /// Period of the retry timer, both while running and while draining.
    pub retry_interval: Duration,
    /// Upper bound on draining; `None` waits until every backlog empties.
    pub drain_timeout: Option<Duration>,
    /// Per-subscriber backlog cap; `None` is unbounded.
    pub max_backlog: Option<usize>,
    /// Policy applied when a backlog reaches `max_backlog`.
    pub overflow: OverflowPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_INTAKE_CAPACITY)
    }
}

impl BrokerConfig {
    /// Create a configuration where `timeout` also sets the retry interval.
    #[must_use]
    pub fn new(timeout: Duration, intake_capacity: usize) -> Self {
        Self {
            timeout,
            intake_capacity,
            retry_interval: timeout,
            drain_timeout: None,
            max_backlog: None,
            overflow: OverflowPolicy::default(),
        }
    }

    /// Set the retry timer period.
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Bound how long a stop may spend draining.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Cap every backlog and choose what happens on overflow.
    #[must_use]
    pub fn with_max_backlog(mut self, max: usize, policy: OverflowPolicy) -> Self {
        self.max_backlog = Some(max);
        self.overflow = policy;
        self
    }

    /// Intake capacity as used by the channel.
    pub(crate) fn effective_intake_capacity(&self) -> usize {
        self.intake_capacity.max(1)
    }
}
