//! Error types for the broker facade and subscriber inboxes.

use thiserror::Error;

/// Broker facade errors.
///
/// Every timeout variant means the core did not accept the hand-off before
/// the configured deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Registration was not confirmed in time.
    #[error("Registration timed out")]
    RegistrationTimeout,

    /// Publish was not accepted in time.
    #[error("Publish timed out")]
    PublishTimeout,

    /// Stop request was not accepted in time.
    #[error("Stop timed out")]
    StopTimeout,

    /// Stats query was not answered in time.
    #[error("Stats query timed out")]
    StatsTimeout,

    /// Unregister was not accepted in time. Only logged, since
    /// [`Broker::unregister`](crate::Broker::unregister) never fails.
    #[error("Unregister timed out")]
    UnregisterTimeout,

    /// The broker task has already stopped.
    #[error("Broker exited")]
    BrokerExited,
}

impl BrokerError {
    /// Whether this error is a deadline expiry rather than a stopped broker.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        !matches!(self, Self::BrokerExited)
    }
}

/// Errors returned by [`Subscriber::try_recv`](crate::Subscriber::try_recv).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    /// Nothing is waiting in the inbox right now.
    #[error("Inbox empty")]
    Empty,

    /// The broker closed the inbox and every delivered message was read.
    #[error("Inbox closed")]
    Closed,
}

impl From<tokio::sync::mpsc::error::TryRecvError> for TryRecvError {
    fn from(err: tokio::sync::mpsc::error::TryRecvError) -> Self {
        match err {
            tokio::sync::mpsc::error::TryRecvError::Empty => Self::Empty,
            tokio::sync::mpsc::error::TryRecvError::Disconnected => Self::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(BrokerError::PublishTimeout.is_timeout());
        assert!(BrokerError::RegistrationTimeout.is_timeout());
        assert!(BrokerError::UnregisterTimeout.is_timeout());
        assert!(!BrokerError::BrokerExited.is_timeout());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(BrokerError::StopTimeout.to_string(), "Stop timed out");
        assert_eq!(TryRecvError::Closed.to_string(), "Inbox closed");
    }
}
