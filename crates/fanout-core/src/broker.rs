//! Client-facing broker handle.
//!
//! Every call hands a request to the core's single intake and races the
//! configured deadline; exactly one of "accepted" or "timed out" happens.
//! Once the core has stopped, calls fail fast with
//! [`BrokerError::BrokerExited`].

use crate::config::BrokerConfig;
use crate::engine::{BrokerStats, Command, Engine};
use crate::error::BrokerError;
use crate::inbox::{Subscriber, SubscriberId};
use crate::metrics;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, trace};

/// Handle to a running broker.
///
/// Cheap to clone; all clones talk to the same core task. When the last
/// clone is dropped the core drains and stops on its own.
pub struct Broker<T> {
    intake: mpsc::Sender<Command<T>>,
    timeout: Duration,
}

impl<T> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            intake: self.intake.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T> std::fmt::Debug for Broker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("timeout", &self.timeout)
            .field("stopped", &self.intake.is_closed())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Broker<T> {
    /// Start a broker where `timeout` bounds every call and paces retries.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(timeout: Duration, intake_capacity: usize) -> Self {
        Self::with_config(BrokerConfig::new(timeout, intake_capacity))
    }

    /// Start a broker with a full configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn with_config(config: BrokerConfig) -> Self {
        debug!(?config, "Creating broker");
        let (intake, rx) = mpsc::channel(config.effective_intake_capacity());
        tokio::spawn(Engine::new(&config).run(rx));

        Self {
            intake,
            timeout: config.timeout,
        }
    }

    /// Register a subscriber whose inbox holds `capacity` messages.
    ///
    /// Succeeds only once the core has confirmed the registration. If the
    /// deadline passes first the core rolls the registration back.
    ///
    /// # Errors
    ///
    /// [`BrokerError::RegistrationTimeout`] or [`BrokerError::BrokerExited`].
    pub async fn register(&self, capacity: usize) -> Result<Subscriber<T>, BrokerError> {
        let (reply, confirmed) = oneshot::channel();
        let registration = async {
            self.intake
                .send(Command::Register { capacity, reply })
                .await
                .map_err(|_| BrokerError::BrokerExited)?;
            confirmed.await.map_err(|_| BrokerError::BrokerExited)
        };

        self.bounded("register", BrokerError::RegistrationTimeout, registration)
            .await
    }

    /// Unregister a subscriber, closing its inbox and discarding anything
    /// still buffered for it.
    ///
    /// Never fails: a timeout or a stopped broker is ignored.
    pub async fn unregister(&self, id: SubscriberId) {
        let handoff = async {
            self.intake
                .send(Command::Unregister(id))
                .await
                .map_err(|_| BrokerError::BrokerExited)
        };

        if let Err(e) = self
            .bounded("unregister", BrokerError::UnregisterTimeout, handoff)
            .await
        {
            trace!(subscriber = %id, error = %e, "Unregister not delivered");
        }
    }

    /// Publish a message to every current subscriber.
    ///
    /// Acceptance means the broker now owns the message, not that any
    /// subscriber has received it.
    ///
    /// # Errors
    ///
    /// [`BrokerError::PublishTimeout`] or [`BrokerError::BrokerExited`].
    pub async fn publish(&self, message: T) -> Result<(), BrokerError> {
        let handoff = async {
            self.intake
                .send(Command::Publish(message))
                .await
                .map_err(|_| BrokerError::BrokerExited)
        };

        self.bounded("publish", BrokerError::PublishTimeout, handoff)
            .await
    }

    /// Ask the broker to drain and stop.
    ///
    /// Returns once the request is accepted; use [`stopped`](Self::stopped)
    /// to wait for the drain to finish.
    ///
    /// # Errors
    ///
    /// [`BrokerError::StopTimeout`] or [`BrokerError::BrokerExited`].
    pub async fn stop(&self) -> Result<(), BrokerError> {
        let handoff = async {
            self.intake
                .send(Command::Stop)
                .await
                .map_err(|_| BrokerError::BrokerExited)
        };

        self.bounded("stop", BrokerError::StopTimeout, handoff).await
    }

    /// Get a snapshot of broker state.
    ///
    /// # Errors
    ///
    /// [`BrokerError::StatsTimeout`] or [`BrokerError::BrokerExited`].
    pub async fn stats(&self) -> Result<BrokerStats, BrokerError> {
        let (reply, answer) = oneshot::channel();
        let query = async {
            self.intake
                .send(Command::Stats(reply))
                .await
                .map_err(|_| BrokerError::BrokerExited)?;
            answer.await.map_err(|_| BrokerError::BrokerExited)
        };

        self.bounded("stats", BrokerError::StatsTimeout, query).await
    }

    /// Wait until the core task has exited.
    pub async fn stopped(&self) {
        self.intake.closed().await;
    }

    /// Check whether the core task has exited.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.intake.is_closed()
    }

    /// Get the per-call deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<R>(
        &self,
        op: &'static str,
        on_timeout: BrokerError,
        handoff: impl Future<Output = Result<R, BrokerError>>,
    ) -> Result<R, BrokerError> {
        match time::timeout(self.timeout, handoff).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_timeout(op);
                debug!(op, timeout = ?self.timeout, "Broker call timed out");
                Err(on_timeout)
            }
        }
    }
}
