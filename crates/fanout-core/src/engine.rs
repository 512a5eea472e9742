//! The broker core.
//!
//! A single task owns the registry and processes one command at a time, so
//! every register, unregister, publish, timer fire and stop is totally
//! ordered without locks. Invariants checked after every event:
//!
//! - the pending count equals the sum of all backlog lengths;
//! - the retry timer is armed exactly when the pending count is positive.

use crate::config::BrokerConfig;
use crate::inbox::{Subscriber, SubscriberId};
use crate::metrics::{self, DropReason};
use crate::registry::{Registry, Sweep};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

/// Requests accepted by the core's intake.
pub(crate) enum Command<T> {
    Register {
        capacity: usize,
        reply: oneshot::Sender<Subscriber<T>>,
    },
    Unregister(SubscriberId),
    Publish(T),
    Stop,
    Stats(oneshot::Sender<BrokerStats>),
}

/// Broker lifecycle. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Accepting and delivering.
    Running,
    /// Stop requested; flushing backlogs and closing emptied subscribers.
    Draining,
    /// Terminal; the core task has exited.
    Stopped,
}

/// Snapshot of broker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Registered subscribers.
    pub subscribers: usize,
    /// Messages buffered across all backlogs.
    pub pending: usize,
    /// Whether the retry timer is armed.
    pub retry_armed: bool,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Messages accepted.
    pub published: u64,
    /// Messages handed to inboxes, counted once per subscriber.
    pub delivered: u64,
    /// Messages discarded, counted once per subscriber.
    pub dropped: u64,
}

pub(crate) struct Engine<T> {
    registry: Registry<T>,
    state: LifecycleState,
    retry_at: Option<Instant>,
    retry_interval: Duration,
    drain_timeout: Option<Duration>,
    drain_deadline: Option<Instant>,
    published: u64,
    delivered: u64,
    dropped: u64,
}

impl<T: Clone + Send + 'static> Engine<T> {
    pub(crate) fn new(config: &BrokerConfig) -> Self {
        Self {
            registry: Registry::new(config.max_backlog, config.overflow),
            state: LifecycleState::Running,
            retry_at: None,
            retry_interval: config.retry_interval,
            drain_timeout: config.drain_timeout,
            drain_deadline: None,
            published: 0,
            delivered: 0,
            dropped: 0,
        }
    }

    /// Run until stopped.
    ///
    /// If every facade handle is dropped the intake closes; that is treated
    /// as a stop request and the loop keeps running on the retry timer alone.
    pub(crate) async fn run(mut self, mut intake: mpsc::Receiver<Command<T>>) {
        info!(retry_interval = ?self.retry_interval, "Broker started");
        let mut intake_open = true;

        while self.state != LifecycleState::Stopped {
            let retry_at = self.retry_at;

            tokio::select! {
                command = intake.recv(), if intake_open => match command {
                    Some(command) => self.handle(command),
                    None => {
                        debug!("All broker handles dropped");
                        intake_open = false;
                        self.on_stop();
                    }
                },
                () = time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.on_retry();
                }
                else => self.finish(DropReason::Unregistered),
            }

            self.after_event();
        }

        info!(
            published = self.published,
            delivered = self.delivered,
            dropped = self.dropped,
            "Broker stopped"
        );
    }

    pub(crate) fn handle(&mut self, command: Command<T>) {
        match command {
            Command::Register { capacity, reply } => self.on_register(capacity, reply),
            Command::Unregister(id) => self.on_unregister(id),
            Command::Publish(message) => self.on_publish(message),
            Command::Stop => self.on_stop(),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Drain continuation, timer sync and invariant checks; runs after
    /// every event.
    pub(crate) fn after_event(&mut self) {
        if self.state == LifecycleState::Draining {
            self.continue_drain();
        }
        self.sync_retry_timer();

        debug_assert_eq!(self.registry.pending(), self.registry.backlog_total());
        debug_assert_eq!(self.retry_at.is_some(), self.registry.pending() > 0);

        metrics::set_pending(self.registry.pending());
    }

    pub(crate) fn stats(&self) -> BrokerStats {
        BrokerStats {
            subscribers: self.registry.len(),
            pending: self.registry.pending(),
            retry_armed: self.retry_at.is_some(),
            state: self.state,
            published: self.published,
            delivered: self.delivered,
            dropped: self.dropped,
        }
    }

    fn on_register(&mut self, capacity: usize, reply: oneshot::Sender<Subscriber<T>>) {
        let subscriber = self.registry.register(capacity);
        let id = subscriber.id();

        if reply.send(subscriber).is_err() {
            // The caller gave up before the confirmation arrived.
            self.registry.remove(id, DropReason::Unregistered);
            debug!(subscriber = %id, "Registration abandoned, rolled back");
        }
    }

    fn on_unregister(&mut self, id: SubscriberId) {
        match self.registry.remove(id, DropReason::Unregistered) {
            Some(discarded) => self.dropped += discarded as u64,
            None => trace!(subscriber = %id, "Unregister for unknown subscriber"),
        }
    }

    fn on_publish(&mut self, message: T) {
        self.published += 1;
        metrics::record_published();

        let sweep = self.registry.publish(message);
        self.account(sweep);
        trace!(
            delivered = sweep.delivered,
            buffered = sweep.buffered,
            pending = self.registry.pending(),
            "Published"
        );
    }

    fn on_retry(&mut self) {
        self.retry_at = None;
        let sweep = self.registry.flush_all();
        self.account(sweep);
        trace!(
            delivered = sweep.delivered,
            pending = self.registry.pending(),
            "Retry flush"
        );

        if self.state == LifecycleState::Draining
            && self
                .drain_deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
        {
            warn!(
                subscribers = self.registry.len(),
                pending = self.registry.pending(),
                "Drain timeout elapsed, closing remaining subscribers"
            );
            self.finish(DropReason::DrainTimeout);
        }
    }

    fn on_stop(&mut self) {
        match self.state {
            LifecycleState::Running => {
                self.state = LifecycleState::Draining;
                self.drain_deadline = self.drain_timeout.map(|timeout| Instant::now() + timeout);
                info!(
                    subscribers = self.registry.len(),
                    pending = self.registry.pending(),
                    "Stop requested, draining"
                );

                let sweep = self.registry.flush_all();
                self.account(sweep);
            }
            LifecycleState::Draining => debug!("Stop already in progress"),
            LifecycleState::Stopped => {}
        }
    }

    fn continue_drain(&mut self) {
        let closed = self.registry.close_idle();
        if closed > 0 {
            debug!(closed, remaining = self.registry.len(), "Closed drained subscribers");
        }
        if self.registry.pending() == 0 {
            self.finish(DropReason::Unregistered);
        }
    }

    /// Close everything left and become `Stopped`.
    fn finish(&mut self, reason: DropReason) {
        self.dropped += self.registry.close_all(reason) as u64;
        self.state = LifecycleState::Stopped;
    }

    /// Arm the timer while anything is pending. While draining it never
    /// fires later than the drain deadline.
    fn sync_retry_timer(&mut self) {
        if self.registry.pending() == 0 {
            self.retry_at = None;
            return;
        }

        let mut next = self
            .retry_at
            .unwrap_or_else(|| Instant::now() + self.retry_interval);
        if self.state == LifecycleState::Draining {
            if let Some(deadline) = self.drain_deadline {
                next = next.min(deadline);
            }
        }
        self.retry_at = Some(next);
    }

    fn account(&mut self, sweep: Sweep) {
        self.delivered += sweep.delivered as u64;
        self.dropped += sweep.dropped as u64;
    }
}
