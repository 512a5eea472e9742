//! Subscriber registry and backlog bookkeeping.
//!
//! The registry maps every subscriber to its inbox sender and its backlog of
//! undelivered messages, and keeps the pending count equal to the sum of all
//! backlog lengths. It never waits: every hand-off is a non-blocking offer,
//! and a subscriber whose inbox is full simply keeps buffering.

use crate::config::OverflowPolicy;
use crate::inbox::{inbox, InboxSender, Rejected, Subscriber, SubscriberId};
use crate::metrics::{self, DropReason};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Counters produced by one publish or flush sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Sweep {
    /// Messages handed to inboxes.
    pub delivered: usize,
    /// Messages appended to backlogs.
    pub buffered: usize,
    /// Messages discarded.
    pub dropped: usize,
    /// Subscribers removed during the sweep.
    pub removed: usize,
}

/// Where a backlog stands after a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushState {
    Empty,
    Blocked,
    Gone,
}

/// Result of appending to a capped backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Append {
    Buffered,
    /// Oldest entry evicted; backlog length unchanged.
    Replaced,
    Discarded,
    Disconnect,
}

struct Slot<T> {
    inbox: InboxSender<T>,
    backlog: VecDeque<T>,
}

impl<T> Slot<T> {
    fn new(inbox: InboxSender<T>) -> Self {
        Self {
            inbox,
            backlog: VecDeque::new(),
        }
    }

    /// Hand backlog entries to the inbox, oldest first, until it refuses one.
    fn flush(&mut self) -> (usize, FlushState) {
        if self.inbox.is_closed() {
            return (0, FlushState::Gone);
        }

        let mut delivered = 0;
        while let Some(message) = self.backlog.pop_front() {
            match self.inbox.offer(message) {
                Ok(()) => delivered += 1,
                Err(Rejected::Full(message)) => {
                    self.backlog.push_front(message);
                    return (delivered, FlushState::Blocked);
                }
                Err(Rejected::Closed(message)) => {
                    self.backlog.push_front(message);
                    return (delivered, FlushState::Gone);
                }
            }
        }
        (delivered, FlushState::Empty)
    }

    fn append(&mut self, message: T, max: Option<usize>, policy: OverflowPolicy) -> Append {
        if let Some(max) = max {
            if self.backlog.len() >= max {
                return match policy {
                    OverflowPolicy::DropOldest if max > 0 => {
                        self.backlog.pop_front();
                        self.backlog.push_back(message);
                        Append::Replaced
                    }
                    OverflowPolicy::DropOldest | OverflowPolicy::DropNewest => Append::Discarded,
                    OverflowPolicy::Disconnect => Append::Disconnect,
                };
            }
        }
        self.backlog.push_back(message);
        Append::Buffered
    }
}

/// Registry of subscribers owned by the broker core.
pub(crate) struct Registry<T> {
    slots: HashMap<SubscriberId, Slot<T>>,
    pending: usize,
    next_id: u64,
    max_backlog: Option<usize>,
    overflow: OverflowPolicy,
}

impl<T: Clone> Registry<T> {
    /// Create an empty registry.
    pub(crate) fn new(max_backlog: Option<usize>, overflow: OverflowPolicy) -> Self {
        Self {
            slots: HashMap::new(),
            pending: 0,
            next_id: 1,
            max_backlog,
            overflow,
        }
    }

    /// Number of registered subscribers.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Total number of buffered messages.
    pub(crate) fn pending(&self) -> usize {
        self.pending
    }

    /// Recount the backlogs from scratch.
    pub(crate) fn backlog_total(&self) -> usize {
        self.slots.values().map(|slot| slot.backlog.len()).sum()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: SubscriberId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Create an inbox of `capacity` and register it with an empty backlog.
    pub(crate) fn register(&mut self, capacity: usize) -> Subscriber<T> {
        let id = SubscriberId::new(self.next_id);
        self.next_id += 1;

        let (sender, subscriber) = inbox(id, capacity);
        self.slots.insert(id, Slot::new(sender));
        metrics::set_subscribers(self.slots.len());
        debug!(subscriber = %id, capacity, "Subscriber registered");
        subscriber
    }

    /// Remove a subscriber and close its inbox.
    ///
    /// Returns the number of discarded backlog entries, or `None` if the id
    /// was not registered.
    pub(crate) fn remove(&mut self, id: SubscriberId, reason: DropReason) -> Option<usize> {
        let slot = self.slots.remove(&id)?;
        let discarded = slot.backlog.len();
        self.pending -= discarded;

        metrics::record_dropped(discarded, reason);
        metrics::set_subscribers(self.slots.len());
        debug!(subscriber = %id, discarded, ?reason, "Subscriber removed");
        // Dropping the slot drops the only sender, closing the inbox.
        Some(discarded)
    }

    /// Fan a message out to every subscriber.
    ///
    /// Each backlog is flushed first; the new message goes straight to the
    /// inbox only if that flush emptied the backlog, and is appended
    /// otherwise so it never overtakes older messages.
    pub(crate) fn publish(&mut self, message: T) -> Sweep {
        let mut sweep = Sweep::default();
        let mut gone = Vec::new();

        for (&id, slot) in &mut self.slots {
            let (delivered, state) = slot.flush();
            self.pending -= delivered;
            sweep.delivered += delivered;

            let message = match state {
                FlushState::Gone => {
                    sweep.dropped += 1;
                    metrics::record_dropped(1, DropReason::ConsumerGone);
                    gone.push((id, DropReason::ConsumerGone));
                    continue;
                }
                FlushState::Blocked => message.clone(),
                FlushState::Empty => match slot.inbox.offer(message.clone()) {
                    Ok(()) => {
                        sweep.delivered += 1;
                        continue;
                    }
                    Err(Rejected::Full(message)) => message,
                    Err(Rejected::Closed(_)) => {
                        sweep.dropped += 1;
                        metrics::record_dropped(1, DropReason::ConsumerGone);
                        gone.push((id, DropReason::ConsumerGone));
                        continue;
                    }
                },
            };

            match slot.append(message, self.max_backlog, self.overflow) {
                Append::Buffered => {
                    self.pending += 1;
                    sweep.buffered += 1;
                    metrics::record_buffered();
                }
                Append::Replaced => {
                    sweep.buffered += 1;
                    sweep.dropped += 1;
                    metrics::record_dropped(1, DropReason::Overflow);
                }
                Append::Discarded => {
                    sweep.dropped += 1;
                    metrics::record_dropped(1, DropReason::Overflow);
                }
                Append::Disconnect => {
                    warn!(
                        subscriber = %id,
                        backlog = slot.backlog.len(),
                        "Backlog overflow, disconnecting subscriber"
                    );
                    sweep.dropped += 1;
                    metrics::record_dropped(1, DropReason::Overflow);
                    gone.push((id, DropReason::Overflow));
                }
            }
        }

        self.reap(gone, &mut sweep);
        metrics::record_delivered(sweep.delivered);
        sweep
    }

    /// Flush every backlog without publishing anything new.
    pub(crate) fn flush_all(&mut self) -> Sweep {
        let mut sweep = Sweep::default();
        let mut gone = Vec::new();

        for (&id, slot) in &mut self.slots {
            let (delivered, state) = slot.flush();
            self.pending -= delivered;
            sweep.delivered += delivered;
            if state == FlushState::Gone {
                gone.push((id, DropReason::ConsumerGone));
            }
        }

        self.reap(gone, &mut sweep);
        metrics::record_delivered(sweep.delivered);
        sweep
    }

    /// Close every subscriber whose backlog is empty.
    ///
    /// Returns how many were closed.
    pub(crate) fn close_idle(&mut self) -> usize {
        let idle: Vec<SubscriberId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.backlog.is_empty())
            .map(|(&id, _)| id)
            .collect();

        for &id in &idle {
            self.remove(id, DropReason::Unregistered);
        }
        idle.len()
    }

    /// Close every subscriber, discarding whatever is still buffered.
    ///
    /// Returns the number of discarded messages.
    pub(crate) fn close_all(&mut self, reason: DropReason) -> usize {
        let ids: Vec<SubscriberId> = self.slots.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.remove(id, reason))
            .sum()
    }

    fn reap(&mut self, gone: Vec<(SubscriberId, DropReason)>, sweep: &mut Sweep) {
        for (id, reason) in gone {
            if let Some(discarded) = self.remove(id, reason) {
                sweep.dropped += discarded;
                sweep.removed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TryRecvError;

    fn registry() -> Registry<&'static str> {
        Registry::new(None, OverflowPolicy::default())
    }

    fn assert_consistent<T: Clone>(registry: &Registry<T>) {
        assert_eq!(registry.pending(), registry.backlog_total());
    }

    #[test]
    fn test_publish_with_room_delivers_directly() {
        let mut registry = registry();
        let mut sub = registry.register(4);

        let sweep = registry.publish("a");
        assert_eq!(sweep.delivered, 1);
        assert_eq!(sweep.buffered, 0);
        assert_eq!(registry.pending(), 0);
        assert_eq!(sub.try_recv(), Ok("a"));
    }

    #[test]
    fn test_full_inbox_buffers_then_flushes() {
        let mut registry = registry();
        let mut sub = registry.register(1);

        registry.publish("a");
        let sweep = registry.publish("b");
        assert_eq!(sweep.buffered, 1);
        assert_eq!(registry.pending(), 1);

        assert_eq!(sub.try_recv(), Ok("a"));
        let sweep = registry.flush_all();
        assert_eq!(sweep.delivered, 1);
        assert_eq!(registry.pending(), 0);
        assert_eq!(sub.try_recv(), Ok("b"));
        assert_consistent(&registry);
    }

    #[test]
    fn test_new_message_never_overtakes_backlog() {
        let mut registry = Registry::new(None, OverflowPolicy::default());
        let mut sub = registry.register(1);

        for n in 1..=3 {
            registry.publish(n);
        }
        assert_eq!(registry.pending(), 2);

        assert_eq!(sub.try_recv(), Ok(1));
        registry.publish(4);
        // 2 went out during the flush; 3 and 4 stay queued in order.
        assert_eq!(registry.pending(), 2);

        let mut received = Vec::new();
        while let Ok(n) = sub.try_recv() {
            received.push(n);
            registry.flush_all();
        }
        assert_eq!(received, vec![2, 3, 4]);
        assert_consistent(&registry);
    }

    #[test]
    fn test_slow_subscriber_does_not_hold_back_fast_one() {
        let mut registry = registry();
        let mut fast = registry.register(16);
        let _slow = registry.register(0);

        for msg in ["m1", "m2", "m3"] {
            registry.publish(msg);
        }

        assert_eq!(fast.try_recv(), Ok("m1"));
        assert_eq!(fast.try_recv(), Ok("m2"));
        assert_eq!(fast.try_recv(), Ok("m3"));
        assert_eq!(registry.pending(), 3);
        assert_consistent(&registry);
    }

    #[test]
    fn test_remove_discards_backlog_and_closes() {
        let mut registry = registry();
        let mut sub = registry.register(1);
        registry.publish("a");
        registry.publish("b");
        registry.publish("c");

        assert_eq!(registry.remove(sub.id(), DropReason::Unregistered), Some(2));
        assert_eq!(registry.pending(), 0);
        assert_eq!(registry.len(), 0);
        assert!(registry.remove(sub.id(), DropReason::Unregistered).is_none());

        assert_eq!(sub.try_recv(), Ok("a"));
        assert_eq!(sub.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let mut registry = registry();
        let sweep = registry.publish("nobody");
        assert_eq!(sweep, Sweep::default());
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_dropped_consumer_is_reaped() {
        let mut registry = registry();
        let sub = registry.register(1);
        registry.publish("a");
        registry.publish("b");
        drop(sub);

        let sweep = registry.flush_all();
        assert_eq!(sweep.removed, 1);
        assert_eq!(sweep.dropped, 1);
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_message_for_dropped_consumer_counts_as_dropped() {
        let mut registry = registry();
        let mut live = registry.register(1);
        let gone = registry.register(1);
        drop(gone);

        let sweep = registry.publish("a");
        assert_eq!(sweep.delivered, 1);
        assert_eq!(sweep.dropped, 1);
        assert_eq!(sweep.removed, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(live.try_recv(), Ok("a"));
    }

    #[test]
    fn test_close_idle_keeps_backlogged() {
        let mut registry = registry();
        let _idle = registry.register(4);
        let busy = registry.register(0);
        registry.publish("x");

        assert_eq!(registry.close_idle(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(busy.id()));

        assert_eq!(registry.close_all(DropReason::DrainTimeout), 1);
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_overflow_drop_oldest() {
        let mut registry = Registry::new(Some(2), OverflowPolicy::DropOldest);
        let mut sub = registry.register(1);
        for n in 1..=5 {
            registry.publish(n);
        }
        // Inbox holds 1, backlog capped at the two newest.
        assert_eq!(registry.pending(), 2);

        let mut received = Vec::new();
        while let Ok(n) = sub.try_recv() {
            received.push(n);
            registry.flush_all();
        }
        assert_eq!(received, vec![1, 4, 5]);
    }

    #[test]
    fn test_overflow_drop_newest() {
        let mut registry = Registry::new(Some(2), OverflowPolicy::DropNewest);
        let mut sub = registry.register(1);
        for n in 1..=5 {
            registry.publish(n);
        }
        assert_eq!(registry.pending(), 2);

        let mut received = Vec::new();
        while let Ok(n) = sub.try_recv() {
            received.push(n);
            registry.flush_all();
        }
        assert_eq!(received, vec![1, 2, 3]);
    }

    #[test]
    fn test_overflow_disconnect() {
        let mut registry = Registry::new(Some(1), OverflowPolicy::Disconnect);
        let mut sub = registry.register(1);
        registry.publish(1);
        registry.publish(2);
        let sweep = registry.publish(3);

        assert_eq!(sweep.removed, 1);
        assert_eq!(sweep.dropped, 2);
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.pending(), 0);
        assert_eq!(sub.try_recv(), Ok(1));
        assert_eq!(sub.try_recv(), Err(TryRecvError::Closed));
    }
}
