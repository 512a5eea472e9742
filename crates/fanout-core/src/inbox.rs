//! Subscriber inboxes.
//!
//! An inbox is a fixed-capacity queue between the broker core and one
//! consumer. The core holds the sending half and only ever offers messages
//! without waiting; the consumer holds a [`Subscriber`] and reads at its own
//! pace.
//!
//! A capacity of zero yields a rendezvous inbox: an offer is accepted only
//! while the consumer is parked in [`Subscriber::recv`] and nothing is queued.

use crate::error::TryRecvError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Opaque identifier of a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw numeric value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Why an offer was not accepted. The message is handed back.
#[derive(Debug)]
pub(crate) enum Rejected<T> {
    /// The inbox has no room right now.
    Full(T),
    /// The consumer dropped its [`Subscriber`].
    Closed(T),
}

/// Create an inbox pair.
pub(crate) fn inbox<T>(id: SubscriberId, capacity: usize) -> (InboxSender<T>, Subscriber<T>) {
    // tokio channels need at least one slot; a rendezvous inbox gates that
    // slot on a parked receiver instead.
    let parked = (capacity == 0).then(|| Arc::new(AtomicUsize::new(0)));
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let sender = InboxSender {
        tx,
        parked: parked.clone(),
    };
    let subscriber = Subscriber {
        id,
        capacity,
        rx,
        parked,
    };
    (sender, subscriber)
}

/// Core-side half of an inbox. Dropping it closes the inbox.
pub(crate) struct InboxSender<T> {
    tx: mpsc::Sender<T>,
    parked: Option<Arc<AtomicUsize>>,
}

impl<T> InboxSender<T> {
    /// Offer a message without waiting.
    pub(crate) fn offer(&self, message: T) -> Result<(), Rejected<T>> {
        if let Some(parked) = &self.parked {
            if self.tx.is_closed() {
                return Err(Rejected::Closed(message));
            }
            let slot_free = self.tx.capacity() == self.tx.max_capacity();
            if parked.load(Ordering::Acquire) == 0 || !slot_free {
                return Err(Rejected::Full(message));
            }
        }

        self.tx.try_send(message).map_err(|err| match err {
            TrySendError::Full(m) => Rejected::Full(m),
            TrySendError::Closed(m) => Rejected::Closed(m),
        })
    }

    /// Check whether the consumer dropped its half.
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer-side half of an inbox.
///
/// Messages arrive in publish order. [`recv`](Self::recv) returns `None`
/// once the broker has closed the inbox and everything delivered has been
/// read. Dropping a `Subscriber` unregisters it the next time the broker
/// tries to deliver to it.
pub struct Subscriber<T> {
    id: SubscriberId,
    capacity: usize,
    rx: mpsc::Receiver<T>,
    parked: Option<Arc<AtomicUsize>>,
}

impl<T> Subscriber<T> {
    /// Get the subscriber id, used to unregister.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Get the capacity requested at registration.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for the next message.
    ///
    /// Returns `None` at end-of-stream.
    pub async fn recv(&mut self) -> Option<T> {
        let _parked = self.parked.as_deref().map(Parked::enter);
        self.rx.recv().await
    }

    /// Take the next message if one is already in the inbox.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError::Empty`] if nothing is waiting and
    /// [`TryRecvError::Closed`] at end-of-stream.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.rx.try_recv().map_err(Into::into)
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Marks a consumer as parked in `recv` for as long as it lives, including
/// when the `recv` future is cancelled.
struct Parked<'a>(&'a AtomicUsize);

impl<'a> Parked<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
