//! Shared setup for the fanout benchmarks.

use bytes::Bytes;
use fanout_core::{Broker, BrokerConfig, Subscriber};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

/// Deadline used by every benchmark broker.
pub const TIMEOUT: Duration = Duration::from_millis(500);

/// Build a multi-threaded runtime for driving the broker.
///
/// # Panics
///
/// Panics if the runtime cannot be created.
#[must_use]
pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

/// A 64-byte payload.
#[must_use]
pub fn payload() -> Bytes {
    Bytes::from(vec![0u8; 64])
}

/// Start a broker with `readers` subscribers that read as fast as they can.
///
/// Each reader task returns how many messages it saw.
///
/// # Panics
///
/// Panics if registration fails.
pub async fn broker_with_readers(
    readers: usize,
    capacity: usize,
) -> (Broker<Bytes>, Vec<JoinHandle<u64>>) {
    let broker = Broker::with_config(
        BrokerConfig::new(TIMEOUT, 1024).with_retry_interval(Duration::from_millis(1)),
    );

    let mut handles = Vec::with_capacity(readers);
    for _ in 0..readers {
        let subscriber = broker.register(capacity).await.expect("register failed");
        handles.push(tokio::spawn(read_all(subscriber)));
    }
    (broker, handles)
}

/// Stop the broker and wait for every reader to see end-of-stream.
///
/// # Panics
///
/// Panics if the broker already exited or a reader task panicked.
pub async fn shutdown(broker: Broker<Bytes>, readers: Vec<JoinHandle<u64>>) -> u64 {
    broker.stop().await.expect("stop failed");
    broker.stopped().await;

    let mut total = 0;
    for reader in readers {
        total += reader.await.expect("reader panicked");
    }
    total
}

async fn read_all(mut subscriber: Subscriber<Bytes>) -> u64 {
    let mut count = 0;
    while subscriber.recv().await.is_some() {
        count += 1;
    }
    count
}
