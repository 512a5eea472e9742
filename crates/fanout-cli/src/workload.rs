//! Simulated producer and consumers.
//!
//! One producer publishes numbered payloads as fast as allowed; each
//! consumer reads at its configured pace and checks that sequence numbers
//! only ever increase.

use crate::config::{Config, ConsumerConfig};
use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use fanout_core::{Broker, BrokerStats, Subscriber};
use std::fmt;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Outcome of a simulation run.
#[derive(Debug)]
pub struct Report {
    /// Messages accepted by the broker.
    pub published: u64,
    /// Publishes that hit the deadline.
    pub publish_timeouts: u64,
    /// Broker state just before stopping.
    pub stats: Option<BrokerStats>,
    /// Per-consumer results.
    pub consumers: Vec<ConsumerReport>,
    /// Time from first publish until the broker stopped.
    pub elapsed: Duration,
}

/// What one consumer saw.
#[derive(Debug, Clone)]
pub struct ConsumerReport {
    /// Consumer name.
    pub name: String,
    /// Messages received.
    pub received: u64,
    /// Whether every sequence number was larger than the previous one.
    pub in_order: bool,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "published {} messages in {:.3?} ({} timeouts)",
            self.published, self.elapsed, self.publish_timeouts
        )?;
        if let Some(stats) = &self.stats {
            writeln!(
                f,
                "at stop: {} subscribers, {} pending, {} delivered, {} dropped",
                stats.subscribers, stats.pending, stats.delivered, stats.dropped
            )?;
        }
        for consumer in &self.consumers {
            writeln!(
                f,
                "  {:<12} received {:>8}  {}",
                consumer.name,
                consumer.received,
                if consumer.in_order { "in order" } else { "OUT OF ORDER" }
            )?;
        }
        Ok(())
    }
}

/// Run the configured workload to completion.
///
/// # Errors
///
/// Returns an error if a consumer cannot be registered or the broker exits
/// before the run is over.
pub async fn run(config: &Config) -> Result<Report> {
    let workload = &config.workload;
    let broker: Broker<Bytes> = Broker::with_config(config.broker.to_broker_config());

    let mut readers = Vec::with_capacity(workload.consumers.len());
    for consumer in &workload.consumers {
        let subscriber = broker
            .register(consumer.capacity)
            .await
            .with_context(|| format!("Failed to register consumer {}", consumer.name))?;
        debug!(consumer = %consumer.name, subscriber = %subscriber.id(), "Consumer registered");
        readers.push(tokio::spawn(consume(consumer.clone(), subscriber)));
    }

    info!(
        messages = workload.messages,
        consumers = workload.consumers.len(),
        "Starting workload"
    );

    let start = Instant::now();
    let interval = Duration::from_micros(workload.publish_interval_us);
    let mut published = 0;
    let mut publish_timeouts = 0;

    for seq in 0..workload.messages {
        match broker.publish(payload(seq, workload.payload_size)).await {
            Ok(()) => published += 1,
            Err(e) if e.is_timeout() => {
                publish_timeouts += 1;
                warn!(seq, "Publish timed out");
            }
            Err(e) => return Err(e).context("Broker exited during publish"),
        }
        if !interval.is_zero() {
            time::sleep(interval).await;
        }
    }

    let stats = broker.stats().await.ok();
    broker.stop().await.context("Failed to stop broker")?;
    broker.stopped().await;
    let elapsed = start.elapsed();

    let mut consumers = Vec::with_capacity(readers.len());
    for reader in readers {
        consumers.push(reader.await.context("Consumer task failed")?);
    }

    Ok(Report {
        published,
        publish_timeouts,
        stats,
        consumers,
        elapsed,
    })
}

async fn consume(config: ConsumerConfig, mut subscriber: Subscriber<Bytes>) -> ConsumerReport {
    let delay = Duration::from_millis(config.read_delay_ms);
    let mut received = 0;
    let mut last = None;
    let mut in_order = true;

    while let Some(message) = subscriber.recv().await {
        if let Some(seq) = sequence(&message) {
            if last.is_some_and(|prev| seq <= prev) {
                in_order = false;
            }
            last = Some(seq);
        }
        received += 1;
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
    }

    debug!(consumer = %config.name, received, "Consumer finished");
    ConsumerReport {
        name: config.name,
        received,
        in_order,
    }
}

/// Build a payload carrying `seq` in its first eight bytes.
fn payload(seq: u64, size: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(size.max(8));
    buf.put_u64(seq);
    buf.resize(size.max(8), 0);
    buf.freeze()
}

fn sequence(payload: &Bytes) -> Option<u64> {
    (payload.len() >= 8).then(|| payload.clone().get_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkloadConfig;

    #[test]
    fn test_payload_carries_sequence() {
        let p = payload(42, 64);
        assert_eq!(p.len(), 64);
        assert_eq!(sequence(&p), Some(42));

        let short = payload(7, 0);
        assert_eq!(short.len(), 8);
        assert_eq!(sequence(&short), Some(7));
        assert_eq!(sequence(&Bytes::from_static(b"abc")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_consumer_receives_everything_in_order() {
        let mut config = Config::default();
        config.workload = WorkloadConfig {
            messages: 200,
            payload_size: 16,
            publish_interval_us: 0,
            consumers: vec![
                ConsumerConfig {
                    name: "fast".to_string(),
                    capacity: 32,
                    read_delay_ms: 0,
                },
                ConsumerConfig {
                    name: "slow".to_string(),
                    capacity: 2,
                    read_delay_ms: 3,
                },
                ConsumerConfig {
                    name: "rendezvous".to_string(),
                    capacity: 0,
                    read_delay_ms: 0,
                },
            ],
        };

        let report = run(&config).await.unwrap();
        assert_eq!(report.published, 200);
        assert_eq!(report.publish_timeouts, 0);
        for consumer in &report.consumers {
            assert_eq!(consumer.received, 200, "{}", consumer.name);
            assert!(consumer.in_order, "{}", consumer.name);
        }
        assert!(report.to_string().contains("published 200 messages"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capped_backlog_drops_for_slow_consumer() {
        let mut config = Config::default();
        config.broker.max_backlog = Some(4);
        config.workload.messages = 100;
        config.workload.consumers = vec![ConsumerConfig {
            name: "lagging".to_string(),
            capacity: 1,
            read_delay_ms: 50,
        }];

        let report = run(&config).await.unwrap();
        let consumer = &report.consumers[0];
        assert!(consumer.received < 100);
        assert!(consumer.in_order);
    }
}
