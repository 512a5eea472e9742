//! # fanout-core
//!
//! In-process publish/subscribe broker.
//!
//! A single broker task fans every published message out to any number of
//! independently paced subscribers:
//!
//! - **Broker** - cloneable handle; every call is bounded by a deadline
//! - **Engine** - the task that owns all state and processes one event at a time
//! - **Registry** - per-subscriber backlogs and the pending count
//! - **Subscriber** - the consumer's fixed-capacity inbox
//!
//! A subscriber whose inbox is full never blocks the producer or any other
//! subscriber; its messages wait in a backlog owned by the broker and are
//! retried on a timer, always in publish order. Stopping the broker drains
//! those backlogs before closing the inboxes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  publish   ┌──────────┐  try_send  ┌────────────┐
//! │ Producer │───────────▶│  Engine  │───────────▶│ Subscriber │
//! └──────────┘  (intake)  └──────────┘            └────────────┘
//!                               │ full
//!                               ▼
//!                         ┌──────────┐
//!                         │ Backlog  │◀── retry timer
//!                         └──────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use fanout_core::Broker;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), fanout_core::BrokerError> {
//! let broker = Broker::new(Duration::from_millis(50), 16);
//! let mut sub = broker.register(8).await?;
//!
//! broker.publish("hello").await?;
//! assert_eq!(sub.recv().await, Some("hello"));
//!
//! broker.stop().await?;
//! broker.stopped().await;
//! assert_eq!(sub.recv().await, None);
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod inbox;
pub mod metrics;
mod registry;

pub use broker::Broker;
pub use config::{BrokerConfig, OverflowPolicy};
pub use engine::{BrokerStats, LifecycleState};
pub use error::{BrokerError, TryRecvError};
pub use inbox::{Subscriber, SubscriberId};
