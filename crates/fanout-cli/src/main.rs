//! # fanout
//!
//! Drives an in-process fanout broker with a configurable set of producers
//! and consumers, then prints what each consumer received.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! fanout
//!
//! # Run with a config file
//! fanout /path/to/fanout.toml
//!
//! # Override settings from the environment
//! FANOUT__WORKLOAD__MESSAGES=100000 FANOUT__BROKER__MAX_BACKLOG=512 fanout
//! ```

mod config;
mod metrics;
mod workload;

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanout=info,fanout_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FANOUT_CONFIG").ok())
        .map(PathBuf::from);
    let config = config::Config::load(path.as_deref())?;

    tracing::info!(
        timeout_ms = config.broker.timeout_ms,
        consumers = config.workload.consumers.len(),
        "Starting fanout simulation"
    );

    if config.metrics.enabled {
        metrics::start_exporter(config.metrics.port)?;
    }

    let report = workload::run(&config).await?;
    print!("{report}");

    Ok(())
}
