//! Simulator configuration.
//!
//! Configuration is layered, later sources winning:
//! - built-in defaults
//! - a TOML file (explicit path, or the first of the default locations)
//! - environment variables (`FANOUT__BROKER__TIMEOUT_MS=250`, ...)

use anyhow::{Context, Result};
use fanout_core::{BrokerConfig, OverflowPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file locations, searched in order.
const CONFIG_PATHS: [&str; 3] = [
    "fanout.toml",
    "/etc/fanout/fanout.toml",
    "~/.config/fanout/fanout.toml",
];

/// Simulator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker settings.
    #[serde(default)]
    pub broker: BrokerSection,

    /// Producer and consumer settings.
    #[serde(default)]
    pub workload: WorkloadConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Broker settings. Durations are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    /// Deadline for every broker call.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Intake buffer size.
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,

    /// Retry timer period; defaults to `timeout_ms`.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: Option<u64>,

    /// Upper bound on draining at shutdown.
    #[serde(default)]
    pub drain_timeout_ms: Option<u64>,

    /// Per-subscriber backlog cap.
    #[serde(default)]
    pub max_backlog: Option<usize>,

    /// Policy when the cap is hit.
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// Workload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Number of messages to publish.
    #[serde(default = "default_messages")]
    pub messages: u64,

    /// Payload size in bytes (at least 8, the sequence number).
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,

    /// Pause between publishes in microseconds.
    #[serde(default)]
    pub publish_interval_us: u64,

    /// Consumers to register before publishing.
    #[serde(default = "default_consumers")]
    pub consumers: Vec<ConsumerConfig>,
}

/// One simulated consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Name used in logs and the report.
    pub name: String,

    /// Inbox capacity.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Time spent on each message in milliseconds.
    #[serde(default)]
    pub read_delay_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_timeout() -> u64 {
    100
}

fn default_intake_capacity() -> usize {
    16
}

fn default_retry_interval() -> Option<u64> {
    Some(10)
}

fn default_messages() -> u64 {
    1_000
}

fn default_payload_size() -> usize {
    64
}

fn default_capacity() -> usize {
    16
}

fn default_consumers() -> Vec<ConsumerConfig> {
    vec![
        ConsumerConfig {
            name: "fast".to_string(),
            capacity: 64,
            read_delay_ms: 0,
        },
        ConsumerConfig {
            name: "slow".to_string(),
            capacity: 16,
            read_delay_ms: 1,
        },
    ]
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout(),
            intake_capacity: default_intake_capacity(),
            retry_interval_ms: default_retry_interval(),
            drain_timeout_ms: None,
            max_backlog: None,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            messages: default_messages(),
            payload_size: default_payload_size(),
            publish_interval_us: 0,
            consumers: default_consumers(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl BrokerSection {
    /// Convert to the broker's own configuration.
    #[must_use]
    pub fn to_broker_config(&self) -> BrokerConfig {
        let mut config = BrokerConfig::new(
            Duration::from_millis(self.timeout_ms),
            self.intake_capacity,
        );
        if let Some(interval) = self.retry_interval_ms {
            config = config.with_retry_interval(Duration::from_millis(interval));
        }
        if let Some(timeout) = self.drain_timeout_ms {
            config = config.with_drain_timeout(Duration::from_millis(timeout));
        }
        if let Some(max) = self.max_backlog {
            config = config.with_max_backlog(max, self.overflow);
        }
        config
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default location
    /// that exists, with environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, or if any source
    /// cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_default_file(),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Loading config file");
            builder = builder.add_source(config::File::from(file.as_path()).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("FANOUT")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().with_context(|| match &file {
            Some(file) => format!("Failed to read config file: {}", file.display()),
            None => "Failed to read configuration".to_string(),
        })?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    fn find_default_file() -> Option<PathBuf> {
        CONFIG_PATHS.iter().find_map(|path| {
            let expanded = PathBuf::from(shellexpand::tilde(path).as_ref());
            expanded.exists().then_some(expanded)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker.timeout_ms, 100);
        assert_eq!(config.workload.consumers.len(), 2);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [broker]
            timeout_ms = 50
            drain_timeout_ms = 2000
            max_backlog = 128
            overflow = "disconnect"

            [[workload.consumers]]
            name = "only"
            capacity = 0
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.broker.timeout_ms, 50);
        assert_eq!(config.broker.retry_interval_ms, Some(10));
        assert_eq!(config.broker.overflow, OverflowPolicy::Disconnect);
        assert_eq!(config.workload.messages, 1_000);
        assert_eq!(config.workload.consumers.len(), 1);
        assert_eq!(config.workload.consumers[0].capacity, 0);
    }

    #[test]
    fn test_to_broker_config() {
        let section = BrokerSection {
            timeout_ms: 40,
            intake_capacity: 8,
            retry_interval_ms: None,
            drain_timeout_ms: Some(500),
            max_backlog: Some(3),
            overflow: OverflowPolicy::DropNewest,
        };

        let config = section.to_broker_config();
        assert_eq!(config.timeout, Duration::from_millis(40));
        assert_eq!(config.retry_interval, Duration::from_millis(40));
        assert_eq!(config.drain_timeout, Some(Duration::from_millis(500)));
        assert_eq!(config.max_backlog, Some(3));
        assert_eq!(config.overflow, OverflowPolicy::DropNewest);
    }

    #[test]
    fn test_layered_sources() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                "[workload]\nmessages = 5",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let config: Config = settings.try_deserialize().unwrap();
        assert_eq!(config.workload.messages, 5);
        assert_eq!(config.broker.intake_capacity, 16);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/fanout.toml")));
        assert!(result.is_err());
    }
}
