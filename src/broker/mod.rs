use anyhow::Result;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::compression::CompressionCodec;

pub mod kafka;
pub mod loopback;

pub use kafka::KafkaBroker;
pub use loopback::{LoopbackBroker, LoopbackOptions, SessionEvent};

/// Desired state of one topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
    /// Topic-level options such as `retention.ms` or `cleanup.policy`
    pub configs: BTreeMap<String, String>,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: u32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor: 1,
            configs: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.configs.insert(key.to_string(), value.to_string());
        self
    }
}

/// Result of a create-topic request that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Producer tuning for a single run. One instance drives exactly one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Batch-size threshold in bytes
    pub batch_size: usize,
    pub linger_ms: u64,
    pub compression: CompressionCodec,
}

impl ProducerConfig {
    pub fn new(batch_size: usize, linger_ms: u64, compression: CompressionCodec) -> Self {
        Self {
            batch_size,
            linger_ms,
            compression,
        }
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

impl std::fmt::Display for ProducerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch.size={}B linger.ms={} compression={}",
            self.batch_size, self.linger_ms, self.compression
        )
    }
}

/// Why a record was not acknowledged
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("acknowledgment timed out")]
    TimedOut,
    #[error("{0}")]
    Rejected(String),
}

/// Broker confirmation that a record was durably accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgment {
    pub partition: i32,
    pub offset: i64,
}

/// Connection settings shared by every session of one invocation
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bootstrap address (host:port), constant for the process lifetime
    pub bootstrap: String,
    /// Upper bound on a single acknowledgment wait
    pub ack_timeout: Duration,
    /// `acks` producer setting
    pub acks: String,
    pub client_id: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap: crate::defaults::BOOTSTRAP.to_string(),
            ack_timeout: crate::defaults::ACK_TIMEOUT,
            acks: "1".to_string(),
            client_id: "producer-sweep".to_string(),
        }
    }
}

/// An open producer handle. Exclusively owned by one run.
#[async_trait]
pub trait ProducerSession: Send {
    /// Submit one record and resolve once the broker acknowledges it.
    ///
    /// The caller bounds this with the acknowledgment timeout; an
    /// implementation may also fail on its own (e.g. delivery errors).
    async fn send(
        &mut self,
        topic: &str,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> std::result::Result<Acknowledgment, SendError>;

    /// Force any buffered records out.
    async fn flush(&mut self, timeout: Duration) -> Result<()>;

    /// Wait until no requests are in flight. Returns `false` on timeout.
    async fn drain(&mut self, timeout: Duration) -> Result<bool>;

    /// Compressed bytes the session put on the wire, if the transport knows.
    fn wire_bytes(&self) -> Option<u64> {
        None
    }

    /// Release the session. Called exactly once, on every exit path.
    async fn close(&mut self) -> Result<()>;
}

/// Administrative and producer access to one cluster
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create a topic. "Already exists" is an outcome, not an error.
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome>;

    /// Partition count of an existing topic, `None` if it is unknown.
    async fn partition_count(&self, topic: &str) -> Result<Option<u32>>;

    async fn open_session(&self, config: &ProducerConfig) -> Result<Box<dyn ProducerSession>>;

    fn name(&self) -> &'static str;
}

/// Broker implementations selectable from the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// A real Kafka-protocol cluster
    #[clap(name = "kafka")]
    Kafka,
    /// In-process simulated broker, no network
    #[clap(name = "loopback")]
    Loopback,
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerKind::Kafka => write!(f, "kafka"),
            BrokerKind::Loopback => write!(f, "loopback"),
        }
    }
}

/// Broker factory
pub struct BrokerFactory;

impl BrokerFactory {
    pub fn create(kind: BrokerKind, config: &BrokerConfig) -> Result<Arc<dyn Broker>> {
        match kind {
            BrokerKind::Kafka => Ok(Arc::new(KafkaBroker::connect(config.clone())?)),
            BrokerKind::Loopback => Ok(Arc::new(LoopbackBroker::new(LoopbackOptions::default()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_spec_builder() {
        let spec = TopicSpec::new("hydro-analytics", 8)
            .with_config("retention.ms", "31536000000")
            .with_config("cleanup.policy", "delete");
        assert_eq!(spec.partitions, 8);
        assert_eq!(spec.replication_factor, 1);
        assert_eq!(spec.configs.len(), 2);
        assert_eq!(spec.configs["cleanup.policy"], "delete");
    }

    #[test]
    fn test_producer_config_display() {
        let config = ProducerConfig::new(16384, 0, CompressionCodec::Lz4);
        assert_eq!(
            config.to_string(),
            "batch.size=16384B linger.ms=0 compression=lz4"
        );
        assert_eq!(config.linger(), Duration::ZERO);
    }

    #[test]
    fn test_broker_config_default() {
        let config = BrokerConfig::default();
        assert_eq!(config.bootstrap, "localhost:9092");
        assert_eq!(config.ack_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_factory_builds_loopback() {
        let broker = BrokerFactory::create(BrokerKind::Loopback, &BrokerConfig::default()).unwrap();
        assert_eq!(broker.name(), "loopback");
    }
}
