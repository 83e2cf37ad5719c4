//! Kafka-protocol broker access through librdkafka.
//!
//! Topic creation goes through the admin API; each run gets its own
//! `FutureProducer`, configured from the run's [`ProducerConfig`] and torn
//! down when the run closes its session.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

use super::{
    Acknowledgment, Broker, BrokerConfig, CreateOutcome, ProducerConfig, ProducerSession,
    SendError, TopicSpec,
};

const ADMIN_TIMEOUT: Duration = Duration::from_secs(30);
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct KafkaBroker {
    config: BrokerConfig,
    admin: Arc<AdminClient<DefaultClientContext>>,
}

impl KafkaBroker {
    /// Build the admin client. No network traffic happens until the first
    /// request, so an unreachable cluster surfaces during provisioning.
    pub fn connect(config: BrokerConfig) -> Result<Self> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap)
            .set("client.id", format!("{}-admin", config.client_id))
            .create()
            .context("Failed to create Kafka admin client")?;

        Ok(Self {
            config,
            admin: Arc::new(admin),
        })
    }

    fn producer_client_config(&self, producer: &ProducerConfig) -> ClientConfig {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", &self.config.bootstrap)
            .set("client.id", &self.config.client_id)
            .set("acks", &self.config.acks)
            .set("batch.size", producer.batch_size.to_string())
            .set("linger.ms", producer.linger_ms.to_string())
            .set("compression.type", producer.compression.as_str())
            .set(
                "message.timeout.ms",
                self.config.ack_timeout.as_millis().to_string(),
            );
        client
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome> {
        let mut new_topic = NewTopic::new(
            &spec.name,
            spec.partitions as i32,
            TopicReplication::Fixed(spec.replication_factor as i32),
        );
        for (key, value) in &spec.configs {
            new_topic = new_topic.set(key, value);
        }

        let options = AdminOptions::new()
            .operation_timeout(Some(ADMIN_TIMEOUT))
            .request_timeout(Some(ADMIN_TIMEOUT));

        let results = tokio::time::timeout(
            ADMIN_TIMEOUT + Duration::from_secs(5),
            self.admin.create_topics(&[new_topic], &options),
        )
        .await
        .with_context(|| {
            format!(
                "Topic creation timed out - is the broker at {} reachable?",
                self.config.bootstrap
            )
        })?
        .context("Create-topics request failed")?;

        match results.into_iter().next() {
            Some(Ok(_)) => Ok(CreateOutcome::Created),
            Some(Err((_, RDKafkaErrorCode::TopicAlreadyExists))) => Ok(CreateOutcome::AlreadyExists),
            Some(Err((topic, code))) => Err(anyhow::anyhow!("{}: {}", topic, code)),
            None => Err(anyhow::anyhow!("broker returned no result for '{}'", spec.name)),
        }
    }

    async fn partition_count(&self, topic: &str) -> Result<Option<u32>> {
        let admin = Arc::clone(&self.admin);
        let name = topic.to_string();
        let metadata = tokio::task::spawn_blocking(move || {
            admin
                .inner()
                .fetch_metadata(Some(&name), Timeout::After(METADATA_TIMEOUT))
        })
        .await
        .context("Metadata task panicked")?
        .with_context(|| format!("Failed to fetch metadata for '{}'", topic))?;

        Ok(metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic && t.error().is_none())
            .map(|t| t.partitions().len() as u32))
    }

    async fn open_session(&self, config: &ProducerConfig) -> Result<Box<dyn ProducerSession>> {
        let producer: FutureProducer = self
            .producer_client_config(config)
            .create()
            .context("Failed to create Kafka producer")?;
        debug!("Opened Kafka producer session ({})", config);
        Ok(Box::new(KafkaSession {
            producer: Some(producer),
        }))
    }

    fn name(&self) -> &'static str {
        "kafka"
    }
}

struct KafkaSession {
    producer: Option<FutureProducer>,
}

impl KafkaSession {
    fn producer(&self) -> Result<&FutureProducer> {
        self.producer
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("producer session already closed"))
    }
}

#[async_trait]
impl ProducerSession for KafkaSession {
    async fn send(
        &mut self,
        topic: &str,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> std::result::Result<Acknowledgment, SendError> {
        let producer = self
            .producer
            .as_ref()
            .ok_or_else(|| SendError::Rejected("producer session already closed".into()))?;

        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic).payload(value);
        if let Some(key) = key {
            record = record.key(key);
        }

        // One record is in flight at a time, so the local queue never fills.
        match producer.send(record, Timeout::After(Duration::ZERO)).await {
            Ok((partition, offset)) => Ok(Acknowledgment { partition, offset }),
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut), _)) => {
                Err(SendError::TimedOut)
            }
            Err((err, _)) => Err(SendError::Rejected(err.to_string())),
        }
    }

    async fn flush(&mut self, timeout: Duration) -> Result<()> {
        let producer = self.producer()?.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .context("Flush task panicked")?
            .context("Producer flush failed")?;
        Ok(())
    }

    async fn drain(&mut self, timeout: Duration) -> Result<bool> {
        let producer = self.producer()?;
        let start = Instant::now();
        while producer.in_flight_count() > 0 {
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }
        Ok(true)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(producer) = self.producer.take() {
            // Dropping the producer purges anything still queued; give it a
            // bounded chance to deliver first.
            let flushed = tokio::task::spawn_blocking(move || {
                let result = producer.flush(Timeout::After(Duration::from_secs(5)));
                drop(producer);
                result
            })
            .await
            .context("Close task panicked")?;
            flushed.context("Final flush on close failed")?;
            debug!("Closed Kafka producer session");
        }
        Ok(())
    }
}
