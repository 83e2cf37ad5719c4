//! # Run Executor
//!
//! Drives one producer configuration over a fixed record sample and captures
//! per-record latency.
//!
//! ## Timing Semantics
//!
//! Every record is sent and then awaited until the broker acknowledges it
//! before the next record is submitted. Only one record is ever in flight, so
//! the numbers describe worst-case per-record latency rather than pipelined
//! throughput; this keeps runs directly comparable across configurations.
//! The run duration spans from just before the first send to just after the
//! final flush.
//!
//! ## Session Lifecycle
//!
//! A fresh session is opened for every run and is always drained and closed
//! before `execute` returns, whether the run succeeded or not. A fixed
//! settling delay (configurable, may be zero) follows the close.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

use crate::broker::{Broker, ProducerConfig, ProducerSession, SendError};
use crate::error::BenchError;
use crate::metrics::LatencyCollector;
use crate::workload::Record;

/// Timing knobs for a run
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    /// Bound on each acknowledgment wait (and on the final flush)
    pub ack_timeout: Duration,
    /// Bound on waiting for in-flight requests to settle before close
    pub drain_timeout: Duration,
    /// Fixed pause after the session is closed
    pub settle_delay: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            ack_timeout: crate::defaults::ACK_TIMEOUT,
            drain_timeout: crate::defaults::DRAIN_TIMEOUT,
            settle_delay: crate::defaults::SETTLE_DELAY,
        }
    }
}

/// Raw measurements of one run
#[derive(Debug, Clone)]
pub struct RunSamples {
    /// One latency per record, in input order
    pub latencies: LatencyCollector,
    /// Wall time from before the first send to after the final flush
    pub duration: Duration,
    pub records_sent: usize,
    pub bytes_sent: usize,
    /// Compressed bytes, when the transport reports them
    pub wire_bytes: Option<u64>,
}

/// Executes runs against one broker
pub struct RunExecutor {
    broker: Arc<dyn Broker>,
    settings: RunSettings,
}

impl RunExecutor {
    pub fn new(broker: Arc<dyn Broker>, settings: RunSettings) -> Self {
        Self { broker, settings }
    }

    /// Send `records` to `topic` with `config`, one at a time.
    ///
    /// When `key_field` is set, each record is routed by the value of that
    /// field. Failures propagate after the session has been released.
    pub async fn execute(
        &self,
        topic: &str,
        config: &ProducerConfig,
        records: &[Record],
        key_field: Option<&str>,
    ) -> Result<RunSamples> {
        let mut session = self
            .broker
            .open_session(config)
            .await
            .with_context(|| format!("Failed to open producer session ({})", config))?;

        let outcome = self
            .drive(session.as_mut(), topic, records, key_field)
            .await
            .map(|mut samples| {
                samples.wire_bytes = session.wire_bytes();
                samples
            });

        let released = self.release(session.as_mut()).await;

        if !self.settings.settle_delay.is_zero() {
            debug!("Settling for {:?}", self.settings.settle_delay);
            sleep(self.settings.settle_delay).await;
        }

        let samples = outcome?;
        released?;
        Ok(samples)
    }

    async fn drive(
        &self,
        session: &mut dyn ProducerSession,
        topic: &str,
        records: &[Record],
        key_field: Option<&str>,
    ) -> Result<RunSamples> {
        let ack_timeout = self.settings.ack_timeout;
        let mut latencies = LatencyCollector::with_capacity(records.len());
        let mut bytes_sent = 0usize;
        let mut unkeyed = 0usize;

        let start = Instant::now();
        for (index, record) in records.iter().enumerate() {
            let payload = record.to_bytes();
            let key = key_field.and_then(|field| record.key(field));
            if key_field.is_some() && key.is_none() {
                unkeyed += 1;
            }

            let send_start = Instant::now();
            let ack = match timeout(ack_timeout, session.send(topic, key.as_deref(), &payload)).await
            {
                Ok(Ok(ack)) => ack,
                Ok(Err(SendError::TimedOut)) | Err(_) => {
                    return Err(BenchError::AckTimeout {
                        topic: topic.to_string(),
                        index,
                        timeout: ack_timeout,
                    }
                    .into())
                }
                Ok(Err(SendError::Rejected(reason))) => {
                    return Err(BenchError::Delivery {
                        topic: topic.to_string(),
                        index,
                        reason,
                    }
                    .into())
                }
            };
            latencies.record(send_start.elapsed());
            bytes_sent += payload.len();
            trace!(
                "record {} acked at partition {} offset {}",
                index,
                ack.partition,
                ack.offset
            );
        }

        session
            .flush(ack_timeout)
            .await
            .context("Final flush failed")?;
        let duration = start.elapsed();

        if unkeyed > 0 {
            warn!(
                "{} of {} records had no '{}' field and were sent unkeyed",
                unkeyed,
                records.len(),
                key_field.unwrap_or_default()
            );
        }

        Ok(RunSamples {
            records_sent: latencies.len(),
            latencies,
            duration,
            bytes_sent,
            wire_bytes: None,
        })
    }

    /// Drain then close. Close is attempted even if draining fails.
    async fn release(&self, session: &mut dyn ProducerSession) -> Result<()> {
        match session.drain(self.settings.drain_timeout).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "Requests still in flight after {:?}; closing anyway",
                self.settings.drain_timeout
            ),
            Err(e) => warn!("Drain failed: {:#}", e),
        }
        session.close().await.context("Failed to close producer session")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{LoopbackBroker, LoopbackOptions, SessionEvent, TopicSpec};
    use crate::compression::CompressionCodec;
    use serde_json::{Map, Value};

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut map = Map::new();
                map.insert("seq".into(), Value::from(i));
                map.insert(
                    "turbine_type".into(),
                    Value::from(["kaplan", "francis", "pelton"][i % 3]),
                );
                Record::new(map)
            })
            .collect()
    }

    fn fast_settings() -> RunSettings {
        RunSettings {
            ack_timeout: Duration::from_millis(100),
            drain_timeout: Duration::from_millis(100),
            settle_delay: Duration::ZERO,
        }
    }

    async fn broker_with_topic(options: LoopbackOptions, partitions: u32) -> LoopbackBroker {
        let broker = LoopbackBroker::new(options);
        broker
            .create_topic(&TopicSpec::new("run-test", partitions))
            .await
            .unwrap();
        broker
    }

    #[tokio::test]
    async fn test_one_sample_per_record() {
        let broker = broker_with_topic(LoopbackOptions::default(), 3).await;
        let executor = RunExecutor::new(Arc::new(broker.clone()), fast_settings());
        let sample = records(50);
        let config = ProducerConfig::new(16384, 0, CompressionCodec::Lz4);

        let samples = executor
            .execute("run-test", &config, &sample, None)
            .await
            .unwrap();

        assert_eq!(samples.latencies.len(), 50);
        assert_eq!(samples.records_sent, 50);
        let total_latency: Duration = samples.latencies.samples().iter().sum();
        assert!(samples.duration >= total_latency);
        assert_eq!(broker.open_sessions(), 0);
        assert_eq!(samples.wire_bytes, None);
    }

    #[tokio::test]
    async fn test_timeout_fails_run_and_releases_session() {
        let broker = broker_with_topic(
            LoopbackOptions {
                stall_codec: Some(CompressionCodec::Zstd),
                ..Default::default()
            },
            3,
        )
        .await;
        let executor = RunExecutor::new(Arc::new(broker.clone()), fast_settings());
        let config = ProducerConfig::new(16384, 0, CompressionCodec::Zstd);

        let err = executor
            .execute("run-test", &config, &records(5), None)
            .await
            .unwrap_err();

        match err.downcast_ref::<BenchError>() {
            Some(BenchError::AckTimeout { index, .. }) => assert_eq!(*index, 0),
            other => panic!("expected AckTimeout, got {:?}", other),
        }
        assert_eq!(broker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_rejected_record_is_delivery_error() {
        let broker = LoopbackBroker::new(LoopbackOptions::default());
        let executor = RunExecutor::new(Arc::new(broker.clone()), fast_settings());
        let config = ProducerConfig::new(16384, 0, CompressionCodec::None);

        let err = executor
            .execute("no-such-topic", &config, &records(2), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BenchError>(),
            Some(BenchError::Delivery { index: 0, .. })
        ));
        assert_eq!(broker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_keyed_run_routes_by_field() {
        let broker = broker_with_topic(
            LoopbackOptions {
                ack_latency: Duration::ZERO,
                ..Default::default()
            },
            8,
        )
        .await;
        let executor = RunExecutor::new(Arc::new(broker.clone()), fast_settings());
        let config = ProducerConfig::new(262144, 50, CompressionCodec::Lz4);

        executor
            .execute("run-test", &config, &records(30), Some("turbine_type"))
            .await
            .unwrap();

        let offsets = broker.partition_offsets("run-test").unwrap();
        assert_eq!(offsets.iter().sum::<i64>(), 30);
        // Three distinct keys can occupy at most three partitions.
        assert!(offsets.iter().filter(|&&n| n > 0).count() <= 3);
    }

    const RELEASE_ORDER: [SessionEvent; 4] = [
        SessionEvent::Opened,
        SessionEvent::Flushed,
        SessionEvent::Drained { settled: true },
        SessionEvent::Closed,
    ];

    #[tokio::test]
    async fn test_duration_includes_final_flush() {
        let flush_delay = Duration::from_millis(40);
        let broker = broker_with_topic(
            LoopbackOptions {
                ack_latency: Duration::ZERO,
                flush_delay,
                ..Default::default()
            },
            3,
        )
        .await;
        let executor = RunExecutor::new(Arc::new(broker.clone()), fast_settings());
        let config = ProducerConfig::new(65536, 10, CompressionCodec::Lz4);

        let samples = executor
            .execute("run-test", &config, &records(10), None)
            .await
            .unwrap();

        assert!(samples.duration >= flush_delay);
        assert_eq!(broker.session_events(), RELEASE_ORDER);
    }

    #[tokio::test]
    async fn test_drain_runs_before_close() {
        let drain_delay = Duration::from_millis(20);
        let broker = broker_with_topic(
            LoopbackOptions {
                ack_latency: Duration::ZERO,
                drain_delay,
                ..Default::default()
            },
            3,
        )
        .await;
        let executor = RunExecutor::new(Arc::new(broker.clone()), fast_settings());
        let config = ProducerConfig::new(16384, 0, CompressionCodec::None);

        let start = Instant::now();
        let samples = executor
            .execute("run-test", &config, &records(5), None)
            .await
            .unwrap();

        // Draining happens after the measured window.
        assert!(start.elapsed() >= drain_delay);
        assert!(samples.duration < start.elapsed());
        assert_eq!(broker.session_events(), RELEASE_ORDER);
    }

    #[tokio::test]
    async fn test_unsettled_drain_still_closes() {
        let broker = broker_with_topic(
            LoopbackOptions {
                ack_latency: Duration::ZERO,
                drain_stuck: true,
                ..Default::default()
            },
            3,
        )
        .await;
        let executor = RunExecutor::new(Arc::new(broker.clone()), fast_settings());
        let config = ProducerConfig::new(16384, 0, CompressionCodec::Snappy);

        let samples = executor
            .execute("run-test", &config, &records(5), None)
            .await
            .unwrap();

        assert_eq!(samples.records_sent, 5);
        assert_eq!(broker.open_sessions(), 0);
        assert_eq!(
            broker.session_events(),
            vec![
                SessionEvent::Opened,
                SessionEvent::Flushed,
                SessionEvent::Drained { settled: false },
                SessionEvent::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_flush_fails_run_and_releases_session() {
        let broker = broker_with_topic(
            LoopbackOptions {
                ack_latency: Duration::ZERO,
                fail_flush: true,
                ..Default::default()
            },
            3,
        )
        .await;
        let executor = RunExecutor::new(Arc::new(broker.clone()), fast_settings());
        let config = ProducerConfig::new(16384, 0, CompressionCodec::Lz4);

        let err = executor
            .execute("run-test", &config, &records(3), None)
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("Final flush failed"));
        assert_eq!(broker.open_sessions(), 0);
        assert_eq!(broker.session_events(), RELEASE_ORDER);
    }

    #[tokio::test]
    async fn test_settle_delay_is_applied() {
        let broker = broker_with_topic(LoopbackOptions::default(), 1).await;
        let settings = RunSettings {
            settle_delay: Duration::from_millis(30),
            ..fast_settings()
        };
        let executor = RunExecutor::new(Arc::new(broker), settings);
        let config = ProducerConfig::new(16384, 0, CompressionCodec::None);

        let start = Instant::now();
        executor
            .execute("run-test", &config, &records(1), None)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
