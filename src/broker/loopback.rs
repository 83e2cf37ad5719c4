//! In-process simulated broker.
//!
//! Keeps a topic registry and per-partition offsets behind a mutex so sweeps
//! can be exercised end to end without a cluster. Acknowledgments resolve
//! after a configurable delay; a codec can be made to stall forever so the
//! acknowledgment-timeout path is reachable. Flush and drain can be slowed
//! down or made to fail, and every session lifecycle call is recorded in
//! order.
//!
//! Keyed records are routed with the murmur2 partitioner Kafka's Java client
//! uses, so a key lands on the same partition it would on a real cluster.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::trace;

use super::{
    Acknowledgment, Broker, CreateOutcome, ProducerConfig, ProducerSession, SendError, TopicSpec,
};
use crate::compression::{self, CompressionCodec};

/// Behaviour knobs for the simulated broker
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Delay before each acknowledgment resolves
    pub ack_latency: Duration,
    /// Sessions using this codec never receive acknowledgments
    pub stall_codec: Option<CompressionCodec>,
    /// Report compressed wire bytes by compressing the session's payloads
    pub report_wire_bytes: bool,
    /// Time each flush takes
    pub flush_delay: Duration,
    /// Flushes fail after `flush_delay`
    pub fail_flush: bool,
    /// Time each drain takes, capped by the caller's timeout
    pub drain_delay: Duration,
    /// Drains never settle: they wait out the timeout and report `false`
    pub drain_stuck: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            ack_latency: Duration::from_micros(200),
            stall_codec: None,
            report_wire_bytes: false,
            flush_delay: Duration::ZERO,
            fail_flush: false,
            drain_delay: Duration::ZERO,
            drain_stuck: false,
        }
    }
}

/// Session lifecycle calls, in the order the broker saw them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Opened,
    Flushed,
    Drained { settled: bool },
    Closed,
}

#[derive(Debug)]
struct TopicState {
    spec: TopicSpec,
    /// Next offset per partition
    offsets: Vec<i64>,
}

#[derive(Debug, Default)]
struct ClusterState {
    topics: HashMap<String, TopicState>,
    open_sessions: usize,
    sessions_opened: usize,
    events: Vec<SessionEvent>,
}

/// Simulated cluster shared by all sessions it hands out
#[derive(Clone)]
pub struct LoopbackBroker {
    options: LoopbackOptions,
    state: Arc<Mutex<ClusterState>>,
}

impl LoopbackBroker {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            options,
            state: Arc::new(Mutex::new(ClusterState::default())),
        }
    }

    /// Records stored per partition of `topic`
    pub fn partition_offsets(&self, topic: &str) -> Option<Vec<i64>> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|t| t.offsets.clone())
    }

    /// Topic-level options the topic was created with
    pub fn topic_configs(&self, topic: &str) -> Option<BTreeMap<String, String>> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|t| t.spec.configs.clone())
    }

    /// Sessions opened and not yet closed
    pub fn open_sessions(&self) -> usize {
        self.state.lock().open_sessions
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.lock().sessions_opened
    }

    /// Every lifecycle call made on sessions of this broker
    pub fn session_events(&self) -> Vec<SessionEvent> {
        self.state.lock().events.clone()
    }
}

#[async_trait]
impl Broker for LoopbackBroker {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateOutcome> {
        if spec.partitions == 0 {
            anyhow::bail!("topic '{}' needs at least one partition", spec.name);
        }
        let mut state = self.state.lock();
        if state.topics.contains_key(&spec.name) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.topics.insert(
            spec.name.clone(),
            TopicState {
                spec: spec.clone(),
                offsets: vec![0; spec.partitions as usize],
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn partition_count(&self, topic: &str) -> Result<Option<u32>> {
        Ok(self.state.lock().topics.get(topic).map(|t| t.spec.partitions))
    }

    async fn open_session(&self, config: &ProducerConfig) -> Result<Box<dyn ProducerSession>> {
        {
            let mut state = self.state.lock();
            state.open_sessions += 1;
            state.sessions_opened += 1;
            state.events.push(SessionEvent::Opened);
        }
        Ok(Box::new(LoopbackSession {
            config: *config,
            options: self.options.clone(),
            state: Arc::clone(&self.state),
            payloads: Vec::new(),
            next_partition: 0,
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

struct LoopbackSession {
    config: ProducerConfig,
    options: LoopbackOptions,
    state: Arc<Mutex<ClusterState>>,
    payloads: Vec<u8>,
    next_partition: u32,
    closed: bool,
}

impl LoopbackSession {
    fn record(&self, event: SessionEvent) {
        self.state.lock().events.push(event);
    }

    fn append(&mut self, topic: &str, key: Option<&[u8]>) -> Result<Acknowledgment, SendError> {
        let mut state = self.state.lock();
        let topic_state = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| SendError::Rejected(format!("unknown topic '{}'", topic)))?;

        let partitions = topic_state.offsets.len() as u32;
        let partition = match key {
            Some(key) => murmur2_partition(key, partitions),
            None => {
                let p = self.next_partition % partitions;
                self.next_partition = self.next_partition.wrapping_add(1);
                p
            }
        };

        let slot = &mut topic_state.offsets[partition as usize];
        let offset = *slot;
        *slot += 1;

        Ok(Acknowledgment {
            partition: partition as i32,
            offset,
        })
    }
}

#[async_trait]
impl ProducerSession for LoopbackSession {
    async fn send(
        &mut self,
        topic: &str,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> Result<Acknowledgment, SendError> {
        if self.closed {
            return Err(SendError::Rejected("producer session already closed".into()));
        }
        if self.options.stall_codec == Some(self.config.compression) {
            std::future::pending::<()>().await;
        }
        if !self.options.ack_latency.is_zero() {
            sleep(self.options.ack_latency).await;
        }

        let ack = self.append(topic, key)?;
        if self.options.report_wire_bytes {
            self.payloads.extend_from_slice(value);
        }
        trace!(
            "loopback ack topic={} partition={} offset={}",
            topic,
            ack.partition,
            ack.offset
        );
        Ok(ack)
    }

    async fn flush(&mut self, _timeout: Duration) -> Result<()> {
        if !self.options.flush_delay.is_zero() {
            sleep(self.options.flush_delay).await;
        }
        self.record(SessionEvent::Flushed);
        if self.options.fail_flush {
            anyhow::bail!("loopback flush failed");
        }
        Ok(())
    }

    async fn drain(&mut self, timeout: Duration) -> Result<bool> {
        let (wait, settled) = if self.options.drain_stuck {
            (timeout, false)
        } else {
            (self.options.drain_delay.min(timeout), true)
        };
        if !wait.is_zero() {
            sleep(wait).await;
        }
        self.record(SessionEvent::Drained { settled });
        Ok(settled)
    }

    fn wire_bytes(&self) -> Option<u64> {
        if !self.options.report_wire_bytes {
            return None;
        }
        compression::compress(
            &self.payloads,
            self.config.compression,
            compression::DEFAULT_ZSTD_LEVEL,
        )
        .ok()
        .map(|compressed| compressed.len() as u64)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            let mut state = self.state.lock();
            state.open_sessions = state.open_sessions.saturating_sub(1);
            state.events.push(SessionEvent::Closed);
        }
        Ok(())
    }
}

/// Murmur2 as implemented by Kafka's Java client (`Utils.murmur2`)
fn murmur2(data: &[u8]) -> u32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = SEED ^ data.len() as u32;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Partition for `key`, matching the default Kafka partitioner
fn murmur2_partition(key: &[u8], partitions: u32) -> u32 {
    (murmur2(key) & 0x7fff_ffff) % partitions
}
