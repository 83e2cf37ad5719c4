//! # Producer Sweep Library
//!
//! Benchmarks producer-side performance of a partitioned, replicated message
//! broker while sweeping producer tuning: batch size and linger, compression
//! codec, and topic partition count.
//!
//! ## Architecture Overview
//!
//! Components, leaf to root:
//!
//! - `provision`: idempotent topic creation with partition-count checks
//! - `workload`: the NDJSON record source every run replays
//! - `executor`: one configuration, one producer session, one record in
//!   flight at a time, per-record latency
//! - `metrics`: nearest-rank latency percentiles, throughput, compression
//!   ratios
//! - `sweep`: runs a dimension's configurations in order and computes
//!   scaling factors
//! - `results`: the final report and its recommendations
//!
//! Broker access sits behind the `broker` traits, with a Kafka
//! implementation (librdkafka) and an in-process loopback broker.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use producer_sweep::broker::{BrokerConfig, BrokerFactory, BrokerKind};
//! use producer_sweep::cli::Dimension;
//! use producer_sweep::compression::ModeledEstimator;
//! use producer_sweep::executor::RunSettings;
//! use producer_sweep::provision::{default_catalog, TopicProvisioner};
//! use producer_sweep::results::ReportAggregator;
//! use producer_sweep::sweep::{SweepContext, SweepOrchestrator, SweepPlan};
//! use producer_sweep::workload::Workload;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let workload = Workload::load(Path::new("hydro_test_1000.json"))?;
//!     let broker = BrokerFactory::create(BrokerKind::Loopback, &BrokerConfig::default())?;
//!
//!     let mut ctx = SweepContext::new();
//!     let outcomes = TopicProvisioner::new(broker.clone())
//!         .ensure(&default_catalog("hydro", &[2, 4, 8]))
//!         .await?;
//!     ctx.record_provisioning(outcomes);
//!
//!     let orchestrator =
//!         SweepOrchestrator::new(broker, RunSettings::default(), Box::new(ModeledEstimator));
//!     let plan = SweepPlan::partitioning("hydro", &[2, 4, 8], 4000, "turbine_type");
//!     orchestrator.run_all(&[plan], &workload, &mut ctx).await;
//!
//!     let report = ReportAggregator::default().aggregate(ctx, "localhost:9092", BrokerKind::Loopback);
//!     println!("{:?}", report.sweeps[&Dimension::Partitioning].baseline_throughput());
//!     Ok(())
//! }
//! ```

/// Full invocation and exit-code mapping used by the binary
pub mod app;

/// Broker abstraction
///
/// The `Broker` and `ProducerSession` traits, plus the Kafka and loopback
/// implementations and the factory that picks between them.
pub mod broker;

/// Command-line interface
///
/// Argument parsing with clap, sweep dimensions with "all" expansion, and
/// parsers for durations and `bytes:ms` batch/linger pairs.
pub mod cli;

/// Compression codecs and size estimation strategies
pub mod compression;

pub mod error;

/// Run executor
///
/// Sends a record sample through one producer session, synchronously, and
/// records per-record acknowledgment latency.
pub mod executor;

pub mod logging;

/// Reduction of raw run measurements into throughput, latency percentiles
/// and compression statistics
pub mod metrics;

/// Topic catalog and provisioning
pub mod provision;

/// Report aggregation, recommendations, summary table and JSON output
pub mod results;

/// Sweep configuration, plans, orchestration and the per-invocation context
pub mod sweep;

pub mod utils;

/// Workload records and the NDJSON loader
pub mod workload;

pub use broker::{Broker, BrokerFactory, BrokerKind, ProducerConfig, ProducerSession, TopicSpec};
pub use cli::{Args, Dimension};
pub use error::BenchError;
pub use metrics::{LatencySummary, RunResult, ThroughputMetrics};
pub use results::{Report, ReportAggregator, ResultsManager};
pub use sweep::{SweepConfig, SweepContext, SweepOrchestrator, SweepPlan, SweepResult};

/// The current version of the producer sweep tool
///
/// Populated from Cargo.toml and recorded in every report.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use crate::compression::CompressionCodec;
    use std::time::Duration;

    /// Bootstrap broker address
    pub const BOOTSTRAP: &str = "localhost:9092";

    /// Workload file produced by the data generator
    pub const WORKLOAD_FILE: &str = "hydro_test_1000.json";

    pub const TOPIC_PREFIX: &str = "hydro";

    /// Categorical field records are routed by in the partitioning sweep
    pub const KEY_FIELD: &str = "turbine_type";

    /// Upper bound on a single acknowledgment wait
    pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

    /// Fixed pause after each run, so broker-side buffering from one
    /// configuration does not bleed into the next
    pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

    /// Upper bound on the drain barrier before a session is closed
    pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Pause after provisioning while topic metadata propagates
    pub const PROVISION_SETTLE: Duration = Duration::from_secs(3);

    /// Records per batch/linger run
    pub const BATCH_SAMPLE: usize = 1000;

    /// Records per compression run
    pub const COMPRESSION_SAMPLE: usize = 3000;

    /// Records per partitioning run
    pub const PARTITION_SAMPLE: usize = 4000;

    /// Batch size (bytes) and linger (ms) pairs of the batch sweep
    pub const BATCH_LINGER: [(usize, u64); 6] = [
        (16384, 0),
        (65536, 10),
        (262144, 50),
        (524288, 100),
        (1048576, 200),
        (1048576, 500),
    ];

    pub const PARTITION_COUNTS: [u32; 3] = [2, 4, 8];

    /// Batch size used by the compression and partitioning sweeps
    pub const BASE_BATCH_SIZE: usize = 262144;

    /// Linger used by the compression and partitioning sweeps
    pub const BASE_LINGER_MS: u64 = 50;

    /// Codec used by the batch/linger and partitioning sweeps
    pub const BATCH_SWEEP_CODEC: CompressionCodec = CompressionCodec::Lz4;

    /// Codecs slower than this fraction of the fastest are not recommended
    pub const MIN_THROUGHPUT_FRACTION: f64 = 0.8;
}
