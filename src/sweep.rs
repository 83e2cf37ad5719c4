//! # Sweep Orchestrator Module
//!
//! Drives each sweep dimension through the run executor, one configuration at
//! a time, and collects the reduced results in execution order.
//!
//! ## Dimensions
//!
//! - **Batch/Linger**: varies `batch.size` and `linger.ms` with `lz4`,
//!   writing to `<prefix>-batch-test`
//! - **Compression**: varies the codec at 256 KiB / 50 ms, writing to
//!   `<prefix>-comp-<codec>`, and adds size statistics to every result
//! - **Partitioning**: varies the topic (`<prefix>-part-<n>`) at
//!   256 KiB / 50 ms / `lz4`, routing records by the configured key field
//!
//! ## Failure Policy
//!
//! A configuration that fails (acknowledgment timeout, rejected record, empty
//! reduction) is logged and recorded as a [`RunOutcome::Failed`] entry in its
//! slot; the sweep continues with the next configuration.
//!
//! ## Scaling Factors
//!
//! Every completed run carries `throughput / baseline`, where the baseline is
//! the first completed run of the same sweep. The baseline itself reports
//! exactly 1.0.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::broker::{Broker, BrokerConfig, BrokerKind, ProducerConfig};
use crate::cli::{Args, BatchLinger, Dimension};
use crate::compression::{CompressionCodec, EstimatorKind, SizeEstimator};
use crate::error::BenchError;
use crate::executor::{RunExecutor, RunSettings};
use crate::metrics::{self, RunResult};
use crate::provision::{self, ProvisionOutcome};
use crate::workload::Workload;

/// Validated configuration for one invocation
///
/// Built from parsed command-line arguments by [`SweepConfig::from_args`];
/// every value here has already passed validation.
#[derive(Clone, Debug)]
pub struct SweepConfig {
    /// Bootstrap address, constant for the process lifetime
    pub bootstrap: String,
    pub broker: BrokerKind,
    pub workload: PathBuf,

    /// Dimensions to run, in execution order, with `all` expanded
    pub dimensions: Vec<Dimension>,

    pub batch_linger: Vec<BatchLinger>,
    pub codecs: Vec<CompressionCodec>,
    pub partitions: Vec<u32>,

    pub batch_sample: usize,
    pub compression_sample: usize,
    pub partition_sample: usize,

    /// Routing-key field for the partitioning sweep
    pub key_field: String,
    pub topic_prefix: String,

    /// Per-run timing
    pub run: RunSettings,
    pub provision_settle: Duration,

    pub size_estimate: EstimatorKind,
    pub min_throughput_fraction: f64,
    pub strict_topics: bool,
    pub output_file: Option<PathBuf>,
}

impl SweepConfig {
    /// Create the sweep configuration from CLI arguments
    ///
    /// ## Validation
    /// - Sample sizes and partition counts must be positive
    /// - Each sweep dimension that runs needs at least one point
    /// - The throughput fraction must lie in (0, 1]
    /// - The acknowledgment timeout must be non-zero
    pub fn from_args(args: &Args) -> Result<Self> {
        let dimensions = Dimension::expand_all(args.dimensions.clone());

        for (name, size) in [
            ("batch sample", args.batch_sample),
            ("compression sample", args.compression_sample),
            ("partition sample", args.partition_sample),
        ] {
            crate::utils::validate_sample_size(name, size)?;
        }

        if args.partitions.iter().any(|&p| p == 0) {
            return Err(invalid("partition counts must be greater than 0"));
        }
        if dimensions.contains(&Dimension::BatchLinger) && args.batch_linger.is_empty() {
            return Err(invalid("at least one batch/linger pair is required"));
        }
        if dimensions.contains(&Dimension::Compression) && args.codecs.is_empty() {
            return Err(invalid("at least one codec is required"));
        }
        if dimensions.contains(&Dimension::Partitioning) && args.partitions.is_empty() {
            return Err(invalid("at least one partition count is required"));
        }
        if !(args.min_throughput_fraction > 0.0 && args.min_throughput_fraction <= 1.0) {
            return Err(invalid(format!(
                "min throughput fraction must be in (0, 1], got {}",
                args.min_throughput_fraction
            )));
        }
        let defaults = RunSettings::default();
        let run = RunSettings {
            ack_timeout: args.ack_timeout.unwrap_or(defaults.ack_timeout),
            drain_timeout: args.drain_timeout.unwrap_or(defaults.drain_timeout),
            settle_delay: args.settle_delay.unwrap_or(defaults.settle_delay),
        };
        if run.ack_timeout.is_zero() {
            return Err(invalid("ack timeout must be greater than 0"));
        }
        if args.topic_prefix.trim().is_empty() {
            return Err(invalid("topic prefix cannot be empty"));
        }
        if args.key_field.is_empty() {
            return Err(invalid("key field cannot be empty"));
        }

        Ok(Self {
            bootstrap: args.bootstrap.clone(),
            broker: args.broker,
            workload: args.workload.clone(),
            dimensions,
            batch_linger: args.batch_linger.clone(),
            codecs: args.codecs.clone(),
            partitions: args.partitions.clone(),
            batch_sample: args.batch_sample,
            compression_sample: args.compression_sample,
            partition_sample: args.partition_sample,
            key_field: args.key_field.clone(),
            topic_prefix: args.topic_prefix.clone(),
            run,
            provision_settle: args
                .provision_settle
                .unwrap_or(crate::defaults::PROVISION_SETTLE),
            size_estimate: args.size_estimate,
            min_throughput_fraction: args.min_throughput_fraction,
            strict_topics: args.strict_topics,
            output_file: args.output_file.clone(),
        })
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            bootstrap: self.bootstrap.clone(),
            ack_timeout: self.run.ack_timeout,
            ..BrokerConfig::default()
        }
    }

    /// Largest sample any selected dimension will send
    pub fn max_sample(&self) -> usize {
        self.dimensions
            .iter()
            .map(|d| match d {
                Dimension::BatchLinger => self.batch_sample,
                Dimension::Compression => self.compression_sample,
                Dimension::Partitioning => self.partition_sample,
                Dimension::All => 0,
            })
            .max()
            .unwrap_or(0)
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    BenchError::InvalidConfig(message.into()).into()
}

/// One configuration of a sweep
#[derive(Clone, Debug, PartialEq)]
pub struct SweepPoint {
    pub label: String,
    pub topic: String,
    pub producer: ProducerConfig,
    /// Partition count of the target topic, for the partitioning sweep
    pub partitions: Option<u32>,
}

/// Ordered configurations of one dimension
#[derive(Clone, Debug)]
pub struct SweepPlan {
    pub dimension: Dimension,
    pub sample_size: usize,
    /// Routing-key field; `None` sends every record unkeyed
    pub key_field: Option<String>,
    pub points: Vec<SweepPoint>,
}

impl SweepPlan {
    pub fn batch_linger(prefix: &str, pairs: &[BatchLinger], sample_size: usize) -> Self {
        let topic = provision::batch_topic(prefix);
        let points = pairs
            .iter()
            .map(|pair| SweepPoint {
                label: format!("{}B/{}ms", pair.batch_size, pair.linger_ms),
                topic: topic.clone(),
                producer: ProducerConfig::new(
                    pair.batch_size,
                    pair.linger_ms,
                    crate::defaults::BATCH_SWEEP_CODEC,
                ),
                partitions: None,
            })
            .collect();

        Self {
            dimension: Dimension::BatchLinger,
            sample_size,
            key_field: None,
            points,
        }
    }

    pub fn compression(prefix: &str, codecs: &[CompressionCodec], sample_size: usize) -> Self {
        let points = codecs
            .iter()
            .map(|&codec| SweepPoint {
                label: codec.to_string(),
                topic: provision::compression_topic(prefix, codec),
                producer: ProducerConfig::new(
                    crate::defaults::BASE_BATCH_SIZE,
                    crate::defaults::BASE_LINGER_MS,
                    codec,
                ),
                partitions: None,
            })
            .collect();

        Self {
            dimension: Dimension::Compression,
            sample_size,
            key_field: None,
            points,
        }
    }

    pub fn partitioning(
        prefix: &str,
        counts: &[u32],
        sample_size: usize,
        key_field: &str,
    ) -> Self {
        let points = counts
            .iter()
            .map(|&count| SweepPoint {
                label: format!("{} partitions", count),
                topic: provision::partition_topic(prefix, count),
                producer: ProducerConfig::new(
                    crate::defaults::BASE_BATCH_SIZE,
                    crate::defaults::BASE_LINGER_MS,
                    crate::defaults::BATCH_SWEEP_CODEC,
                ),
                partitions: Some(count),
            })
            .collect();

        Self {
            dimension: Dimension::Partitioning,
            sample_size,
            key_field: Some(key_field.to_string()),
            points,
        }
    }

    /// The plan `config` asks for in `dimension`
    pub fn for_dimension(dimension: Dimension, config: &SweepConfig) -> Result<Self> {
        let prefix = &config.topic_prefix;
        match dimension {
            Dimension::BatchLinger => Ok(Self::batch_linger(
                prefix,
                &config.batch_linger,
                config.batch_sample,
            )),
            Dimension::Compression => Ok(Self::compression(
                prefix,
                &config.codecs,
                config.compression_sample,
            )),
            Dimension::Partitioning => Ok(Self::partitioning(
                prefix,
                &config.partitions,
                config.partition_sample,
                &config.key_field,
            )),
            Dimension::All => Err(invalid("'all' must be expanded before planning")),
        }
    }
}

/// What happened to one configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunResult),
    Failed {
        label: String,
        topic: String,
        error: String,
    },
}

impl RunOutcome {
    pub fn label(&self) -> &str {
        match self {
            RunOutcome::Completed(result) => &result.label,
            RunOutcome::Failed { label, .. } => label,
        }
    }

    pub fn result(&self) -> Option<&RunResult> {
        match self {
            RunOutcome::Completed(result) => Some(result),
            RunOutcome::Failed { .. } => None,
        }
    }
}

/// Every outcome of one dimension, in execution order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepResult {
    pub dimension: Dimension,
    /// Records each run actually sent
    pub sample_size: usize,
    pub runs: Vec<RunOutcome>,
}

impl SweepResult {
    pub fn completed(&self) -> impl Iterator<Item = &RunResult> {
        self.runs.iter().filter_map(RunOutcome::result)
    }

    pub fn failed(&self) -> impl Iterator<Item = &RunOutcome> {
        self.runs
            .iter()
            .filter(|run| matches!(run, RunOutcome::Failed { .. }))
    }

    /// Throughput of the first completed run
    pub fn baseline_throughput(&self) -> Option<f64> {
        self.completed().next().map(RunResult::throughput)
    }
}

/// State of one invocation, threaded from `main` through the sweeps to the
/// report
#[derive(Clone, Debug)]
pub struct SweepContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub provisioning: Vec<ProvisionOutcome>,
    pub sweeps: BTreeMap<Dimension, SweepResult>,
}

impl SweepContext {
    pub fn new() -> Self {
        Self {
            run_id: crate::utils::generate_run_id(),
            started_at: Utc::now(),
            provisioning: Vec::new(),
            sweeps: BTreeMap::new(),
        }
    }

    pub fn record_provisioning(&mut self, outcomes: Vec<ProvisionOutcome>) {
        self.provisioning = outcomes;
    }

    pub fn record_sweep(&mut self, result: SweepResult) {
        self.sweeps.insert(result.dimension, result);
    }
}

impl Default for SweepContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs sweep plans against one broker
pub struct SweepOrchestrator {
    executor: RunExecutor,
    estimator: Box<dyn SizeEstimator>,
}

impl SweepOrchestrator {
    pub fn new(
        broker: Arc<dyn Broker>,
        settings: RunSettings,
        estimator: Box<dyn SizeEstimator>,
    ) -> Self {
        Self {
            executor: RunExecutor::new(broker, settings),
            estimator,
        }
    }

    /// Run every point of `plan` in order over a prefix of `workload`.
    pub async fn run_sweep(&self, plan: &SweepPlan, workload: &Workload) -> SweepResult {
        if workload.len() < plan.sample_size {
            warn!(
                "{} sweep wants {} records but {} has {}; using all of them",
                plan.dimension,
                plan.sample_size,
                workload.path().display(),
                workload.len()
            );
        }
        if plan.dimension == Dimension::Compression {
            info!(
                "Compressed sizes come from the {} estimator unless the transport reports them",
                self.estimator.name()
            );
        }
        let records = workload.sample(plan.sample_size);

        info!(
            "Starting {} sweep: {} configurations, {} records each",
            plan.dimension,
            plan.points.len(),
            records.len()
        );

        let mut runs = Vec::with_capacity(plan.points.len());
        for point in &plan.points {
            info!("Testing {} ({})", point.label, point.producer);
            match self.run_point(plan, point, records).await {
                Ok(result) => {
                    log_result(&result);
                    runs.push(RunOutcome::Completed(result));
                }
                Err(e) => {
                    error!("Run '{}' failed: {:#}", point.label, e);
                    runs.push(RunOutcome::Failed {
                        label: point.label.clone(),
                        topic: point.topic.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        apply_scaling(&mut runs);

        SweepResult {
            dimension: plan.dimension,
            sample_size: records.len(),
            runs,
        }
    }

    /// Run each plan and record its result in `ctx`.
    pub async fn run_all(&self, plans: &[SweepPlan], workload: &Workload, ctx: &mut SweepContext) {
        for plan in plans {
            let result = self.run_sweep(plan, workload).await;
            let failed = result.failed().count();
            if failed > 0 {
                warn!(
                    "{} sweep finished with {} failed configuration(s)",
                    plan.dimension, failed
                );
            }
            ctx.record_sweep(result);
        }
    }

    async fn run_point(
        &self,
        plan: &SweepPlan,
        point: &SweepPoint,
        records: &[crate::workload::Record],
    ) -> Result<RunResult> {
        let samples = self
            .executor
            .execute(
                &point.topic,
                &point.producer,
                records,
                plan.key_field.as_deref(),
            )
            .await?;

        let (throughput, latency) = metrics::reduce(
            samples.latencies.samples(),
            samples.duration,
            samples.records_sent,
            samples.bytes_sent,
        )?;

        let compression = if plan.dimension == Dimension::Compression {
            Some(
                metrics::reduce_compression(
                    records,
                    point.producer.compression,
                    self.estimator.as_ref(),
                    samples.wire_bytes,
                )
                .context("Failed to compute compression statistics")?,
            )
        } else {
            None
        };

        Ok(RunResult {
            label: point.label.clone(),
            topic: point.topic.clone(),
            producer: point.producer,
            partitions: point.partitions,
            throughput,
            latency,
            compression,
            scaling_factor: None,
            timestamp: Utc::now(),
        })
    }
}

/// Fill in scaling factors relative to the first completed run.
fn apply_scaling(runs: &mut [RunOutcome]) {
    let mut baseline = None;
    for run in runs.iter_mut() {
        if let RunOutcome::Completed(result) = run {
            let throughput = result.throughput();
            match baseline {
                None => {
                    baseline = Some(throughput);
                    result.scaling_factor = Some(1.0);
                }
                Some(base) => {
                    result.scaling_factor = Some(metrics::scaling_factor(throughput, base));
                }
            }
        }
    }
}

fn log_result(result: &RunResult) {
    info!(
        "  Throughput: {} ({}), mean latency {}, p95 {}, duration {}",
        crate::utils::format_message_rate(result.throughput()),
        crate::utils::format_rate(result.throughput.bytes_per_second),
        metrics::utils::format_latency_ms(result.latency.mean_ms),
        metrics::utils::format_latency_ms(result.latency.p95_ms),
        crate::utils::format_duration(Duration::from_secs_f64(result.throughput.duration_secs)),
    );
    if let Some(stats) = &result.compression {
        info!(
            "  Compression: {} ({}), {} -> {}, saved {}",
            metrics::utils::format_ratio(stats.compression_ratio_pct),
            stats.size_source,
            crate::utils::format_bytes(stats.original_bytes as usize),
            crate::utils::format_bytes(stats.compressed_bytes as usize),
            crate::utils::format_bytes(stats.bytes_saved as usize),
        );
    }
}
