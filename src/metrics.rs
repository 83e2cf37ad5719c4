//! Reduction of raw run measurements into summary statistics.
//!
//! Percentiles use the nearest-rank rule on the ascending-sorted samples:
//! the q-th quantile is `sorted[floor(q * n)]` (clamped to the last sample).
//! No interpolation is applied, so p95 of 1000 samples is exactly
//! `sorted[950]`. Median uses the same rule (`sorted[floor(n / 2)]`), which
//! keeps `p50 <= p95 <= p99` for every sample set.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::broker::ProducerConfig;
use crate::compression::{CompressionCodec, SizeEstimator, SizeSource};
use crate::error::BenchError;
use crate::workload::{serialize_all, Record};

/// Per-record send-to-acknowledgment latencies of one run, in input order
#[derive(Debug, Default, Clone)]
pub struct LatencyCollector {
    samples: Vec<Duration>,
}

impl LatencyCollector {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, latency: Duration) {
        self.samples.push(latency);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }
}

/// Latency distribution of one run, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub std_dev_ms: f64,
}

/// Record and byte rates of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputMetrics {
    pub records_per_second: f64,
    pub bytes_per_second: f64,
    pub total_records: usize,
    pub total_bytes: usize,
    pub duration_secs: f64,
}

/// Size effect of a codec on the run's sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub codec: CompressionCodec,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    /// `(1 - compressed / original) * 100`, clamped to `[0, 100]`
    pub compression_ratio_pct: f64,
    pub bytes_saved: u64,
    /// `modeled` sizes are an approximation, not a measurement
    pub size_source: SizeSource,
}

/// Fully reduced metrics for one sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub label: String,
    pub topic: String,
    pub producer: ProducerConfig,
    pub partitions: Option<u32>,
    pub throughput: ThroughputMetrics,
    pub latency: LatencySummary,
    pub compression: Option<CompressionStats>,
    /// Throughput relative to the sweep's baseline run
    pub scaling_factor: Option<f64>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl RunResult {
    pub fn throughput(&self) -> f64 {
        self.throughput.records_per_second
    }
}

/// Element at the nearest-rank position for quantile `q` (0.0..=1.0).
///
/// `sorted` must be ascending. `None` when it is empty.
pub fn nearest_rank(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let index = ((q * sorted.len() as f64).floor() as usize).min(last);
    sorted.get(index).copied()
}

/// Reduce a run's latency samples and wall time.
///
/// `sample_count` is the number of records the run transmitted and
/// `total_bytes` their serialized size. Fails when there is nothing to
/// reduce or no measurable elapsed time.
pub fn reduce(
    samples: &[Duration],
    duration: Duration,
    sample_count: usize,
    total_bytes: usize,
) -> Result<(ThroughputMetrics, LatencySummary), BenchError> {
    if samples.is_empty() || sample_count == 0 || duration.is_zero() {
        return Err(BenchError::EmptyRun {
            samples: samples.len().min(sample_count),
            duration,
        });
    }

    let duration_secs = duration.as_secs_f64();
    let throughput = ThroughputMetrics {
        records_per_second: sample_count as f64 / duration_secs,
        bytes_per_second: total_bytes as f64 / duration_secs,
        total_records: sample_count,
        total_bytes,
        duration_secs,
    };

    let mut sorted: Vec<f64> = samples
        .iter()
        .map(|d| d.as_nanos() as f64 / 1_000_000.0)
        .collect();
    sorted.sort_by(f64::total_cmp);

    let (mean, min, max, std_dev) = crate::utils::calculate_stats(&sorted);
    let latency = LatencySummary {
        samples: sorted.len(),
        min_ms: min,
        max_ms: max,
        mean_ms: mean,
        median_ms: nearest_rank(&sorted, 0.50).unwrap_or_default(),
        p95_ms: nearest_rank(&sorted, 0.95).unwrap_or_default(),
        p99_ms: nearest_rank(&sorted, 0.99).unwrap_or_default(),
        std_dev_ms: std_dev,
    };

    Ok((throughput, latency))
}

/// Compute the size effect of `codec` on `records`.
///
/// A size reported by the transport takes precedence over the estimator.
pub fn reduce_compression(
    records: &[Record],
    codec: CompressionCodec,
    estimator: &dyn SizeEstimator,
    transport_bytes: Option<u64>,
) -> Result<CompressionStats> {
    let sample = serialize_all(records);
    let original_bytes = sample.len() as u64;

    let (compressed_bytes, size_source) = match (codec, transport_bytes) {
        (CompressionCodec::None, _) => (original_bytes, SizeSource::Measured),
        (_, Some(bytes)) => (bytes, SizeSource::Transport),
        (_, None) => {
            let size = estimator.estimate(&sample, codec)?;
            (size.bytes, size.source)
        }
    };

    Ok(compression_stats(
        codec,
        original_bytes,
        compressed_bytes,
        size_source,
    ))
}

/// Derive ratio and savings from raw sizes.
pub fn compression_stats(
    codec: CompressionCodec,
    original_bytes: u64,
    compressed_bytes: u64,
    size_source: SizeSource,
) -> CompressionStats {
    let ratio = if codec == CompressionCodec::None || original_bytes == 0 {
        0.0
    } else {
        ((1.0 - compressed_bytes as f64 / original_bytes as f64) * 100.0).clamp(0.0, 100.0)
    };

    CompressionStats {
        codec,
        original_bytes,
        compressed_bytes,
        compression_ratio_pct: ratio,
        bytes_saved: original_bytes.saturating_sub(compressed_bytes),
        size_source,
    }
}

/// Throughput of a run relative to the baseline run of its sweep
pub fn scaling_factor(throughput: f64, baseline: f64) -> f64 {
    if baseline > 0.0 {
        throughput / baseline
    } else {
        0.0
    }
}

/// Formatting helpers for console output
pub mod utils {
    /// Format a millisecond latency value
    pub fn format_latency_ms(latency_ms: f64) -> String {
        if latency_ms < 1.0 {
            format!("{:.0}μs", latency_ms * 1000.0)
        } else if latency_ms < 1000.0 {
            format!("{:.2}ms", latency_ms)
        } else {
            format!("{:.2}s", latency_ms / 1000.0)
        }
    }

    /// Format a percentage with one decimal
    pub fn format_ratio(ratio_pct: f64) -> String {
        format!("{:.1}%", ratio_pct)
    }
}
