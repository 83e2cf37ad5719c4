//! Report aggregation and output.
//!
//! [`ReportAggregator`] folds a finished [`SweepContext`] into a [`Report`]
//! and derives recommendations by simple thresholding. It performs no I/O.
//! [`ResultsManager`] prints the summary table and writes the JSON file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::broker::BrokerKind;
use crate::cli::Dimension;
use crate::compression::{CompressionCodec, SizeSource};
use crate::metrics::{self, RunResult};
use crate::provision::ProvisionOutcome;
use crate::sweep::{RunOutcome, SweepContext, SweepResult};
use crate::utils::{format_message_rate, print_table_row, print_table_separator};

/// Scaling at or below this means extra partitions did not help
pub const SCALING_NOTE_THRESHOLD: f64 = 1.1;

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub tool_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: crate::utils::get_cpu_cores(),
            tool_version: crate::VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub version: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub bootstrap: String,
    pub broker: BrokerKind,
    pub system_info: SystemInfo,
}

/// A derived, human-actionable finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    HighestThroughput {
        dimension: Dimension,
        label: String,
        records_per_second: f64,
    },
    LowestP99 {
        dimension: Dimension,
        label: String,
        p99_ms: f64,
    },
    /// Best ratio among codecs fast enough to be worth using
    Codec {
        codec: CompressionCodec,
        compression_ratio_pct: f64,
        size_source: SizeSource,
        records_per_second: f64,
        min_throughput_fraction: f64,
    },
    PartitionCount {
        label: String,
        partitions: Option<u32>,
        scaling_factor: f64,
        note: Option<String>,
    },
    FailedRuns {
        dimension: Dimension,
        labels: Vec<String>,
    },
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recommendation::HighestThroughput {
                dimension,
                label,
                records_per_second,
            } => write!(
                f,
                "{}: highest throughput with {} ({})",
                dimension,
                label,
                format_message_rate(*records_per_second)
            ),
            Recommendation::LowestP99 {
                dimension,
                label,
                p99_ms,
            } => write!(
                f,
                "{}: lowest p99 latency with {} ({})",
                dimension,
                label,
                metrics::utils::format_latency_ms(*p99_ms)
            ),
            Recommendation::Codec {
                codec,
                compression_ratio_pct,
                size_source,
                min_throughput_fraction,
                ..
            } => write!(
                f,
                "Compression: use {} ({} smaller, {}; throughput within {:.0}% of the fastest codec)",
                codec,
                metrics::utils::format_ratio(*compression_ratio_pct),
                size_source,
                min_throughput_fraction * 100.0
            ),
            Recommendation::PartitionCount {
                label,
                scaling_factor,
                note,
                ..
            } => {
                write!(f, "Partitioning: best scaling with {} ({:.2}x)", label, scaling_factor)?;
                if let Some(note) = note {
                    write!(f, "; {}", note)?;
                }
                Ok(())
            }
            Recommendation::FailedRuns { dimension, labels } => write!(
                f,
                "{}: {} configuration(s) failed: {}",
                dimension,
                labels.len(),
                labels.join(", ")
            ),
        }
    }
}

/// Everything one invocation measured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub provisioning: Vec<ProvisionOutcome>,
    pub sweeps: BTreeMap<Dimension, SweepResult>,
    pub recommendations: Vec<Recommendation>,
}

impl Report {
    pub fn failed_runs(&self) -> usize {
        self.sweeps.values().map(|s| s.failed().count()).sum()
    }
}

/// Builds the final report
#[derive(Debug, Clone, Copy)]
pub struct ReportAggregator {
    min_throughput_fraction: f64,
}

impl Default for ReportAggregator {
    fn default() -> Self {
        Self::new(crate::defaults::MIN_THROUGHPUT_FRACTION)
    }
}

impl ReportAggregator {
    pub fn new(min_throughput_fraction: f64) -> Self {
        Self {
            min_throughput_fraction,
        }
    }

    /// Consume the context of a finished invocation.
    pub fn aggregate(&self, ctx: SweepContext, bootstrap: &str, broker: BrokerKind) -> Report {
        let recommendations = self.recommend(&ctx.sweeps);
        Report {
            metadata: ReportMetadata {
                version: crate::VERSION.to_string(),
                run_id: ctx.run_id,
                started_at: ctx.started_at,
                finished_at: Utc::now(),
                bootstrap: bootstrap.to_string(),
                broker,
                system_info: SystemInfo::default(),
            },
            provisioning: ctx.provisioning,
            sweeps: ctx.sweeps,
            recommendations,
        }
    }

    pub fn recommend(&self, sweeps: &BTreeMap<Dimension, SweepResult>) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        if let Some(sweep) = sweeps.get(&Dimension::BatchLinger) {
            recommendations.extend(batch_recommendations(sweep));
        }
        if let Some(sweep) = sweeps.get(&Dimension::Compression) {
            recommendations.extend(self.codec_recommendation(sweep));
        }
        if let Some(sweep) = sweeps.get(&Dimension::Partitioning) {
            recommendations.extend(partition_recommendation(sweep));
        }

        for sweep in sweeps.values() {
            let labels: Vec<String> = sweep
                .failed()
                .map(|run| run.label().to_string())
                .collect();
            if !labels.is_empty() {
                recommendations.push(Recommendation::FailedRuns {
                    dimension: sweep.dimension,
                    labels,
                });
            }
        }

        recommendations
    }

    fn codec_recommendation(&self, sweep: &SweepResult) -> Option<Recommendation> {
        let runs: Vec<&RunResult> = sweep
            .completed()
            .filter(|run| run.compression.is_some())
            .collect();
        let best_throughput = runs
            .iter()
            .map(|run| run.throughput())
            .fold(f64::NEG_INFINITY, f64::max);
        let floor = best_throughput * self.min_throughput_fraction;

        let mut chosen: Option<&RunResult> = None;
        for run in runs.iter().copied().filter(|run| run.throughput() >= floor) {
            let ratio = ratio_of(run);
            if chosen.map_or(true, |best| ratio > ratio_of(best)) {
                chosen = Some(run);
            }
        }

        let run = chosen?;
        let stats = run.compression.as_ref()?;
        Some(Recommendation::Codec {
            codec: stats.codec,
            compression_ratio_pct: stats.compression_ratio_pct,
            size_source: stats.size_source,
            records_per_second: run.throughput(),
            min_throughput_fraction: self.min_throughput_fraction,
        })
    }
}

fn ratio_of(run: &RunResult) -> f64 {
    run.compression
        .as_ref()
        .map_or(0.0, |stats| stats.compression_ratio_pct)
}

fn batch_recommendations(sweep: &SweepResult) -> Vec<Recommendation> {
    let mut out = Vec::new();

    let fastest = sweep
        .completed()
        .fold(None::<&RunResult>, |best, run| match best {
            Some(b) if b.throughput() >= run.throughput() => Some(b),
            _ => Some(run),
        });
    if let Some(run) = fastest {
        out.push(Recommendation::HighestThroughput {
            dimension: sweep.dimension,
            label: run.label.clone(),
            records_per_second: run.throughput(),
        });
    }

    let quickest = sweep
        .completed()
        .fold(None::<&RunResult>, |best, run| match best {
            Some(b) if b.latency.p99_ms <= run.latency.p99_ms => Some(b),
            _ => Some(run),
        });
    if let Some(run) = quickest {
        out.push(Recommendation::LowestP99 {
            dimension: sweep.dimension,
            label: run.label.clone(),
            p99_ms: run.latency.p99_ms,
        });
    }

    out
}

fn partition_recommendation(sweep: &SweepResult) -> Option<Recommendation> {
    let scaling = |run: &RunResult| run.scaling_factor.unwrap_or(0.0);
    let best = sweep
        .completed()
        .fold(None::<&RunResult>, |best, run| match best {
            Some(b) if scaling(b) >= scaling(run) => Some(b),
            _ => Some(run),
        })?;

    let best_scaling = scaling(best);
    let note = (best_scaling <= SCALING_NOTE_THRESHOLD).then(|| {
        "adding partitions did not raise single-producer throughput; \
         choose the count for consumer parallelism and key locality"
            .to_string()
    });

    Some(Recommendation::PartitionCount {
        label: best.label.clone(),
        partitions: best.partitions,
        scaling_factor: best_scaling,
        note,
    })
}

/// Prints and persists a finished report
pub struct ResultsManager {
    output_file: Option<PathBuf>,
}

impl ResultsManager {
    pub fn new(output_file: Option<&Path>) -> Self {
        Self {
            output_file: output_file.map(Path::to_path_buf),
        }
    }

    /// Print the summary and write the JSON file, if one was requested
    pub fn finalize(&self, report: &Report) -> Result<()> {
        print_summary(report);
        for recommendation in &report.recommendations {
            info!("Recommendation: {}", recommendation);
        }

        if let Some(path) = &self.output_file {
            write_report(report, path)?;
            info!("Results written to: {:?}", path);
        }
        Ok(())
    }
}

/// Write `report` to `path` as pretty-printed JSON
pub fn write_report(report: &Report, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}

const SUMMARY_WIDTHS: [usize; 8] = [12, 18, 14, 10, 10, 10, 16, 8];

/// One row per run, failed runs included
pub fn print_summary(report: &Report) {
    println!();
    println!(
        "Producer sweep {} against {} ({})",
        report.metadata.run_id, report.metadata.bootstrap, report.metadata.broker
    );
    print_table_separator(&SUMMARY_WIDTHS);
    print_table_row(
        &[
            "Dimension",
            "Config",
            "Throughput",
            "Mean",
            "P95",
            "P99",
            "Compression",
            "Scaling",
        ],
        &SUMMARY_WIDTHS,
    );
    print_table_separator(&SUMMARY_WIDTHS);

    for sweep in report.sweeps.values() {
        let dimension = sweep.dimension.to_string();
        for run in &sweep.runs {
            let row = match run {
                RunOutcome::Completed(result) => summary_row(&dimension, result),
                RunOutcome::Failed { label, .. } => vec![
                    dimension.clone(),
                    label.clone(),
                    "FAILED".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                ],
            };
            let columns: Vec<&str> = row.iter().map(String::as_str).collect();
            print_table_row(&columns, &SUMMARY_WIDTHS);
        }
    }
    print_table_separator(&SUMMARY_WIDTHS);
}

fn summary_row(dimension: &str, result: &RunResult) -> Vec<String> {
    let compression = result.compression.as_ref().map_or("-".to_string(), |stats| {
        format!(
            "{} ({})",
            metrics::utils::format_ratio(stats.compression_ratio_pct),
            stats.size_source
        )
    });
    let scaling = result
        .scaling_factor
        .map_or("-".to_string(), |s| format!("{:.2}x", s));

    vec![
        dimension.to_string(),
        result.label.clone(),
        format_message_rate(result.throughput()),
        metrics::utils::format_latency_ms(result.latency.mean_ms),
        metrics::utils::format_latency_ms(result.latency.p95_ms),
        metrics::utils::format_latency_ms(result.latency.p99_ms),
        compression,
        scaling,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ProducerConfig;
    use crate::compression::SizeSource;
    use crate::metrics::{compression_stats, LatencySummary, ThroughputMetrics};
    use tempfile::NamedTempFile;

    fn run(label: &str, throughput: f64, p99_ms: f64) -> RunResult {
        RunResult {
            label: label.to_string(),
            topic: "t".to_string(),
            producer: ProducerConfig::new(16384, 0, CompressionCodec::Lz4),
            partitions: None,
            throughput: ThroughputMetrics {
                records_per_second: throughput,
                bytes_per_second: throughput * 100.0,
                total_records: 100,
                total_bytes: 10_000,
                duration_secs: 100.0 / throughput,
            },
            latency: LatencySummary {
                samples: 100,
                min_ms: 0.1,
                max_ms: p99_ms,
                mean_ms: 1.0,
                median_ms: 0.9,
                p95_ms: p99_ms / 2.0,
                p99_ms,
                std_dev_ms: 0.2,
            },
            compression: None,
            scaling_factor: None,
            timestamp: Utc::now(),
        }
    }

    fn codec_run(codec: CompressionCodec, throughput: f64) -> RunResult {
        let mut result = run(codec.as_str(), throughput, 5.0);
        let compressed = (10_000.0 * codec.modeled_factor()) as u64;
        result.compression = Some(compression_stats(
            codec,
            10_000,
            compressed,
            SizeSource::Modeled,
        ));
        result
    }

    fn sweep(dimension: Dimension, runs: Vec<RunOutcome>) -> SweepResult {
        SweepResult {
            dimension,
            sample_size: 100,
            runs,
        }
    }

    fn failed(label: &str) -> RunOutcome {
        RunOutcome::Failed {
            label: label.to_string(),
            topic: "t".to_string(),
            error: "acknowledgment timed out".to_string(),
        }
    }

    #[test]
    fn test_batch_recommendations() {
        let mut sweeps = BTreeMap::new();
        sweeps.insert(
            Dimension::BatchLinger,
            sweep(
                Dimension::BatchLinger,
                vec![
                    RunOutcome::Completed(run("16384B/0ms", 900.0, 4.0)),
                    RunOutcome::Completed(run("262144B/50ms", 1200.0, 6.0)),
                    RunOutcome::Completed(run("1048576B/500ms", 1100.0, 3.0)),
                ],
            ),
        );

        let recs = ReportAggregator::default().recommend(&sweeps);
        assert!(recs.contains(&Recommendation::HighestThroughput {
            dimension: Dimension::BatchLinger,
            label: "262144B/50ms".into(),
            records_per_second: 1200.0,
        }));
        assert!(recs.contains(&Recommendation::LowestP99 {
            dimension: Dimension::BatchLinger,
            label: "1048576B/500ms".into(),
            p99_ms: 3.0,
        }));
    }

    #[test]
    fn test_codec_recommendation_respects_throughput_floor() {
        let mut sweeps = BTreeMap::new();
        sweeps.insert(
            Dimension::Compression,
            sweep(
                Dimension::Compression,
                vec![
                    RunOutcome::Completed(codec_run(CompressionCodec::None, 1000.0)),
                    RunOutcome::Completed(codec_run(CompressionCodec::Snappy, 950.0)),
                    RunOutcome::Completed(codec_run(CompressionCodec::Lz4, 900.0)),
                    RunOutcome::Completed(codec_run(CompressionCodec::Zstd, 500.0)),
                ],
            ),
        );

        let recs = ReportAggregator::new(0.8).recommend(&sweeps);
        match &recs[0] {
            Recommendation::Codec {
                codec, size_source, ..
            } => {
                assert_eq!(*codec, CompressionCodec::Lz4);
                assert_eq!(*size_source, SizeSource::Modeled);
            }
            other => panic!("unexpected recommendation {:?}", other),
        }

        let recs = ReportAggregator::new(0.5).recommend(&sweeps);
        assert!(matches!(
            recs[0],
            Recommendation::Codec {
                codec: CompressionCodec::Zstd,
                ..
            }
        ));
    }

    #[test]
    fn test_partition_note_when_scaling_is_flat() {
        let mut runs = Vec::new();
        for (count, factor) in [(2, 1.0), (4, 1.05), (8, 0.97)] {
            let mut result = run(&format!("{} partitions", count), 1000.0 * factor, 5.0);
            result.partitions = Some(count);
            result.scaling_factor = Some(factor);
            runs.push(RunOutcome::Completed(result));
        }
        let mut sweeps = BTreeMap::new();
        sweeps.insert(Dimension::Partitioning, sweep(Dimension::Partitioning, runs));

        let recs = ReportAggregator::default().recommend(&sweeps);
        match &recs[0] {
            Recommendation::PartitionCount {
                partitions, note, ..
            } => {
                assert_eq!(*partitions, Some(4));
                assert!(note.is_some());
            }
            other => panic!("unexpected recommendation {:?}", other),
        }
    }

    #[test]
    fn test_failed_runs_are_listed() {
        let mut sweeps = BTreeMap::new();
        sweeps.insert(
            Dimension::Compression,
            sweep(
                Dimension::Compression,
                vec![
                    failed("none"),
                    RunOutcome::Completed(codec_run(CompressionCodec::Snappy, 900.0)),
                    failed("zstd"),
                ],
            ),
        );

        let recs = ReportAggregator::default().recommend(&sweeps);
        assert!(recs.contains(&Recommendation::FailedRuns {
            dimension: Dimension::Compression,
            labels: vec!["none".into(), "zstd".into()],
        }));
    }

    #[test]
    fn test_empty_sweeps_give_no_recommendations() {
        let sweeps = BTreeMap::new();
        assert!(ReportAggregator::default().recommend(&sweeps).is_empty());

        let mut sweeps = BTreeMap::new();
        sweeps.insert(
            Dimension::Compression,
            sweep(Dimension::Compression, vec![failed("lz4")]),
        );
        let recs = ReportAggregator::default().recommend(&sweeps);
        assert_eq!(recs.len(), 1);
    }

    #[test]
    fn test_report_json_round_trip() {
        let mut ctx = SweepContext::new();
        ctx.record_sweep(sweep(
            Dimension::Compression,
            vec![
                RunOutcome::Completed(codec_run(CompressionCodec::Zstd, 800.0)),
                failed("snappy"),
            ],
        ));
        let report =
            ReportAggregator::default().aggregate(ctx, "localhost:9092", BrokerKind::Loopback);
        assert_eq!(report.failed_runs(), 1);

        let file = NamedTempFile::new().unwrap();
        write_report(&report, file.path()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();

        let runs = &json["sweeps"]["compression"]["runs"];
        assert_eq!(runs[0]["outcome"], "completed");
        assert_eq!(runs[0]["compression"]["size_source"], "modeled");
        assert_eq!(runs[1]["outcome"], "failed");
        assert_eq!(json["metadata"]["broker"], "loopback");
        assert!(json["metadata"]["system_info"]["cpu_cores"].as_u64().unwrap() > 0);

        let parsed: Report = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.sweeps.len(), 1);
    }

    #[test]
    fn test_recommendation_display() {
        let rec = Recommendation::FailedRuns {
            dimension: Dimension::BatchLinger,
            labels: vec!["16384B/0ms".into()],
        };
        assert_eq!(
            rec.to_string(),
            "Batch/Linger: 1 configuration(s) failed: 16384B/0ms"
        );
    }
}
