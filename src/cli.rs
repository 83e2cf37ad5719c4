use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::broker::BrokerKind;
use crate::compression::{CompressionCodec, EstimatorKind};

/// Producer Sweep - measure producer throughput and latency across batch,
/// linger, compression and partition settings
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Bootstrap broker address (host:port)
    #[clap(long, default_value = crate::defaults::BOOTSTRAP, help_heading = "Core Options")]
    pub bootstrap: String,

    /// Broker to run against (loopback runs in-process, no network)
    #[clap(long, value_enum, default_value_t = BrokerKind::Kafka, help_heading = "Core Options")]
    pub broker: BrokerKind,

    /// Newline-delimited JSON workload file
    #[clap(short = 'w', long, default_value = crate::defaults::WORKLOAD_FILE, help_heading = "Core Options")]
    pub workload: PathBuf,

    /// Sweep dimensions to run (space-separated: batch-linger, compression, partitioning, or all)
    #[clap(short = 'd', long, value_enum, default_values_t = vec![Dimension::All], num_args = 1.., help_heading = "Core Options")]
    pub dimensions: Vec<Dimension>,

    /// Batch/linger pairs for the batch sweep, as bytes:ms
    #[clap(long, value_parser = parse_batch_linger, default_values_t = BatchLinger::defaults(), num_args = 1.., help_heading = "Sweep Options")]
    pub batch_linger: Vec<BatchLinger>,

    /// Codecs for the compression sweep
    #[clap(long, value_enum, default_values_t = CompressionCodec::ALL.to_vec(), num_args = 1.., help_heading = "Sweep Options")]
    pub codecs: Vec<CompressionCodec>,

    /// Partition counts for the partitioning sweep
    #[clap(long, default_values_t = crate::defaults::PARTITION_COUNTS.to_vec(), num_args = 1.., help_heading = "Sweep Options")]
    pub partitions: Vec<u32>,

    /// Records sent per batch/linger run
    #[clap(long, default_value_t = crate::defaults::BATCH_SAMPLE, help_heading = "Sweep Options")]
    pub batch_sample: usize,

    /// Records sent per compression run
    #[clap(long, default_value_t = crate::defaults::COMPRESSION_SAMPLE, help_heading = "Sweep Options")]
    pub compression_sample: usize,

    /// Records sent per partitioning run
    #[clap(long, default_value_t = crate::defaults::PARTITION_SAMPLE, help_heading = "Sweep Options")]
    pub partition_sample: usize,

    /// Record field used as the routing key in the partitioning sweep
    #[clap(long, default_value = crate::defaults::KEY_FIELD, help_heading = "Sweep Options")]
    pub key_field: String,

    /// Prefix for every topic name
    #[clap(long, default_value = crate::defaults::TOPIC_PREFIX, help_heading = "Sweep Options")]
    pub topic_prefix: String,

    /// Maximum wait for a single acknowledgment [default: 10s]
    #[clap(long, value_parser = parse_duration, help_heading = "Timing Options")]
    pub ack_timeout: Option<Duration>,

    /// Fixed pause after each run, 0s disables it [default: 2s]
    #[clap(long, value_parser = parse_duration, help_heading = "Timing Options")]
    pub settle_delay: Option<Duration>,

    /// Maximum wait for in-flight requests before a session is closed [default: 5s]
    #[clap(long, value_parser = parse_duration, help_heading = "Timing Options")]
    pub drain_timeout: Option<Duration>,

    /// Pause after provisioning so topic metadata can propagate [default: 3s]
    #[clap(long, value_parser = parse_duration, help_heading = "Timing Options")]
    pub provision_settle: Option<Duration>,

    /// How compressed sizes are estimated when the transport cannot report them
    #[clap(long, value_enum, default_value_t = EstimatorKind::Modeled, help_heading = "Report Options")]
    pub size_estimate: EstimatorKind,

    /// Codecs below this fraction of the best codec throughput are not recommended
    #[clap(long, default_value_t = crate::defaults::MIN_THROUGHPUT_FRACTION, help_heading = "Report Options")]
    pub min_throughput_fraction: f64,

    /// Fail when an existing topic has a different partition count
    #[clap(long, default_value_t = false, help_heading = "Report Options")]
    pub strict_topics: bool,

    /// Output file for the report (JSON format)
    #[clap(short = 'o', long, help_heading = "Report Options")]
    pub output_file: Option<PathBuf>,

    /// Only log warnings and errors
    #[clap(short = 'q', long, default_value_t = false)]
    pub quiet: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Also write logs to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,
}

/// Producer settings a sweep can vary
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Batch size and linger time
    #[clap(name = "batch-linger")]
    BatchLinger,

    /// Compression codec
    #[clap(name = "compression")]
    Compression,

    /// Topic partition count
    #[clap(name = "partitioning")]
    Partitioning,

    /// All dimensions
    #[clap(name = "all")]
    All,
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dimension::BatchLinger => write!(f, "Batch/Linger"),
            Dimension::Compression => write!(f, "Compression"),
            Dimension::Partitioning => write!(f, "Partitioning"),
            Dimension::All => write!(f, "All Dimensions"),
        }
    }
}

impl Dimension {
    /// Expand the "All" variant, dropping duplicates while keeping order
    pub fn expand_all(dimensions: Vec<Dimension>) -> Vec<Dimension> {
        if dimensions.contains(&Dimension::All) {
            return vec![
                Dimension::BatchLinger,
                Dimension::Compression,
                Dimension::Partitioning,
            ];
        }
        let mut expanded = Vec::with_capacity(dimensions.len());
        for dimension in dimensions {
            if !expanded.contains(&dimension) {
                expanded.push(dimension);
            }
        }
        expanded
    }
}

/// One point of the batch/linger sweep
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLinger {
    pub batch_size: usize,
    pub linger_ms: u64,
}

impl BatchLinger {
    pub fn new(batch_size: usize, linger_ms: u64) -> Self {
        Self {
            batch_size,
            linger_ms,
        }
    }

    pub fn defaults() -> Vec<BatchLinger> {
        crate::defaults::BATCH_LINGER
            .iter()
            .map(|&(batch_size, linger_ms)| BatchLinger::new(batch_size, linger_ms))
            .collect()
    }
}

impl std::fmt::Display for BatchLinger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.batch_size, self.linger_ms)
    }
}

/// Parse a `bytes:ms` pair (e.g., "262144:50")
pub fn parse_batch_linger(s: &str) -> Result<BatchLinger, String> {
    let (batch, linger) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| format!("Expected bytes:ms, got '{}'", s))?;

    let batch_size: usize = batch
        .trim()
        .parse()
        .map_err(|_| format!("Invalid batch size: {}", batch))?;
    let linger_ms: u64 = linger
        .trim()
        .parse()
        .map_err(|_| format!("Invalid linger: {}", linger))?;

    if batch_size == 0 {
        return Err("Batch size must be greater than 0".to_string());
    }

    Ok(BatchLinger::new(batch_size, linger_ms))
}

/// Parse duration from string (e.g., "500ms", "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let secs = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(secs)
        .map_err(|e| format!("Duration out of range: {} ({})", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("1e20s").is_err());
        assert!(parse_duration("1e17h").is_err());
    }

    #[test]
    fn test_huge_duration_is_a_parse_error() {
        let result = Args::try_parse_from(["producer-sweep", "--ack-timeout", "1e20"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_batch_linger() {
        assert_eq!(
            parse_batch_linger("262144:50").unwrap(),
            BatchLinger::new(262144, 50)
        );
        assert_eq!(parse_batch_linger(" 16384 : 0 ").unwrap(), BatchLinger::new(16384, 0));

        assert!(parse_batch_linger("262144").is_err());
        assert!(parse_batch_linger("abc:50").is_err());
        assert!(parse_batch_linger("1024:-5").is_err());
        assert!(parse_batch_linger("0:10").is_err());
    }

    #[test]
    fn test_batch_linger_defaults() {
        let defaults = BatchLinger::defaults();
        assert_eq!(defaults.len(), 6);
        assert_eq!(defaults[0], BatchLinger::new(16384, 0));
        assert_eq!(defaults[5], BatchLinger::new(1048576, 500));
        assert_eq!(defaults[2].to_string(), "262144:50");
    }

    #[test]
    fn test_dimension_display() {
        assert_eq!(Dimension::BatchLinger.to_string(), "Batch/Linger");
        assert_eq!(Dimension::Compression.to_string(), "Compression");
        assert_eq!(Dimension::Partitioning.to_string(), "Partitioning");
        assert_eq!(Dimension::All.to_string(), "All Dimensions");
    }

    #[test]
    fn test_dimension_expand_all() {
        let all = vec![
            Dimension::BatchLinger,
            Dimension::Compression,
            Dimension::Partitioning,
        ];
        assert_eq!(Dimension::expand_all(vec![Dimension::All]), all);
        assert_eq!(
            Dimension::expand_all(vec![Dimension::Compression, Dimension::All]),
            all
        );
        assert_eq!(
            Dimension::expand_all(vec![Dimension::Partitioning, Dimension::Partitioning]),
            vec![Dimension::Partitioning]
        );
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["producer-sweep"]);
        assert_eq!(args.bootstrap, "localhost:9092");
        assert_eq!(args.broker, BrokerKind::Kafka);
        assert_eq!(args.dimensions, vec![Dimension::All]);
        assert_eq!(args.batch_linger, BatchLinger::defaults());
        assert_eq!(args.codecs, CompressionCodec::ALL.to_vec());
        assert_eq!(args.partitions, vec![2, 4, 8]);
        assert_eq!(args.ack_timeout, None);
        assert_eq!(args.settle_delay, None);
        assert_eq!(args.provision_settle, None);
        assert_eq!(args.size_estimate, EstimatorKind::Modeled);
        assert!(args.output_file.is_none());
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "producer-sweep",
            "--broker",
            "loopback",
            "-d",
            "compression",
            "partitioning",
            "--codecs",
            "lz4",
            "zstd",
            "--batch-linger",
            "1024:1",
            "--settle-delay",
            "0s",
            "-vv",
        ]);
        assert_eq!(args.broker, BrokerKind::Loopback);
        assert_eq!(
            args.dimensions,
            vec![Dimension::Compression, Dimension::Partitioning]
        );
        assert_eq!(args.codecs, vec![CompressionCodec::Lz4, CompressionCodec::Zstd]);
        assert_eq!(args.batch_linger, vec![BatchLinger::new(1024, 1)]);
        assert_eq!(args.settle_delay, Some(Duration::ZERO));
        assert_eq!(args.verbose, 2);
    }
}
