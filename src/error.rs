//! Error taxonomy for sweep execution.
//!
//! Errors fall into two groups. Run-level failures (`AckTimeout`, `Delivery`,
//! `EmptyRun`) abort a single configuration; the sweep orchestrator records
//! them and moves on. Setup failures (`Provisioning`, `TopicMismatch`,
//! `WorkloadMissing`, `WorkloadParse`, `InvalidConfig`) propagate to `main`
//! and end the process with a non-zero exit code.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    /// The administrative interface rejected a topic for a reason other
    /// than "already exists".
    #[error("failed to provision topic '{topic}': {reason}")]
    Provisioning { topic: String, reason: String },

    /// An existing topic has a different partition count (strict mode only).
    #[error("topic '{topic}' has {actual} partitions, expected {expected}")]
    TopicMismatch {
        topic: String,
        expected: u32,
        actual: u32,
    },

    #[error("record {index} on topic '{topic}' was not acknowledged within {timeout:?}")]
    AckTimeout {
        topic: String,
        index: usize,
        timeout: Duration,
    },

    #[error("broker rejected record {index} on topic '{topic}': {reason}")]
    Delivery {
        topic: String,
        index: usize,
        reason: String,
    },

    #[error("workload file not found: {}", path.display())]
    WorkloadMissing { path: PathBuf },

    #[error("invalid record at {}:{line}: {reason}", path.display())]
    WorkloadParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A run produced no samples or no measurable elapsed time.
    #[error("cannot reduce a run with {samples} samples over {duration:?}")]
    EmptyRun { samples: usize, duration: Duration },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
