//! # Utility Functions and Helper Module
//!
//! Formatters for human-readable console output, input validation, the basic
//! statistics used by the metrics reducer, and the table helpers the report
//! summary is printed with.
//!
//! ## Usage Examples
//!
//! ```rust
//! use producer_sweep::utils::*;
//! use std::time::Duration;
//!
//! let duration_str = format_duration(Duration::from_micros(1500));
//! assert_eq!(duration_str, "1.50ms");
//!
//! let rate_str = format_rate(1048576.0);
//! assert_eq!(rate_str, "1.00 MB/s");
//!
//! assert!(validate_bootstrap("localhost:9092").is_ok());
//! ```

use anyhow::Result;
use std::time::Duration;
use uuid::Uuid;

/// Generate a unique identifier for one invocation
///
/// The identifier is a UUID v4 string. It tags the report and the log lines
/// of a single sweep run.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a duration in a human-readable way
///
/// ## Unit Selection Logic
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
///
/// ## Examples
///
/// ```rust
/// # use producer_sweep::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format bytes in a human-readable way (1024-based units)
///
/// ```rust
/// # use producer_sweep::utils::format_bytes;
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// assert_eq!(format_bytes(2621440), "2.50 MB");
/// ```
pub fn format_bytes(bytes: usize) -> String {
    format_bytes_f64(bytes as f64)
}

pub fn format_bytes_f64(bytes: f64) -> String {
    if bytes < 1024.0 {
        format!("{:.0} B", bytes)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a byte rate with a "/s" suffix
pub fn format_rate(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes_f64(bytes_per_second))
}

/// Format a record rate in a human-readable way
///
/// Uses decimal scaling:
/// - Records/sec: < 1,000 (e.g., "750 rec/s")
/// - Thousands: < 1,000,000 (e.g., "15.50K rec/s")
/// - Millions: ≥ 1,000,000 (e.g., "2.30M rec/s")
pub fn format_message_rate(records_per_second: f64) -> String {
    if records_per_second < 1000.0 {
        format!("{:.1} rec/s", records_per_second)
    } else if records_per_second < 1_000_000.0 {
        format!("{:.2}K rec/s", records_per_second / 1000.0)
    } else {
        format!("{:.2}M rec/s", records_per_second / 1_000_000.0)
    }
}

/// Calculate statistics from a slice of values
///
/// ## Returns
/// Tuple of (mean, min, max, standard_deviation). An empty slice yields
/// all zeros.
///
/// Uses the population standard deviation: σ = √(Σ(x - μ)² / N)
///
/// ```rust
/// # use producer_sweep::utils::calculate_stats;
/// let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
/// let (mean, min, max, _std_dev) = calculate_stats(&values);
/// assert_eq!(mean, 3.0);
/// assert_eq!(min, 1.0);
/// assert_eq!(max, 5.0);
/// ```
pub fn calculate_stats(values: &[f64]) -> (f64, f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }

    let sum: f64 = values.iter().sum();
    let count = values.len() as f64;
    let mean = sum / count;

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count;
    let std_dev = variance.sqrt();

    (mean, min, max, std_dev)
}

/// Validate that a per-run sample size is usable
pub fn validate_sample_size(name: &str, size: usize) -> Result<()> {
    if size == 0 {
        return Err(crate::error::BenchError::InvalidConfig(format!(
            "{} must be greater than 0",
            name
        ))
        .into());
    }
    Ok(())
}

/// Validate a bootstrap address of the form `host:port`
///
/// Only the shape is checked; reachability surfaces during provisioning.
pub fn validate_bootstrap(bootstrap: &str) -> Result<()> {
    for server in bootstrap.split(',') {
        let (host, port) = server
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("Bootstrap server '{}' is missing a port", server))?;
        if host.is_empty() {
            anyhow::bail!("Bootstrap server '{}' is missing a host", server);
        }
        port.parse::<u16>()
            .map_err(|_| anyhow::anyhow!("Invalid port in bootstrap server '{}'", server))?;
    }
    Ok(())
}

/// Get the number of logical CPU cores
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}

/// Print a table row with proper formatting
///
/// ```rust
/// # use producer_sweep::utils::{print_table_row, print_table_separator};
/// let widths = [15, 10, 12];
/// print_table_separator(&widths);
/// print_table_row(&["Config", "Latency", "Throughput"], &widths);
/// print_table_separator(&widths);
/// ```
pub fn print_table_row(columns: &[&str], widths: &[usize]) {
    print!("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        print!(" {:width$} |", column, width = width);
    }
    println!();
}

/// Print a table separator
///
/// ```text
/// +----------------+-----------+-------------+
/// | Config         | Latency   | Throughput  |
/// +----------------+-----------+-------------+
/// ```
pub fn print_table_separator(widths: &[usize]) {
    print!("+");
    for &width in widths {
        print!("{}", "-".repeat(width + 2));
        print!("+");
    }
    println!();
}
