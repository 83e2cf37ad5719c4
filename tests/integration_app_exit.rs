mod common;

use anyhow::Result;
use clap::Parser;
use producer_sweep::{
    app::{self, EXIT_SETUP_FAILURE, EXIT_WORKLOAD_MISSING},
    cli::{Args, Dimension},
};

fn loopback_args(workload: &str, extra: &[&str]) -> Args {
    let mut argv = vec![
        "producer-sweep",
        "--broker",
        "loopback",
        "--workload",
        workload,
        "--settle-delay",
        "0s",
        "--provision-settle",
        "0s",
        "--drain-timeout",
        "100ms",
    ];
    argv.extend_from_slice(extra);
    Args::parse_from(argv)
}

#[tokio::test]
async fn missing_workload_exits_with_code_two() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("hydro_test_1000.json");
    let args = loopback_args(&path.to_string_lossy(), &[]);

    let err = app::run(&args).await.unwrap_err();
    assert_eq!(app::exit_code(&err), EXIT_WORKLOAD_MISSING);
    assert_eq!(app::report_failure(&err), EXIT_WORKLOAD_MISSING);
}

#[tokio::test]
async fn setup_errors_exit_with_code_one() -> Result<()> {
    let file = common::write_workload(10);
    let workload = file.path().to_string_lossy().to_string();

    let bad_bootstrap = loopback_args(&workload, &["--bootstrap", "localhost"]);
    let err = app::run(&bad_bootstrap).await.unwrap_err();
    assert_eq!(app::exit_code(&err), EXIT_SETUP_FAILURE);

    let bad_fraction = loopback_args(&workload, &["--min-throughput-fraction", "0"]);
    let err = app::run(&bad_fraction).await.unwrap_err();
    assert_eq!(app::exit_code(&err), EXIT_SETUP_FAILURE);

    let empty = tempfile::NamedTempFile::new()?;
    let args = loopback_args(&empty.path().to_string_lossy(), &[]);
    let err = app::run(&args).await.unwrap_err();
    assert_eq!(app::exit_code(&err), EXIT_SETUP_FAILURE);
    Ok(())
}

#[tokio::test]
async fn loopback_invocation_writes_report() -> Result<()> {
    let file = common::write_workload(60);
    let report_file = tempfile::NamedTempFile::new()?;
    let workload = file.path().to_string_lossy().to_string();
    let output = report_file.path().to_string_lossy().to_string();

    let args = loopback_args(
        &workload,
        &[
            "-d",
            "compression",
            "partitioning",
            "--compression-sample",
            "40",
            "--partition-sample",
            "60",
            "-o",
            &output,
        ],
    );
    let report = app::run(&args).await?;

    assert_eq!(report.failed_runs(), 0);
    assert!(!report.sweeps.contains_key(&Dimension::BatchLinger));
    assert_eq!(report.sweeps[&Dimension::Compression].sample_size, 40);
    assert_eq!(report.sweeps[&Dimension::Partitioning].runs.len(), 3);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report_file.path())?)?;
    assert_eq!(json["metadata"]["broker"], "loopback");
    assert!(json["sweeps"]["partitioning"].is_object());
    Ok(())
}
