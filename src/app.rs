//! One full invocation: configuration, workload, provisioning, sweeps and
//! the report, plus the mapping from failures to process exit codes.

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::broker::BrokerFactory;
use crate::cli::Args;
use crate::error::BenchError;
use crate::provision::{default_catalog, TopicProvisioner};
use crate::results::{Report, ReportAggregator, ResultsManager};
use crate::sweep::{SweepConfig, SweepContext, SweepOrchestrator, SweepPlan};
use crate::workload::Workload;

/// A setup error (configuration, provisioning, broker connection)
pub const EXIT_SETUP_FAILURE: u8 = 1;

/// The workload file does not exist
pub const EXIT_WORKLOAD_MISSING: u8 = 2;

/// Run every configured sweep and output the report.
///
/// The workload is loaded before the broker is touched, so a missing file
/// aborts without side effects.
pub async fn run(args: &Args) -> Result<Report> {
    let config = SweepConfig::from_args(args)?;
    crate::utils::validate_bootstrap(&config.bootstrap)?;

    info!("Starting Producer Sweep v{}", crate::VERSION);
    info!(
        "Broker: {} at {}, dimensions: {:?}",
        config.broker, config.bootstrap, config.dimensions
    );

    let workload = Workload::load_prefix(&config.workload, config.max_sample())?;
    if workload.is_empty() {
        return Err(BenchError::InvalidConfig(format!(
            "workload {} contains no records",
            workload.path().display()
        ))
        .into());
    }

    let broker = BrokerFactory::create(config.broker, &config.broker_config())
        .context("Failed to connect to broker")?;

    let mut ctx = SweepContext::new();
    info!("Run id: {}", ctx.run_id);

    let catalog = default_catalog(&config.topic_prefix, &config.partitions);
    let outcomes = TopicProvisioner::new(broker.clone())
        .strict(config.strict_topics)
        .ensure(&catalog)
        .await
        .context("Topic provisioning failed")?;
    ctx.record_provisioning(outcomes);

    if !config.provision_settle.is_zero() {
        info!("Waiting {:?} for topic metadata to settle", config.provision_settle);
        tokio::time::sleep(config.provision_settle).await;
    }

    let plans = config
        .dimensions
        .iter()
        .map(|&dimension| SweepPlan::for_dimension(dimension, &config))
        .collect::<Result<Vec<_>>>()?;

    let orchestrator = SweepOrchestrator::new(broker, config.run, config.size_estimate.build());
    orchestrator.run_all(&plans, &workload, &mut ctx).await;

    let report = ReportAggregator::new(config.min_throughput_fraction).aggregate(
        ctx,
        &config.bootstrap,
        config.broker,
    );
    ResultsManager::new(config.output_file.as_deref()).finalize(&report)?;

    let failed = report.failed_runs();
    if failed > 0 {
        warn!("{} configuration(s) failed; see the report for details", failed);
    }
    info!("Producer Sweep completed");
    Ok(report)
}

/// Exit code for a failed invocation
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match bench_error(err) {
        Some(BenchError::WorkloadMissing { .. }) => EXIT_WORKLOAD_MISSING,
        _ => EXIT_SETUP_FAILURE,
    }
}

/// Log `err` with remediation text where there is one, and return its
/// exit code.
pub fn report_failure(err: &anyhow::Error) -> u8 {
    if let Some(BenchError::WorkloadMissing { path }) = bench_error(err) {
        error!("Workload file not found: {}", path.display());
        error!("Generate the workload first (e.g. with the hydro data generator), or pass --workload <path>");
    } else {
        error!("Error: {:?}", err);
    }
    exit_code(err)
}

fn bench_error(err: &anyhow::Error) -> Option<&BenchError> {
    err.chain().find_map(|cause| cause.downcast_ref::<BenchError>())
}
