//! # Producer Sweep - Main Entry Point
//!
//! Runs the configured producer sweeps against one broker and reports the
//! results.
//!
//! ## Lifecycle
//!
//! 1. **Parse arguments** and validate them into a `SweepConfig`
//! 2. **Initialize logging** (console, optional file)
//! 3. **Load the workload** before touching the broker, so a missing file
//!    aborts without side effects
//! 4. **Provision topics**, then pause while metadata propagates
//! 5. **Run sweeps**, one dimension at a time; failed configurations are
//!    recorded and skipped
//! 6. **Aggregate and output** the report
//!
//! ## Exit Codes
//!
//! - `0`: all sweeps ran (individual configurations may have failed)
//! - `1`: a setup error (configuration, provisioning, broker connection)
//! - `2`: the workload file does not exist

use clap::Parser;
use producer_sweep::{app, cli::Args, logging};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Held until exit so the file writer flushes.
    let _log_guard = match logging::init_logging(args.verbose, args.quiet, args.log_file.as_deref())
    {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(app::EXIT_SETUP_FAILURE);
        }
    };

    match app::run(&args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(app::report_failure(&e)),
    }
}
