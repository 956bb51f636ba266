//! # Load Generator Driver - Main Entry Point
//!
//! Runs one scenario with the external load tool and reports KPIs while it
//! runs.
//!
//! ## Architecture Overview
//!
//! The main function performs these key operations:
//! 1. **Initialize logging**: colored console output plus an optional log file
//! 2. **Parse arguments**: scenario and executor settings from the command line
//! 3. **Prepare and start the tool**: via the library's `Executor`
//! 4. **Poll**: check the tool once per interval and drain finished windows
//!    into the results manager, until the tool exits or Ctrl-C is pressed
//! 5. **Finish**: stop the tool, drain the last window, judge the exit status
//!    and write the run summary
//!
//! ## Error Handling
//!
//! Library errors are typed (`DriverError`); here they are wrapped in
//! `anyhow` with context. When the run fails, the executor's diagnostics
//! (tail of the tool's output, exit code) are logged before exiting.

use anyhow::{Context, Result};
use clap::Parser;
use loadgen_driver::{
    cli::Args,
    logging::ColorizedFormatter,
    results::ResultsManager,
    utils::{format_duration, generate_run_id},
    Executor, ExecutorSettings, ScenarioConfig,
};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // Held until exit so buffered file logs are flushed
    let _log_guard = init_logging(&args)?;

    info!("Starting Load Generator Driver {}", loadgen_driver::VERSION);
    tracing::debug!("Configuration: {:?}", args);

    let scenario = ScenarioConfig::from(&args);
    let settings = ExecutorSettings::from(&args);
    let mut executor = Executor::new(scenario, settings);

    let run_id = generate_run_id();
    let mut results = ResultsManager::new(&args.output_file, run_id.as_str())?;
    if let Some(ref streaming_file) = args.streaming_output {
        info!("Streaming datapoints to: {:?}", streaming_file);
        results.enable_streaming(streaming_file)?;
    }

    let started = Instant::now();
    let outcome = run(&mut executor, &mut results, &args).await;

    // Always stop the tool and collect what it wrote, even after a failure
    if let Err(e) = executor.shutdown() {
        warn!("Failed to stop the load tool cleanly: {}", e);
    }
    let outcome = outcome.and_then(|()| {
        drain(&mut executor, &mut results, true)?;
        executor.post_process().context("Load tool run failed")
    });

    let failure = outcome.as_ref().err().map(|e| format!("{:#}", e));
    if failure.is_some() {
        if let Some(diagnostics) = executor.get_error_diagnostics() {
            error!("Diagnostics for run {}:\n{}", run_id, diagnostics);
        }
    }

    let summary = results.finalize(&executor, failure)?;
    if let Some(total) = summary.cumulative.get(loadgen_driver::AGGREGATE_LABEL) {
        info!(
            "{} samples ({} successes, {} failures) in {}, avg {:.3}s",
            total.samples(),
            total.successes(),
            total.failures(),
            format_duration(started.elapsed()),
            total.avg_rt(),
        );
    }

    outcome
}

/// Start the tool and poll it until it exits or the operator interrupts
async fn run(executor: &mut Executor, results: &mut ResultsManager, args: &Args) -> Result<()> {
    executor.prepare().context("Failed to prepare the load tool")?;
    executor.startup().context("Failed to start the load tool")?;
    info!("Load tool running: {}", executor.args().join(" "));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(args.check_interval) => {}
            _ = &mut ctrl_c => {
                warn!("Interrupted, stopping the load tool");
                return Ok(());
            }
        }

        let finished = executor.check()?;
        drain(executor, results, false)?;
        if finished {
            info!("Load tool finished");
            return Ok(());
        }
    }
}

fn drain(executor: &mut Executor, results: &mut ResultsManager, is_final: bool) -> Result<()> {
    for point in executor.datapoints(is_final)? {
        if let Some(current) = point.current_total() {
            info!(
                "[{:.0}] {} samples, {} failures, avg {:.3}s",
                point.timestamp,
                current.samples(),
                current.failures(),
                current.avg_rt(),
            );
        }
        results.add_datapoint(&point)?;
    }
    Ok(())
}

/// Console logging with the colorized formatter, plus a plain copy in
/// `--log-file` when requested. `RUST_LOG` overrides the level.
fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = tracing_subscriber::fmt::layer()
        .event_format(ColorizedFormatter)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path {:?}", path))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();
    Ok(guard)
}
