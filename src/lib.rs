//! # Load Generator Driver Library
//!
//! Runs an external load-generation tool as a child process, tails the CSV
//! result file it writes while it runs, and turns the stream of raw samples
//! into time-bucketed KPI datapoints.
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `executor`: Lifecycle state machine driving one run of the tool
//! - `invocation`: Maps a scenario onto the tool's command line
//! - `reader`: Incremental reader for a result file that is still growing
//! - `sample`: Parser for one line of the result file
//! - `aggregator`: Groups samples into windows with current and cumulative KPIs
//! - `metrics`: KPI accumulation using HDR histograms
//! - `results`: JSON output of datapoints and the run summary
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use loadgen_driver::{Executor, ExecutorSettings, ScenarioConfig};
//! use std::time::Duration;
//!
//! fn main() -> loadgen_driver::Result<()> {
//!     let mut scenario = ScenarioConfig::new("loadtest.py");
//!     scenario.concurrency = Some(10);
//!     scenario.hold_for = Some(Duration::from_secs(60));
//!
//!     let mut executor = Executor::new(scenario, ExecutorSettings::default());
//!     executor.prepare()?;
//!     executor.startup()?;
//!     while !executor.check()? {
//!         for point in executor.datapoints(false)? {
//!             println!("{} {:?}", point.timestamp, point.current_total());
//!         }
//!         std::thread::sleep(Duration::from_secs(1));
//!     }
//!     executor.shutdown()?;
//!     let last = executor.datapoints(true)?.last();
//!     println!("{:?}", last.and_then(|p| p.cumulative_total().cloned()));
//!     executor.post_process()
//! }
//! ```
//!
//! ## Threading
//!
//! Nothing in the library spawns threads or blocks on the child process.
//! Every operation returns promptly except `Executor::shutdown`, which waits
//! at most the configured grace period. An executor is driven from one task.

/// Window aggregation of raw samples into datapoints
pub mod aggregator;

/// Command-line interface and configuration
///
/// Parses arguments with clap and converts them into the scenario and
/// executor settings used by the library.
pub mod cli;

/// Error types shared across the crate
pub mod error;

/// Tool lifecycle state machine
///
/// Contains the `Executor`, which locates the tool, starts it, polls it,
/// stops it and judges its exit status against the configured policy.
pub mod executor;

/// Command line construction for the tool
pub mod invocation;

/// Colorized console formatter for tracing events
pub mod logging;

/// KPI accumulation
///
/// `KpiSet` counts samples, successes, failures and error messages and keeps
/// an HDR histogram of response times for percentile queries.
pub mod metrics;

/// Child process ownership and termination
pub mod process;

/// Incremental result file reader
///
/// Tracks a byte offset into a file that the tool keeps appending to and
/// never hands out a partially written line.
pub mod reader;

/// Result output
///
/// Streams datapoints as JSON lines and writes a final JSON summary.
pub mod results;

/// Result line parsing
pub mod sample;

/// Scenario and executor configuration
pub mod scenario;

/// Tool lookup on disk and on `PATH`
pub mod tool;

pub mod utils;

// Re-export key types for convenient library usage

pub use aggregator::{BucketedAggregator, DataPoint, AGGREGATE_LABEL};
pub use error::{DriverError, ParseWarning, Result};
pub use executor::{Diagnostics, Executor, ExecutorState};
pub use metrics::KpiSet;
pub use reader::ReportReader;
pub use results::ResultsManager;
pub use sample::{Outcome, RawSample};
pub use scenario::{ExecutorSettings, ExitPolicy, ScenarioConfig};

/// The current version of the driver
///
/// Populated from Cargo.toml and recorded in the run summary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Tool looked up on `PATH` when none is configured
    pub const TOOL_PATH: &str = "molotov";

    /// Directory receiving the result file and captured output
    pub const ARTIFACTS_DIR: &str = "loadgen-artifacts";

    /// Time the tool gets to exit after the graceful termination signal
    pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

    /// Size of the reporting windows
    ///
    /// One second matches the timestamp resolution most load generators
    /// report with.
    pub const GRANULARITY: Duration = Duration::from_secs(1);

    /// Lines of captured stdout/stderr shown when the tool fails
    pub const DIAGNOSTICS_LINES: usize = 20;

    /// Default summary file name
    pub const OUTPUT_FILE: &str = "loadgen_results.json";
}
