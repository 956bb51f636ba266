//! # Invocation Builder
//!
//! Maps a [`ScenarioConfig`] onto the load generator's command line. The
//! mapping is a pure function of its inputs; the tool path itself is not part
//! of the returned list.
//!
//! | Scenario field     | Arguments                                     |
//! |--------------------|-----------------------------------------------|
//! | concurrency        | `--workers N`                                 |
//! | processes          | `--processes N`                               |
//! | ramp-up            | `--ramp-up S` (whole seconds, rounded up)     |
//! | ramp-up + hold-for | `--duration S` (sum of rounded-up seconds)    |
//! | iterations         | `--max-runs N`                                |
//! | think-time > 0     | `--delay X.Y`                                 |
//! | result file        | `--report PATH`                               |
//!
//! Extra operator arguments follow, and the script path always comes last.

use crate::error::{DriverError, Result};
use crate::scenario::ScenarioConfig;
use std::path::Path;
use std::time::Duration;

pub const WORKERS_FLAG: &str = "--workers";
pub const PROCESSES_FLAG: &str = "--processes";
pub const RAMP_UP_FLAG: &str = "--ramp-up";
pub const DURATION_FLAG: &str = "--duration";
pub const ITERATIONS_FLAG: &str = "--max-runs";
pub const DELAY_FLAG: &str = "--delay";
pub const REPORT_FLAG: &str = "--report";

/// Build the argument list for one run
pub fn build_args(
    scenario: &ScenarioConfig,
    report_file: &Path,
    extra_args: &[String],
) -> Result<Vec<String>> {
    let script = path_arg(scenario.script_path()?, "script")?;
    let report = path_arg(report_file, "report file")?;

    let mut args = Vec::new();

    if let Some(concurrency) = scenario.concurrency {
        args.push(WORKERS_FLAG.to_string());
        args.push(concurrency.to_string());
    }

    if let Some(processes) = scenario.processes {
        args.push(PROCESSES_FLAG.to_string());
        args.push(processes.to_string());
    }

    let ramp_up = scenario.ramp_up.map_or(0, ceil_secs);
    let hold = scenario.hold_for.map_or(0, ceil_secs);
    if ramp_up > 0 {
        args.push(RAMP_UP_FLAG.to_string());
        args.push(ramp_up.to_string());
    }
    if ramp_up + hold > 0 {
        args.push(DURATION_FLAG.to_string());
        args.push((ramp_up + hold).to_string());
    }

    if let Some(iterations) = scenario.iterations {
        args.push(ITERATIONS_FLAG.to_string());
        args.push(iterations.to_string());
    }

    if let Some(delay) = scenario.think_time.filter(|t| *t > 0.0) {
        args.push(DELAY_FLAG.to_string());
        args.push(format_delay(delay));
    }

    args.push(REPORT_FLAG.to_string());
    args.push(report);

    args.extend(extra_args.iter().cloned());
    args.push(script);

    Ok(args)
}

/// Fixed-point rendering with one decimal place, e.g. `5.0`
pub fn format_delay(seconds: f64) -> String {
    format!("{:.1}", seconds)
}

/// Whole seconds, rounding any fraction up
fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

fn path_arg(path: &Path, what: &str) -> Result<String> {
    path.to_str().map(str::to_string).ok_or_else(|| {
        DriverError::Configuration(format!("{} path {:?} is not valid UTF-8", what, path))
    })
}
