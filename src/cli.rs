use crate::scenario::{ExecutorSettings, ExitPolicy, ScenarioConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Load Generator Driver - runs an external load tool and reports KPIs while it runs
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Scenario script handed to the load tool
    #[clap(help_heading = "Scenario")]
    pub script: PathBuf,

    /// Number of concurrent workers
    #[clap(short = 'c', long, help_heading = "Scenario")]
    pub concurrency: Option<u32>,

    /// Time to reach full concurrency (e.g. "30s", "2m")
    #[clap(short = 'r', long, value_parser = parse_duration, help_heading = "Scenario")]
    pub ramp_up: Option<Duration>,

    /// Time to hold full concurrency after ramp-up
    #[clap(short = 'd', long, value_parser = parse_duration, help_heading = "Scenario")]
    pub hold_for: Option<Duration>,

    /// Maximum number of scenario runs
    #[clap(short = 'i', long, help_heading = "Scenario")]
    pub iterations: Option<u64>,

    /// Number of worker processes
    #[clap(short = 'p', long, help_heading = "Scenario")]
    pub processes: Option<u32>,

    /// Pause between requests in seconds
    #[clap(short = 't', long, help_heading = "Scenario")]
    pub think_time: Option<f64>,

    /// Tool executable: name on PATH, path, or wildcard pattern
    #[clap(long, default_value = crate::defaults::TOOL_PATH, help_heading = "Tool")]
    pub tool: String,

    /// Directory for the result file and captured tool output
    #[clap(short = 'a', long, default_value = crate::defaults::ARTIFACTS_DIR, help_heading = "Tool")]
    pub artifacts_dir: PathBuf,

    /// Working directory for the tool
    #[clap(long, help_heading = "Tool")]
    pub working_dir: Option<PathBuf>,

    /// Time the tool gets to exit after being asked to stop
    #[clap(long, value_parser = parse_duration, default_value = "5s", help_heading = "Tool")]
    pub grace_period: Duration,

    /// Exit codes treated as success
    #[clap(long, default_values_t = vec![0], num_args = 1.., help_heading = "Tool")]
    pub accept_exit_codes: Vec<i32>,

    /// Fail on any other exit code, even when results were produced
    #[clap(long, default_value_t = false, help_heading = "Tool")]
    pub strict_exit: bool,

    /// Lines of captured tool output shown on failure
    #[clap(long, default_value_t = crate::defaults::DIAGNOSTICS_LINES, help_heading = "Tool")]
    pub diagnostics_lines: usize,

    /// Size of the reporting windows
    #[clap(short = 'g', long, value_parser = parse_duration, default_value = "1s", help_heading = "Reporting")]
    pub granularity: Duration,

    /// Interval between status checks of the tool
    #[clap(long, value_parser = parse_duration, default_value = "1s", help_heading = "Reporting")]
    pub check_interval: Duration,

    /// Output file for the run summary (JSON format)
    #[clap(short = 'o', long, default_value = crate::defaults::OUTPUT_FILE, help_heading = "Reporting")]
    pub output_file: PathBuf,

    /// JSON lines file receiving every datapoint as it is produced
    #[clap(long, help_heading = "Reporting")]
    pub streaming_output: Option<PathBuf>,

    /// Also write log output to this file
    #[clap(long, help_heading = "Reporting")]
    pub log_file: Option<PathBuf>,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,

    /// Arguments passed to the tool unchanged (after `--`)
    #[clap(last = true)]
    pub extra_args: Vec<String>,
}

impl From<&Args> for ScenarioConfig {
    fn from(args: &Args) -> Self {
        Self {
            script: Some(args.script.clone()),
            concurrency: args.concurrency,
            ramp_up: args.ramp_up,
            hold_for: args.hold_for,
            iterations: args.iterations,
            processes: args.processes,
            think_time: args.think_time,
        }
    }
}

impl From<&Args> for ExecutorSettings {
    fn from(args: &Args) -> Self {
        let exit_policy = ExitPolicy {
            accepted_codes: args.accept_exit_codes.iter().copied().collect(),
            tolerate_with_results: !args.strict_exit,
        };
        Self {
            tool_path: args.tool.clone(),
            artifacts_dir: args.artifacts_dir.clone(),
            working_dir: args.working_dir.clone(),
            extra_args: args.extra_args.clone(),
            grace_period: args.grace_period,
            granularity: args.granularity,
            exit_policy,
            diagnostics_lines: args.diagnostics_lines,
        }
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h", "500ms", "1.5s")
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
        .trim()
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

    Ok(Duration::from_secs_f64(secs))
}
