//! # Scenario and Executor Configuration
//!
//! [`ScenarioConfig`] describes the load test itself; [`ExecutorSettings`]
//! describes how the external tool is found, where its artifacts go and how
//! its exit status is judged. Both are built once, validated, and treated as
//! read-only by the executor.

use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The load test to run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Script handed to the load generator
    pub script: Option<PathBuf>,
    /// Number of concurrent virtual users
    pub concurrency: Option<u32>,
    pub ramp_up: Option<Duration>,
    pub hold_for: Option<Duration>,
    /// Maximum number of scenario iterations
    pub iterations: Option<u64>,
    /// Number of tool worker processes
    pub processes: Option<u32>,
    /// Delay between iterations, in seconds. `Some(0.0)` and `None` both
    /// mean no delay.
    pub think_time: Option<f64>,
}

impl ScenarioConfig {
    /// Scenario running `script` with every other field left to the tool's
    /// defaults
    pub fn new<P: Into<PathBuf>>(script: P) -> Self {
        Self {
            script: Some(script.into()),
            ..Default::default()
        }
    }

    /// The script path, or a configuration error if none is set
    pub fn script_path(&self) -> Result<&Path> {
        match self.script.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => Err(DriverError::Configuration(
                "scenario has no script path".to_string(),
            )),
        }
    }

    /// Check field values that the type system cannot express
    pub fn validate(&self) -> Result<()> {
        self.script_path()?;
        if let Some(think_time) = self.think_time {
            if !think_time.is_finite() || think_time < 0.0 {
                return Err(DriverError::Configuration(format!(
                    "think-time must be a non-negative number of seconds, got {}",
                    think_time
                )));
            }
        }
        if self.processes == Some(0) {
            return Err(DriverError::Configuration(
                "processes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decides whether a finished tool run counts as a success
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitPolicy {
    /// Exit codes that always count as success
    pub accepted_codes: BTreeSet<i32>,
    /// Accept any other exit code as long as the tool produced results
    pub tolerate_with_results: bool,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self {
            accepted_codes: BTreeSet::from([0]),
            tolerate_with_results: true,
        }
    }
}

impl ExitPolicy {
    /// Only the listed codes are accepted, regardless of results
    pub fn strict<I: IntoIterator<Item = i32>>(codes: I) -> Self {
        Self {
            accepted_codes: codes.into_iter().collect(),
            tolerate_with_results: false,
        }
    }

    /// `exit_code` is `None` when the process was killed by a signal
    pub fn accepts(&self, exit_code: Option<i32>, result_usable: bool) -> bool {
        match exit_code {
            Some(code) if self.accepted_codes.contains(&code) => true,
            _ => self.tolerate_with_results && result_usable,
        }
    }
}

/// How the executor finds, runs and judges the external tool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Executable name, path, or wildcard pattern
    pub tool_path: String,
    /// Directory receiving the result file and captured output
    pub artifacts_dir: PathBuf,
    /// Working directory for the child; inherited when unset
    pub working_dir: Option<PathBuf>,
    /// Extra arguments appended verbatim after the generated ones
    pub extra_args: Vec<String>,
    /// Time between the graceful and the forceful termination signal
    pub grace_period: Duration,
    /// Size of the reporting windows
    pub granularity: Duration,
    pub exit_policy: ExitPolicy,
    /// Lines of captured stdout/stderr included in diagnostics
    pub diagnostics_lines: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            tool_path: crate::defaults::TOOL_PATH.to_string(),
            artifacts_dir: PathBuf::from(crate::defaults::ARTIFACTS_DIR),
            working_dir: None,
            extra_args: Vec::new(),
            grace_period: crate::defaults::GRACE_PERIOD,
            granularity: crate::defaults::GRANULARITY,
            exit_policy: ExitPolicy::default(),
            diagnostics_lines: crate::defaults::DIAGNOSTICS_LINES,
        }
    }
}

impl ExecutorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.tool_path.trim().is_empty() {
            return Err(DriverError::Configuration(
                "tool path must not be empty".to_string(),
            ));
        }
        if self.granularity.is_zero() {
            return Err(DriverError::Configuration(
                "window granularity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Artifact file stem for the configured tool path. The executor
    /// recomputes it from the effective path once an environment override
    /// is known.
    pub fn tool_name(&self) -> String {
        tool_name_for(&self.tool_path)
    }
}

/// File stem used for artifacts: the tool's file name without wildcards
/// or extension
pub fn tool_name_for(tool_path: &str) -> String {
    Path::new(tool_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.replace(['*', '?'], ""))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "tool".to_string())
}
