//! # Executor
//!
//! Drives one run of the external load generator through an explicit state
//! machine:
//!
//! ```text
//!   Idle --prepare()--> Prepared --startup()--> Running --check()/shutdown()--> Finished
//!     \                    \                       \
//!      `----------------------------------------------> Failed (from any state)
//! ```
//!
//! Nothing here blocks on the child: `startup()` returns right after the
//! spawn and `check()` is a single non-blocking poll, so the caller's loop
//! decides the pace. The only wait is inside `shutdown()`, bounded by the
//! configured grace period.
//!
//! The executor owns the [`ReportReader`] for the run; callers pull
//! aggregated windows through [`Executor::datapoints`].

use crate::error::{DriverError, Result};
use crate::invocation::build_args;
use crate::process::{ProcessHandle, SpawnRequest, Termination};
use crate::reader::{DataPoints, ReportReader};
use crate::sample::parse_line;
use crate::scenario::{tool_name_for, ExecutorSettings, ScenarioConfig};
use crate::tool::{effective_tool_path, resolve_tool};
use crate::utils::tail_lines;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Lifecycle state of an [`Executor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Prepared,
    Running,
    Finished,
    Failed,
}

impl ExecutorState {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutorState::Idle => "idle",
            ExecutorState::Prepared => "prepared",
            ExecutorState::Running => "running",
            ExecutorState::Finished => "finished",
            ExecutorState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutorState::Finished | ExecutorState::Failed)
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What happened to the child process, kept after its handle is released
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// The process was stopped by `shutdown()` rather than exiting on its own
    pub terminated: bool,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

/// Operator-facing information about a finished or failed run
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub tool: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub failure: Option<String>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub skipped_lines: u64,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.exit_code, self.signal) {
            (Some(code), _) => writeln!(f, "{} exit code: {}", self.tool, code)?,
            (None, Some(signal)) => writeln!(f, "{} terminated by signal {}", self.tool, signal)?,
            (None, None) => writeln!(f, "{} exit code: none", self.tool)?,
        }
        if let Some(failure) = &self.failure {
            writeln!(f, "failure: {}", failure)?;
        }
        if self.skipped_lines > 0 {
            writeln!(f, "skipped result lines: {}", self.skipped_lines)?;
        }
        if !self.stdout_tail.is_empty() {
            writeln!(f, "{} STDOUT:\n{}", self.tool, self.stdout_tail)?;
        }
        if !self.stderr_tail.is_empty() {
            writeln!(f, "{} STDERR:\n{}", self.tool, self.stderr_tail)?;
        }
        Ok(())
    }
}

/// Runs the external tool for one scenario
#[derive(Debug)]
pub struct Executor {
    scenario: ScenarioConfig,
    settings: ExecutorSettings,
    state: ExecutorState,
    tool_name: String,
    tool: Option<PathBuf>,
    report_file: PathBuf,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    args: Vec<String>,
    reader: Option<ReportReader>,
    process: Option<ProcessHandle>,
    run: Option<RunRecord>,
    failure: Option<String>,
}

impl Executor {
    pub fn new(scenario: ScenarioConfig, settings: ExecutorSettings) -> Self {
        let mut executor = Self {
            tool_name: String::new(),
            report_file: PathBuf::new(),
            stdout_path: PathBuf::new(),
            stderr_path: PathBuf::new(),
            scenario,
            settings,
            state: ExecutorState::Idle,
            tool: None,
            args: Vec::new(),
            reader: None,
            process: None,
            run: None,
            failure: None,
        };
        executor.name_artifacts(executor.settings.tool_name());
        executor
    }

    fn name_artifacts(&mut self, tool_name: String) {
        let dir = &self.settings.artifacts_dir;
        self.report_file = dir.join(format!("{}-report.csv", tool_name));
        self.stdout_path = dir.join(format!("{}.out", tool_name));
        self.stderr_path = dir.join(format!("{}.err", tool_name));
        self.tool_name = tool_name;
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn scenario(&self) -> &ScenarioConfig {
        &self.scenario
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Resolved executable, available once prepared
    pub fn tool_path(&self) -> Option<&Path> {
        self.tool.as_deref()
    }

    /// Result file path. Named after the configured tool until `prepare()`
    /// applies the tool path override from the environment.
    pub fn report_file(&self) -> &Path {
        &self.report_file
    }

    /// Arguments passed to the tool, empty before `startup()`
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn reader(&self) -> Option<&ReportReader> {
        self.reader.as_ref()
    }

    pub fn run_record(&self) -> Option<&RunRecord> {
        self.run.as_ref()
    }

    /// Files the run depends on, for callers that ship them elsewhere
    pub fn resource_files(&self) -> Vec<PathBuf> {
        self.scenario.script.iter().cloned().collect()
    }

    /// Validate configuration, locate the tool and set up the result reader.
    ///
    /// Calling it again once prepared does nothing.
    pub fn prepare(&mut self) -> Result<()> {
        match self.state {
            ExecutorState::Idle => {}
            ExecutorState::Prepared => {
                debug!("Executor already prepared");
                return Ok(());
            }
            state => return Err(invalid("prepare", state)),
        }

        match self.try_prepare() {
            Ok(()) => {
                self.state = ExecutorState::Prepared;
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    fn try_prepare(&mut self) -> Result<()> {
        self.settings.validate()?;
        self.scenario.validate()?;

        let script = self.scenario.script_path()?;
        let script_on_disk = match &self.settings.working_dir {
            Some(dir) if script.is_relative() => dir.join(script),
            _ => script.to_path_buf(),
        };
        if !script_on_disk.exists() {
            return Err(DriverError::Configuration(format!(
                "scenario script {:?} does not exist",
                script_on_disk
            )));
        }

        let pattern = effective_tool_path(&self.settings.tool_path)?;
        self.name_artifacts(tool_name_for(&pattern));
        let tool = resolve_tool(&pattern)?;
        info!("Using {} at {}", self.tool_name, tool.display());

        std::fs::create_dir_all(&self.settings.artifacts_dir)?;
        self.reader = Some(ReportReader::new(
            &self.report_file,
            self.settings.granularity,
        ));
        self.tool = Some(tool);
        Ok(())
    }

    /// Build the command line and start the tool. Returns as soon as the
    /// process is spawned.
    pub fn startup(&mut self) -> Result<()> {
        if self.state != ExecutorState::Prepared {
            return Err(invalid("start", self.state));
        }

        match self.try_startup() {
            Ok(()) => {
                self.state = ExecutorState::Running;
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    fn try_startup(&mut self) -> Result<()> {
        let tool = self
            .tool
            .clone()
            .ok_or_else(|| invalid("start", self.state))?;
        self.args = build_args(
            &self.scenario,
            &self.report_file,
            &self.settings.extra_args,
        )?;

        File::create(&self.report_file)?;

        let handle = ProcessHandle::spawn(&SpawnRequest {
            program: &tool,
            args: &self.args,
            working_dir: self.settings.working_dir.as_deref(),
            stdout_path: &self.stdout_path,
            stderr_path: &self.stderr_path,
        })?;

        self.run = Some(RunRecord {
            pid: handle.pid(),
            started_at: handle.started_at(),
            finished_at: None,
            exit_code: None,
            signal: None,
            terminated: false,
            stdout_path: handle.stdout_path().to_path_buf(),
            stderr_path: handle.stderr_path().to_path_buf(),
        });
        self.process = Some(handle);
        Ok(())
    }

    /// Non-blocking poll. Returns `true` once the tool has exited or the run
    /// has failed, and keeps returning `true` afterwards.
    pub fn check(&mut self) -> Result<bool> {
        match self.state {
            ExecutorState::Running => {}
            ExecutorState::Finished | ExecutorState::Failed => return Ok(true),
            state => return Err(invalid("check", state)),
        }

        let Some(handle) = self.process.as_mut() else {
            self.fail("running without a process handle".to_string());
            return Ok(true);
        };

        match handle.poll() {
            Ok(None) => Ok(false),
            Ok(Some(status)) => {
                info!("{} exited with {}", self.tool_name, status);
                let (exit_code, signal) = (handle.exit_code(), handle.signal());
                if let Some(run) = self.run.as_mut() {
                    run.exit_code = exit_code;
                    run.signal = signal;
                    run.finished_at = Some(Utc::now());
                }
                self.state = ExecutorState::Finished;
                Ok(true)
            }
            Err(e) => {
                self.fail(format!("lost track of {}: {}", self.tool_name, e));
                Ok(true)
            }
        }
    }

    /// Stop the tool if it is still running and release the process handle.
    ///
    /// Safe to call in any state and more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(mut handle) = self.process.take() else {
            if self.state != ExecutorState::Failed {
                self.state = ExecutorState::Finished;
            }
            return Ok(());
        };

        let outcome = handle.terminate(self.settings.grace_period);
        if let Some(run) = self.run.as_mut() {
            run.exit_code = handle.exit_code();
            run.signal = handle.signal();
            if run.finished_at.is_none() {
                run.finished_at = Some(Utc::now());
            }
            if let Ok(Termination::Graceful | Termination::Forced) = outcome {
                run.terminated = true;
            }
        }

        match outcome {
            Ok(termination) => {
                debug!("{} shut down: {:?}", self.tool_name, termination);
                if self.state != ExecutorState::Failed {
                    self.state = ExecutorState::Finished;
                }
                Ok(())
            }
            Err(e) => {
                self.fail(format!("failed to stop {}: {}", self.tool_name, e));
                Err(e.into())
            }
        }
    }

    /// Close the result file and judge the run against the exit policy.
    pub fn post_process(&mut self) -> Result<()> {
        if !self.state.is_terminal() {
            return Err(invalid("post-process", self.state));
        }

        if let Some(reader) = self.reader.as_mut() {
            reader.close();
            info!(
                "Read {} samples from {:?} ({} lines skipped)",
                reader.samples_read(),
                reader.path(),
                reader.lines_skipped()
            );
        }

        let Some(run) = self.run.clone() else {
            return Ok(());
        };
        if run.terminated {
            debug!("{} was stopped by shutdown, not judging exit code", self.tool_name);
            return Ok(());
        }

        let usable = self.result_usable();
        let policy = &self.settings.exit_policy;
        if policy.accepts(run.exit_code, usable) {
            let clean = run
                .exit_code
                .map_or(false, |code| policy.accepted_codes.contains(&code));
            if !clean {
                warn!(
                    "{} exited with {:?} but produced results, accepting the run",
                    self.tool_name, run.exit_code
                );
            }
            return Ok(());
        }

        let diagnostics = self
            .get_error_diagnostics()
            .map(|d| d.to_string())
            .unwrap_or_default();
        let err = DriverError::Tool {
            tool: self.tool_name.clone(),
            exit_code: run.exit_code,
            diagnostics: diagnostics.trim_end().to_string(),
        };
        self.fail(format!(
            "{} exited with {:?} and no usable results",
            self.tool_name, run.exit_code
        ));
        Err(err)
    }

    /// Captured output and exit status, once the run has finished or failed
    pub fn get_error_diagnostics(&self) -> Option<Diagnostics> {
        if !self.state.is_terminal() {
            return None;
        }

        let lines = self.settings.diagnostics_lines;
        let tail = |path: &Path| match tail_lines(path, lines) {
            Ok(text) => text,
            Err(e) => {
                debug!("No captured output at {:?}: {}", path, e);
                String::new()
            }
        };

        let mut diagnostics = Diagnostics {
            tool: self.tool_name.clone(),
            failure: self.failure.clone(),
            skipped_lines: self.reader.as_ref().map_or(0, |r| r.lines_skipped()),
            ..Default::default()
        };
        if let Some(run) = &self.run {
            diagnostics.exit_code = run.exit_code;
            diagnostics.signal = run.signal;
            diagnostics.stdout_tail = tail(&run.stdout_path);
            diagnostics.stderr_tail = tail(&run.stderr_path);
        }
        Some(diagnostics)
    }

    /// Windows completed since the previous call; see
    /// [`ReportReader::datapoints`]
    pub fn datapoints(&mut self, is_final: bool) -> Result<DataPoints<'_>> {
        let state = self.state;
        match self.reader.as_mut() {
            Some(reader) => reader.datapoints(is_final),
            None => Err(invalid("read datapoints", state)),
        }
    }

    /// The result file holds at least one parsable sample
    fn result_usable(&self) -> bool {
        if self.reader.as_ref().map_or(false, |r| r.samples_read() > 0) {
            return true;
        }
        match File::open(&self.report_file) {
            Ok(file) => BufReader::new(file)
                .lines()
                .map_while(|line| line.ok())
                .any(|line| parse_line(&line).is_ok()),
            Err(_) => false,
        }
    }

    fn fail(&mut self, message: String) {
        error!("{}", message);
        self.failure = Some(message);
        self.state = ExecutorState::Failed;
    }
}

fn invalid(operation: &'static str, state: ExecutorState) -> DriverError {
    DriverError::InvalidState {
        operation,
        state: state.name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor_in(dir: &TempDir, tool_path: String) -> Executor {
        let script = dir.path().join("loadtest.py");
        std::fs::write(&script, "# scenario").unwrap();
        let settings = ExecutorSettings {
            tool_path,
            artifacts_dir: dir.path().join("artifacts"),
            ..Default::default()
        };
        Executor::new(ScenarioConfig::new(script), settings)
    }

    #[test]
    fn test_artifact_paths_follow_tool_name() {
        let dir = TempDir::new().unwrap();
        let executor = executor_in(&dir, "/usr/bin/molotov".to_string());
        assert!(executor.report_file().ends_with("artifacts/molotov-report.csv"));
        assert_eq!(executor.state(), ExecutorState::Idle);
        assert!(executor.args().is_empty());
    }

    #[test]
    fn test_unmatched_pattern_fails_prepare() {
        let dir = TempDir::new().unwrap();
        let mut executor = executor_in(&dir, format!("{}/bin/*", dir.path().display()));

        let err = executor.prepare().unwrap_err();
        assert!(matches!(err, DriverError::ToolNotFound { .. }));
        assert_eq!(executor.state(), ExecutorState::Failed);

        assert!(matches!(
            executor.startup(),
            Err(DriverError::InvalidState { .. })
        ));
        assert_ne!(executor.state(), ExecutorState::Running);

        let diagnostics = executor.get_error_diagnostics().unwrap();
        assert!(diagnostics.failure.unwrap().contains("nothing matched"));
    }

    #[test]
    fn test_check_before_startup_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut executor = executor_in(&dir, "molotov".to_string());
        assert!(matches!(
            executor.check(),
            Err(DriverError::InvalidState {
                operation: "check",
                state: "idle"
            })
        ));
        assert!(executor.get_error_diagnostics().is_none());
        assert!(executor.datapoints(false).is_err());
    }

    #[test]
    fn test_missing_script_fails_prepare() {
        let dir = TempDir::new().unwrap();
        let settings = ExecutorSettings {
            artifacts_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut executor = Executor::new(
            ScenarioConfig::new(dir.path().join("missing.py")),
            settings,
        );
        assert!(matches!(
            executor.prepare(),
            Err(DriverError::Configuration(_))
        ));
    }

    #[test]
    fn test_shutdown_without_run_finishes() {
        let dir = TempDir::new().unwrap();
        let mut executor = executor_in(&dir, "molotov".to_string());
        executor.shutdown().unwrap();
        assert_eq!(executor.state(), ExecutorState::Finished);
        executor.shutdown().unwrap();
        executor.post_process().unwrap();
        assert!(executor.get_error_diagnostics().is_some());
    }

    #[test]
    fn test_resource_files() {
        let dir = TempDir::new().unwrap();
        let executor = executor_in(&dir, "molotov".to_string());
        assert_eq!(
            executor.resource_files(),
            vec![dir.path().join("loadtest.py")]
        );
    }

    #[test]
    fn test_diagnostics_display() {
        let diagnostics = Diagnostics {
            tool: "molotov".to_string(),
            exit_code: Some(2),
            signal: None,
            failure: None,
            stdout_tail: "starting".to_string(),
            stderr_tail: "Traceback".to_string(),
            skipped_lines: 1,
        };
        let text = diagnostics.to_string();
        assert!(text.contains("molotov exit code: 2"));
        assert!(text.contains("skipped result lines: 1"));
        assert!(text.contains("molotov STDOUT:\nstarting"));
        assert!(text.contains("molotov STDERR:\nTraceback"));
    }
}
