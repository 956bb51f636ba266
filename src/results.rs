use crate::aggregator::{DataPoint, KpiSets};
use crate::executor::Executor;
use crate::scenario::{ExecutorSettings, ScenarioConfig};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Collects datapoints during a run and writes the output files
///
/// Every datapoint can be streamed as one JSON line while the run is in
/// progress; the summary is written once by [`ResultsManager::finalize`].
pub struct ResultsManager {
    output_file: PathBuf,
    run_id: String,
    streaming_file: Option<PathBuf>,
    stream: Option<BufWriter<File>>,
    datapoints: usize,
    last_timestamp: Option<f64>,
    cumulative: KpiSets,
}

impl ResultsManager {
    /// Create a new results manager
    pub fn new<P: AsRef<Path>>(output_file: P, run_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            output_file: output_file.as_ref().to_path_buf(),
            run_id: run_id.into(),
            streaming_file: None,
            stream: None,
            datapoints: 0,
            last_timestamp: None,
            cumulative: KpiSets::new(),
        })
    }

    /// Stream each datapoint to `streaming_file` as a JSON line
    pub fn enable_streaming<P: AsRef<Path>>(&mut self, streaming_file: P) -> Result<()> {
        let path = streaming_file.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Failed to create streaming file {:?}", path))?;

        self.stream = Some(BufWriter::new(file));
        debug!("Enabled streaming to: {:?}", path);
        self.streaming_file = Some(path);
        Ok(())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn datapoints(&self) -> usize {
        self.datapoints
    }

    /// Cumulative KPIs of the latest datapoint
    pub fn last_cumulative(&self) -> &KpiSets {
        &self.cumulative
    }

    pub fn add_datapoint(&mut self, point: &DataPoint) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            serde_json::to_writer(&mut *stream, point)?;
            writeln!(stream)?;
            stream.flush()?;
        }

        self.datapoints += 1;
        self.last_timestamp = Some(point.timestamp);
        self.cumulative = point.cumulative.clone();
        Ok(())
    }

    /// Write the run summary. `failure` is the error the run ended with, if any.
    pub fn finalize(&mut self, executor: &Executor, failure: Option<String>) -> Result<RunSummary> {
        info!("Finalizing results for run {}", self.run_id);

        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
        }

        let reader = executor.reader();
        let summary = RunSummary {
            metadata: RunMetadata {
                version: crate::VERSION.to_string(),
                timestamp: chrono::Utc::now(),
                run_id: self.run_id.clone(),
                os: std::env::consts::OS.to_string(),
                architecture: std::env::consts::ARCH.to_string(),
            },
            scenario: executor.scenario().clone(),
            settings: executor.settings().clone(),
            tool: executor.tool_path().map(Path::to_path_buf),
            args: executor.args().to_vec(),
            state: executor.state().to_string(),
            exit_code: executor.run_record().and_then(|r| r.exit_code),
            datapoints: self.datapoints,
            last_timestamp: self.last_timestamp,
            samples_read: reader.map_or(0, |r| r.samples_read()),
            bytes_read: reader.map_or(0, |r| r.cursor().offset()),
            lines_skipped: reader.map_or(0, |r| r.lines_skipped()),
            late_samples: reader.map_or(0, |r| r.late_samples()),
            streaming_file: self.streaming_file.clone(),
            failure,
            cumulative: self.cumulative.clone(),
        };

        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(&self.output_file, json)
            .with_context(|| format!("Failed to write {:?}", self.output_file))?;

        info!("Results written to: {:?}", self.output_file);
        Ok(summary)
    }
}

/// Final run summary
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub metadata: RunMetadata,
    pub scenario: ScenarioConfig,
    pub settings: ExecutorSettings,
    pub tool: Option<PathBuf>,
    pub args: Vec<String>,
    pub state: String,
    pub exit_code: Option<i32>,
    pub datapoints: usize,
    pub last_timestamp: Option<f64>,
    pub samples_read: u64,
    pub bytes_read: u64,
    pub lines_skipped: u64,
    pub late_samples: u64,
    pub streaming_file: Option<PathBuf>,
    pub failure: Option<String>,
    /// Cumulative KPIs per label at the end of the run
    pub cumulative: KpiSets,
}

#[derive(Debug, Serialize)]
pub struct RunMetadata {
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub run_id: String,
    pub os: String,
    pub architecture: String,
}
