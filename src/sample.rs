//! # Raw Sample Parser
//!
//! Turns one physical line of the load generator's result file into a
//! [`RawSample`]. The line format is CSV; fields may be double-quoted:
//!
//! ```text
//! timestamp,label,outcome,elapsed[,message[,extra...]]
//! 1700000000.125,login,success,0.042
//! 1700000000.350,login,error,0.003,Connection refused
//! 1700000000.500,"GET /search?q=a,b",failure,0.310,"HTTP 502, retrying"
//! ```
//!
//! - `timestamp` is seconds since the Unix epoch, fractional allowed
//! - `label` may be empty; the empty label is reserved for the whole-run
//!   aggregate, so unlabeled samples only ever land there
//! - `outcome` is `success`, `failure` or `error` (case-insensitive, with a
//!   few aliases the tool emits in older versions)
//! - `elapsed` is the response time in seconds
//!
//! Anything after the fourth column is optional. The fifth column is the
//! error message; further columns are tool specific and ignored.

use crate::error::ParseWarning;
use csv::{ReaderBuilder, StringRecord, Trim};

/// Outcome of a single request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    /// Request failed, optionally with the tool's reason
    Failure(Option<String>),
    /// Request raised an error; the message is always present
    Error(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Message to record in the KPI error list, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Success => None,
            Outcome::Failure(msg) => msg.as_deref(),
            Outcome::Error(msg) => Some(msg),
        }
    }
}

/// One parsed row of the result file
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    pub label: String,
    pub outcome: Outcome,
    /// Response time in seconds
    pub elapsed: f64,
}

/// Parse one line (without its terminator) into a sample.
///
/// A trailing `\r` is stripped so files written with CRLF endings parse the
/// same as LF ones.
pub fn parse_line(line: &str) -> Result<RawSample, ParseWarning> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return Err(ParseWarning::Blank);
    }

    let columns = split_record(line)?;
    if columns[0].eq_ignore_ascii_case("timestamp") {
        return Err(ParseWarning::Header);
    }
    if columns.len() < 4 {
        return Err(ParseWarning::TooFewColumns(columns.len()));
    }

    let raw_ts = &columns[0];
    let timestamp: f64 = raw_ts
        .parse()
        .map_err(|_| ParseWarning::InvalidTimestamp(raw_ts.to_string()))?;
    if !timestamp.is_finite() || timestamp < 0.0 {
        return Err(ParseWarning::InvalidTimestamp(raw_ts.to_string()));
    }

    let raw_elapsed = &columns[3];
    let elapsed: f64 = raw_elapsed
        .parse()
        .map_err(|_| ParseWarning::InvalidElapsed(raw_elapsed.to_string()))?;
    if !elapsed.is_finite() || elapsed < 0.0 {
        return Err(ParseWarning::InvalidElapsed(raw_elapsed.to_string()));
    }

    let message = columns
        .get(4)
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    let outcome = match columns[2].to_ascii_lowercase().as_str() {
        "success" | "ok" | "true" => Outcome::Success,
        "failure" | "fail" | "false" => Outcome::Failure(message),
        "error" => Outcome::Error(message.ok_or(ParseWarning::MissingErrorMessage)?),
        other => return Err(ParseWarning::UnknownOutcome(other.to_string())),
    };

    Ok(RawSample {
        timestamp,
        label: columns[1].to_string(),
        outcome,
        elapsed,
    })
}

/// Split one line into trimmed fields, honouring RFC 4180 quoting so a
/// quoted label or message may contain commas
fn split_record(line: &str) -> Result<StringRecord, ParseWarning> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .buffer_capacity(line.len().max(64))
        .from_reader(line.as_bytes());

    let mut record = StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Ok(record),
        Ok(false) => Err(ParseWarning::Blank),
        Err(e) => Err(ParseWarning::Malformed(e.to_string())),
    }
}
