//! # Utility Functions
//!
//! Small helpers shared by the executor and the binary: run identifiers,
//! reading the tail of captured output files, and human-readable durations
//! for log lines.

use anyhow::Result;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on how much of a capture file is read to find its tail
const TAIL_READ_LIMIT: u64 = 64 * 1024;

/// Generate a unique identifier for a run
///
/// Used to name artifact directories and to tag the run summary, so
/// several runs sharing an artifacts root never collide.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Last `max_lines` lines of a text file
///
/// Only the final 64 KiB of the file are inspected, which keeps diagnostics
/// cheap even when the tool has been logging for hours. Invalid UTF-8 is
/// replaced rather than rejected. Returns an empty string for an empty file.
///
/// ## Errors
///
/// Fails if the file cannot be opened or read.
pub fn tail_lines<P: AsRef<Path>>(path: P, max_lines: usize) -> Result<String> {
    let mut file = File::open(path.as_ref())?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(TAIL_READ_LIMIT);
    file.seek(SeekFrom::Start(start))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let text = String::from_utf8_lossy(&bytes);

    let mut lines: Vec<&str> = text.trim_end().lines().collect();
    if start > 0 && !lines.is_empty() {
        // First line is probably cut in half
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(max_lines);
    Ok(lines[skip..].join("\n"))
}

/// Format a duration for log output
///
/// Sub-second values are shown in milliseconds, values under a minute in
/// seconds with two decimals, and longer runs as minutes and seconds.
///
/// ```rust
/// # use loadgen_driver::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else {
            format!("{}m {}s", minutes, seconds)
        }
    }
}
