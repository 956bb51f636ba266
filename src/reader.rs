//! # Report Reader
//!
//! Tails the load generator's result file while the tool is still writing
//! it. The reader keeps a [`ReadCursor`]: the file offset up to which bytes
//! have been pulled in, plus a buffer holding bytes that have been read but
//! not yet turned into samples (at most one partial line between polls).
//!
//! Each call to [`ReportReader::datapoints`] returns an iterator over
//! whatever was appended since the previous call. The file is read in
//! chunks of [`READ_CHUNK`] bytes as the iterator needs more lines; each
//! complete line is parsed and fed to the [`BucketedAggregator`], and every
//! window is yielded as it closes. Lines that are not consumed because the iterator was
//! dropped early stay in the buffer for the next call, so nothing is lost or
//! yielded twice.
//!
//! On the final pass a trailing fragment without a line terminator is parsed
//! as a complete line, and the still-open window is flushed.

use crate::aggregator::{BucketedAggregator, DataPoint};
use crate::error::Result;
use crate::sample::parse_line;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Upper bound on bytes pulled from the file per read
pub const READ_CHUNK: usize = 64 * 1024;

/// Position in the result file plus bytes not yet parsed
#[derive(Debug, Default)]
pub struct ReadCursor {
    offset: u64,
    buf: Vec<u8>,
    pos: usize,
}

impl ReadCursor {
    /// File offset up to which bytes have been read
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes read but not yet parsed
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.buf.clear();
        self.pos = 0;
    }

    /// Next complete line, or on the final pass the trailing fragment.
    fn next_line(&mut self, is_final: bool) -> Option<&[u8]> {
        let rest = &self.buf[self.pos..];
        if rest.is_empty() {
            return None;
        }
        let start = self.pos;
        match rest.iter().position(|&b| b == b'\n') {
            Some(newline) => {
                self.pos += newline + 1;
                Some(&self.buf[start..start + newline])
            }
            None if is_final => {
                self.pos = self.buf.len();
                Some(&self.buf[start..])
            }
            None => None,
        }
    }
}

/// Incremental reader for the tool's result file
#[derive(Debug)]
pub struct ReportReader {
    path: PathBuf,
    file: Option<File>,
    cursor: ReadCursor,
    aggregator: BucketedAggregator,
    samples_read: u64,
    lines_skipped: u64,
}

impl ReportReader {
    /// Create a reader for `path` with the given window size. The file does
    /// not need to exist yet.
    pub fn new<P: AsRef<Path>>(path: P, granularity: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            cursor: ReadCursor::default(),
            aggregator: BucketedAggregator::new(granularity),
            samples_read: 0,
            lines_skipped: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> &ReadCursor {
        &self.cursor
    }

    /// Number of lines parsed into samples so far
    pub fn samples_read(&self) -> u64 {
        self.samples_read
    }

    /// Number of non-blank, non-header lines that failed to parse
    pub fn lines_skipped(&self) -> u64 {
        self.lines_skipped
    }

    /// Samples that arrived after their window had already been emitted
    pub fn late_samples(&self) -> u64 {
        self.aggregator.late_samples()
    }

    /// Iterate over the windows completed by bytes appended since the last
    /// call.
    ///
    /// The first chunk is read here so open and seek failures surface as an
    /// error; later chunks are read by the iterator. With `is_final` set, a
    /// trailing line without a terminator is parsed and the open window is
    /// flushed once the end of the file is reached.
    pub fn datapoints(&mut self, is_final: bool) -> Result<DataPoints<'_>> {
        self.cursor.compact();
        self.open()?;
        let at_eof = self.read_chunk()? == 0;
        Ok(DataPoints {
            reader: self,
            is_final,
            at_eof,
            flushed: false,
        })
    }

    /// Release the file handle. A later call to [`Self::datapoints`] reopens
    /// the file and continues from the saved offset.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed result file {:?}", self.path);
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.file.is_none() {
            match File::open(&self.path) {
                Ok(file) => {
                    debug!("Opened result file {:?}", self.path);
                    self.file = Some(file);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    trace!("Result file {:?} does not exist yet", self.path);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        let len = file.metadata()?.len();
        if len < self.cursor.offset {
            warn!(
                "Result file {:?} shrank from {} to {} bytes, reading it from the start",
                self.path, self.cursor.offset, len
            );
            self.cursor.reset();
        }
        file.seek(SeekFrom::Start(self.cursor.offset))?;
        Ok(())
    }

    /// Append at most [`READ_CHUNK`] bytes to the cursor. Returns 0 at the
    /// end of the file or when the file does not exist.
    fn read_chunk(&mut self) -> Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        self.cursor.compact();
        let read = file
            .by_ref()
            .take(READ_CHUNK as u64)
            .read_to_end(&mut self.cursor.buf)?;
        self.cursor.offset += read as u64;
        if read > 0 {
            trace!("Read {} bytes from {:?}", read, self.path);
        }
        Ok(read)
    }
}

/// Lazy sequence of windows produced by one [`ReportReader::datapoints`] call
pub struct DataPoints<'a> {
    reader: &'a mut ReportReader,
    is_final: bool,
    at_eof: bool,
    flushed: bool,
}

impl Iterator for DataPoints<'_> {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        let reader = &mut *self.reader;
        loop {
            // A fragment is only a whole line once nothing follows it
            while let Some(line) = reader.cursor.next_line(self.is_final && self.at_eof) {
                let line = String::from_utf8_lossy(line);
                match parse_line(&line) {
                    Ok(sample) => {
                        reader.samples_read += 1;
                        if let Some(point) = reader.aggregator.add(&sample) {
                            return Some(point);
                        }
                    }
                    Err(warning) if warning.is_noise() => {}
                    Err(warning) => {
                        reader.lines_skipped += 1;
                        debug!("Skipping result line {:?}: {}", line, warning);
                    }
                }
            }
            if self.at_eof {
                break;
            }
            match reader.read_chunk() {
                Ok(0) => self.at_eof = true,
                Ok(_) => {}
                Err(e) => {
                    // Unread bytes stay in the file for the next call
                    warn!("Failed to read result file {:?}: {}", reader.path, e);
                    self.at_eof = true;
                    self.is_final = false;
                }
            }
        }

        if self.is_final && !self.flushed {
            self.flushed = true;
            return reader.aggregator.flush();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_missing_file_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let mut reader = ReportReader::new(dir.path().join("absent.csv"), Duration::from_secs(1));
        assert_eq!(reader.datapoints(false).unwrap().count(), 0);
        assert_eq!(reader.datapoints(true).unwrap().count(), 0);
    }

    #[test]
    fn test_partial_line_is_reassembled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        let mut reader = ReportReader::new(&path, Duration::from_secs(1));

        append(&path, "timestamp,label,outcome,elapsed\n1700000000.1,a,succ");
        assert_eq!(reader.datapoints(false).unwrap().count(), 0);
        assert_eq!(reader.cursor().pending(), b"1700000000.1,a,succ");
        assert_eq!(reader.samples_read(), 0);

        append(&path, "ess,0.1\n1700000001.0,a,success,0.2\n");
        let points: Vec<_> = reader.datapoints(false).unwrap().collect();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp, 1700000000.0);
        assert_eq!(reader.samples_read(), 2);
        assert_eq!(reader.lines_skipped(), 0);

        let points: Vec<_> = reader.datapoints(true).unwrap().collect();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp, 1700000001.0);
    }

    #[test]
    fn test_final_pass_parses_unterminated_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        append(&path, "1700000000.0,a,success,0.1\n1700000000.5,a,failure,0.1");

        let mut reader = ReportReader::new(&path, Duration::from_secs(1));
        let points: Vec<_> = reader.datapoints(true).unwrap().collect();
        assert_eq!(points.len(), 1);
        let total = points[0].cumulative_total().unwrap();
        assert_eq!(total.successes(), 1);
        assert_eq!(total.failures(), 1);
        assert!(reader.cursor().pending().is_empty());
    }

    #[test]
    fn test_no_new_bytes_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        append(&path, "1700000000.0,a,success,0.1\n1700000001.0,a,success,0.1\n");

        let mut reader = ReportReader::new(&path, Duration::from_secs(1));
        assert_eq!(reader.datapoints(true).unwrap().count(), 2);
        assert_eq!(reader.datapoints(true).unwrap().count(), 0);
        assert_eq!(reader.datapoints(false).unwrap().count(), 0);
    }

    #[test]
    fn test_dropped_iterator_keeps_remaining_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        append(
            &path,
            "1700000000.0,a,success,0.1\n1700000001.0,a,success,0.1\n1700000002.0,a,success,0.1\n",
        );

        let mut reader = ReportReader::new(&path, Duration::from_secs(1));
        let first = reader.datapoints(false).unwrap().next().unwrap();
        assert_eq!(first.timestamp, 1700000000.0);

        let rest: Vec<_> = reader.datapoints(true).unwrap().collect();
        let stamps: Vec<f64> = rest.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![1700000001.0, 1700000002.0]);
        assert_eq!(rest[1].cumulative_total().unwrap().samples(), 3);
    }

    #[test]
    fn test_malformed_lines_are_counted_and_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        append(
            &path,
            "timestamp,label,outcome,elapsed\n\
             Traceback (most recent call last):\n\
             1700000000.0,a,success,0.1\n\
             1700000000.2,a,bogus,0.1\n\
             \n",
        );

        let mut reader = ReportReader::new(&path, Duration::from_secs(1));
        let points: Vec<_> = reader.datapoints(true).unwrap().collect();
        assert_eq!(points.len(), 1);
        assert_eq!(reader.samples_read(), 1);
        assert_eq!(reader.lines_skipped(), 2);
    }

    #[test]
    fn test_close_and_reopen_continues_from_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        append(&path, "1700000000.0,a,success,0.1\n");

        let mut reader = ReportReader::new(&path, Duration::from_secs(1));
        assert_eq!(reader.datapoints(false).unwrap().count(), 0);
        reader.close();

        append(&path, "1700000001.0,a,success,0.1\n");
        let points: Vec<_> = reader.datapoints(true).unwrap().collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].cumulative_total().unwrap().samples(), 2);
    }

    #[test]
    fn test_truncated_file_is_read_from_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        append(&path, "1700000000.0,a,success,0.1\n1700000000.5,a,success,0.1\n");

        let mut reader = ReportReader::new(&path, Duration::from_secs(1));
        assert_eq!(reader.datapoints(false).unwrap().count(), 0);

        std::fs::write(&path, "1700000003.0,b,success,0.1\n").unwrap();
        let points: Vec<_> = reader.datapoints(true).unwrap().collect();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].timestamp, 1700000003.0);
        assert_eq!(reader.samples_read(), 3);
    }

    #[test]
    fn test_large_file_is_read_in_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.csv");
        let mut body = String::new();
        for second in 0..10 {
            for ms in 0..1000 {
                body.push_str(&format!(
                    "{}.{:03},home,success,0.100\n",
                    1_700_000_000 + second,
                    ms
                ));
            }
        }
        assert!(body.len() > 4 * READ_CHUNK);
        append(&path, &body);

        let mut reader = ReportReader::new(&path, Duration::from_secs(1));
        let first = reader.datapoints(false).unwrap().next().unwrap();
        assert_eq!(first.timestamp, 1700000000.0);
        assert_eq!(first.current_total().unwrap().samples(), 1000);
        // The first window closes inside the first chunk
        assert_eq!(reader.cursor().offset(), READ_CHUNK as u64);
        assert!(reader.cursor().pending().len() <= READ_CHUNK);

        let rest: Vec<_> = reader.datapoints(true).unwrap().collect();
        assert_eq!(rest.len(), 9);
        assert_eq!(rest[8].cumulative_total().unwrap().samples(), 10_000);
        assert_eq!(reader.cursor().offset(), body.len() as u64);
        assert_eq!(reader.samples_read(), 10_000);
    }
}
