// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Append-only CSV sink.

use super::{Sink, SinkError};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Timestamp layout of the first column.
pub const CSV_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Writes `timestamp,label,value` lines, flushed after each reading.
///
/// Each record goes out in a single write, so a failed store never leaves
/// part of a line queued in front of the next one.
pub struct CsvSink {
    path: PathBuf,
    file: Option<File>,
    lines_written: u64,
}

impl CsvSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            lines_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines written since setup.
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }
}

impl Sink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn setup(&mut self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.file = Some(file);
        self.lines_written = 0;

        tracing::info!(path = %self.path.display(), "CSV sink opened");
        Ok(())
    }

    fn store(&mut self, timestamp: DateTime<Utc>, key: &str, value: f64) -> Result<(), SinkError> {
        let file = self.file.as_mut().ok_or(SinkError::NotReady("csv"))?;
        let record = format!(
            "{},{},{:?}\n",
            timestamp.format(CSV_TIMESTAMP_FORMAT),
            key,
            value
        );
        file.write_all(record.as_bytes())?;
        file.flush()?;
        self.lines_written += 1;
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), SinkError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            tracing::info!(
                path = %self.path.display(),
                lines = self.lines_written,
                "CSV sink closed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64, micros: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, micros * 1000).unwrap()
    }

    #[test]
    fn test_store_writes_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        let mut sink = CsvSink::new(&path);

        sink.setup().unwrap();
        let ts = at(1_700_000_000, 123_456);
        sink.store(ts, "humidity", 55.0).unwrap();
        sink.store(ts, "temperature", 21.25).unwrap();
        sink.teardown().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "2023-11-14 22:13:20.123456,humidity,55.0\n\
             2023-11-14 22:13:20.123456,temperature,21.25\n"
        );
        assert_eq!(sink.lines_written(), 2);
    }

    #[test]
    fn test_store_flushes_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        let mut sink = CsvSink::new(&path);

        sink.setup().unwrap();
        sink.store(at(0, 0), "t", 1.5).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "1970-01-01 00:00:00.000000,t,1.5\n");
        sink.teardown().unwrap();
    }

    #[test]
    fn test_setup_appends_and_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("log.csv");

        for value in [1.0, 2.0] {
            let mut sink = CsvSink::new(&path);
            sink.setup().unwrap();
            sink.store(at(0, 0), "t", value).unwrap();
            sink.teardown().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with(",t,2.0\n"));
    }

    #[test]
    fn test_failed_store_leaves_no_partial_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        let mut sink = CsvSink::new(&path);

        sink.setup().unwrap();
        sink.store(at(0, 0), "t", 1.0).unwrap();

        // Read-only handle: the write fails.
        sink.file = Some(File::open(&path).unwrap());
        assert!(matches!(
            sink.store(at(1, 0), "t", 2.0),
            Err(SinkError::Io(_))
        ));

        sink.file = Some(OpenOptions::new().append(true).open(&path).unwrap());
        sink.store(at(2, 0), "t", 3.0).unwrap();
        sink.teardown().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "1970-01-01 00:00:00.000000,t,1.0\n\
             1970-01-01 00:00:02.000000,t,3.0\n"
        );
        assert_eq!(sink.lines_written(), 2);
    }

    #[test]
    fn test_store_before_setup() {
        let dir = TempDir::new().unwrap();
        let mut sink = CsvSink::new(dir.path().join("log.csv"));
        assert!(matches!(
            sink.store(at(0, 0), "t", 1.0),
            Err(SinkError::NotReady("csv"))
        ));
        sink.teardown().unwrap();
    }
}
