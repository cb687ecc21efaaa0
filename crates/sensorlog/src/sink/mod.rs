// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Storage backends for sampled snapshots.
//!
//! A sink sees the following call order:
//!
//! ```text
//! setup()                       once, before the first cycle
//! begin() store()* commit()     once per sampling cycle
//! teardown()                    once, when sampling stops
//! ```
//!
//! # Implementations
//!
//! - [`CsvSink`] -- append-only text file, one line per reading
//! - [`SqliteSink`] -- one transaction per cycle
//! - [`ArchiveSink`] -- fixed-size round-robin archive

mod archive;
mod csv;
mod sqlite;

pub use archive::ArchiveSink;
pub use csv::CsvSink;
pub use sqlite::SqliteSink;

use crate::archive::ArchiveError;
use crate::config::LoggerConfig;
use crate::register::Snapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("{0} sink used before setup")]
    NotReady(&'static str),
}

/// Persistence backend driven by the sampler.
pub trait Sink: Send {
    /// Short backend name for log fields.
    fn name(&self) -> &'static str;

    /// Acquire resources (open files, connections).
    fn setup(&mut self) -> Result<(), SinkError>;

    /// Start a cycle.
    fn begin(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Record one reading of the current cycle.
    fn store(&mut self, timestamp: DateTime<Utc>, key: &str, value: f64) -> Result<(), SinkError>;

    /// Finish the current cycle.
    fn commit(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Release resources. Called once, after the last cycle.
    fn teardown(&mut self) -> Result<(), SinkError>;
}

impl Sink for Box<dyn Sink> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn setup(&mut self) -> Result<(), SinkError> {
        (**self).setup()
    }

    fn begin(&mut self) -> Result<(), SinkError> {
        (**self).begin()
    }

    fn store(&mut self, timestamp: DateTime<Utc>, key: &str, value: f64) -> Result<(), SinkError> {
        (**self).store(timestamp, key, value)
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        (**self).commit()
    }

    fn teardown(&mut self) -> Result<(), SinkError> {
        (**self).teardown()
    }
}

/// Run one begin/store/commit cycle for a snapshot.
///
/// Every entry shares `timestamp`. The snapshot is already sorted by label.
pub fn run_cycle<S: Sink + ?Sized>(
    sink: &mut S,
    timestamp: DateTime<Utc>,
    snapshot: &Snapshot,
) -> Result<(), SinkError> {
    sink.begin()?;
    for (key, value) in snapshot {
        sink.store(timestamp, key, *value)?;
    }
    sink.commit()
}

/// Sink backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Csv,
    Sqlite,
    #[default]
    Archive,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Sqlite => "sqlite",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the sink selected by `config`. Nothing is opened until `setup`.
pub fn create_sink(config: &LoggerConfig) -> Box<dyn Sink> {
    match config.sink {
        SinkKind::Csv => Box::new(CsvSink::new(&config.destination)),
        SinkKind::Sqlite => Box::new(SqliteSink::new(&config.destination)),
        SinkKind::Archive => Box::new(ArchiveSink::new(
            &config.destination,
            config.sampling_interval(),
            config.archive_interval(),
        )),
    }
}
