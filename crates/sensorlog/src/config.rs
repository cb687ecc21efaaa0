// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logger configuration.

use crate::error::{Error, Result};
use crate::parser::{ParseOptions, DATA_MARKER};
use crate::sink::SinkKind;
use crate::source::DEFAULT_BAUD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default sampling interval in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Upper bound on the archive sink's sampling period.
pub const ARCHIVE_MAX_STEP: Duration = Duration::from_secs(15);

/// Logger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Serial device path, `-` for stdin.
    pub device: String,
    /// Output file.
    pub destination: PathBuf,
    /// Storage backend.
    pub sink: SinkKind,
    /// Sampling interval (archive sink: row resolution).
    pub sample_interval_secs: u64,
    /// Serial line speed.
    pub baud: u32,
    /// First token of data records.
    pub marker: String,
    /// Record `0.0` readings.
    pub keep_zero: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            destination: PathBuf::new(),
            sink: SinkKind::default(),
            sample_interval_secs: DEFAULT_INTERVAL_SECS,
            baud: DEFAULT_BAUD,
            marker: DATA_MARKER.to_string(),
            keep_zero: false,
        }
    }
}

impl LoggerConfig {
    /// Create a new builder.
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// Load a YAML configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(Error::Config("device is required".into()));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(Error::Config("destination is required".into()));
        }
        if self.sample_interval_secs == 0 {
            return Err(Error::Config("sample interval must be at least 1 second".into()));
        }
        if self.marker.trim().is_empty() || self.marker.contains(char::is_whitespace) {
            return Err(Error::Config(format!("invalid marker: {:?}", self.marker)));
        }
        Ok(())
    }

    /// Period between sampler ticks.
    ///
    /// The archive sink samples at most every [`ARCHIVE_MAX_STEP`] and
    /// consolidates into rows of [`Self::archive_interval`].
    pub fn sampling_interval(&self) -> Duration {
        let interval = self.archive_interval();
        match self.sink {
            SinkKind::Archive => interval.min(ARCHIVE_MAX_STEP),
            SinkKind::Csv | SinkKind::Sqlite => interval,
        }
    }

    /// Configured interval.
    pub fn archive_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions::default().keep_zero(self.keep_zero)
    }

    /// `true` when lines come from stdin.
    pub fn reads_stdin(&self) -> bool {
        self.device == "-"
    }
}

/// Builder for LoggerConfig.
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// Start from an existing configuration (e.g. one loaded from a file).
    pub fn from_config(config: LoggerConfig) -> Self {
        Self { config }
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.config.device = device.into();
        self
    }

    pub fn destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.destination = path.into();
        self
    }

    pub fn sink(mut self, kind: SinkKind) -> Self {
        self.config.sink = kind;
        self
    }

    /// Set the sampling interval in seconds.
    pub fn interval(mut self, secs: u64) -> Self {
        self.config.sample_interval_secs = secs;
        self
    }

    pub fn baud(mut self, baud: u32) -> Self {
        self.config.baud = baud;
        self
    }

    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.config.marker = marker.into();
        self
    }

    pub fn keep_zero(mut self, keep: bool) -> Self {
        self.config.keep_zero = keep;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}
