// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Round-robin archive sink.
//!
//! The archive layout is derived from the first non-empty cycle and frozen
//! for the lifetime of the file. Later cycles are mapped onto that layout:
//! labels outside it are dropped, labels missing from a cycle are unknown.

use super::{Sink, SinkError};
use crate::archive::{ArchiveSchema, RoundRobinArchive};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct ArchiveSink {
    path: PathBuf,
    step: Duration,
    archive_interval: Duration,
    ready: bool,
    archive: Option<RoundRobinArchive>,
    pending: BTreeMap<String, f64>,
    timestamp: Option<DateTime<Utc>>,
    dropped: HashSet<String>,
}

impl ArchiveSink {
    /// `step` is the sampling period, `archive_interval` the row resolution.
    pub fn new(path: impl AsRef<Path>, step: Duration, archive_interval: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            step,
            archive_interval,
            ready: false,
            archive: None,
            pending: BTreeMap::new(),
            timestamp: None,
            dropped: HashSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frozen layout, once the archive exists.
    pub fn schema(&self) -> Option<&ArchiveSchema> {
        self.archive.as_ref().map(|a| a.schema())
    }

    pub fn archive(&self) -> Option<&RoundRobinArchive> {
        self.archive.as_ref()
    }

    fn adopt(&mut self, archive: RoundRobinArchive) {
        let schema = archive.schema();
        if schema.step_secs != self.step.as_secs().max(1) {
            tracing::warn!(
                path = %self.path.display(),
                stored = schema.step_secs,
                configured = self.step.as_secs(),
                "Existing archive uses a different step"
            );
        }
        tracing::info!(
            path = %self.path.display(),
            labels = ?schema.labels().collect::<Vec<_>>(),
            "Using existing archive"
        );
        self.archive = Some(archive);
    }

    fn create(&mut self, timestamp: f64) -> Result<(), SinkError> {
        let schema = ArchiveSchema::derive(self.pending.keys().cloned(), self.step, self.archive_interval)?;
        let start = timestamp - schema.step_secs as f64;

        tracing::info!(
            path = %self.path.display(),
            labels = ?schema.labels().collect::<Vec<_>>(),
            step = schema.step_secs,
            cf = schema.archives[0].cf.as_str(),
            pdp_per_row = schema.archives[0].pdp_per_row,
            rows = schema.archives[0].rows,
            "Creating archive"
        );
        self.archive = Some(RoundRobinArchive::create(&self.path, schema, start)?);
        Ok(())
    }
}

fn unix_seconds(timestamp: DateTime<Utc>) -> f64 {
    timestamp.timestamp_micros() as f64 / 1_000_000.0
}

impl Sink for ArchiveSink {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn setup(&mut self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // An unreadable existing file is a setup failure, not a per-cycle one.
        if self.archive.is_none() && self.path.exists() {
            let archive = RoundRobinArchive::open(&self.path)?;
            self.adopt(archive);
        }
        self.ready = true;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), SinkError> {
        self.pending.clear();
        self.timestamp = None;
        Ok(())
    }

    fn store(&mut self, timestamp: DateTime<Utc>, key: &str, value: f64) -> Result<(), SinkError> {
        if !self.ready {
            return Err(SinkError::NotReady("archive"));
        }
        self.timestamp = Some(timestamp);
        self.pending.insert(key.to_string(), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        if !self.ready {
            return Err(SinkError::NotReady("archive"));
        }
        let Some(timestamp) = self.timestamp.take() else {
            return Ok(());
        };
        if self.pending.is_empty() {
            return Ok(());
        }
        let now = unix_seconds(timestamp);

        if self.archive.is_none() {
            if self.path.exists() {
                let archive = RoundRobinArchive::open(&self.path)?;
                self.adopt(archive);
            } else {
                self.create(now)?;
            }
        }
        let Some(archive) = self.archive.as_mut() else {
            return Err(SinkError::NotReady("archive"));
        };

        for label in self.pending.keys() {
            if archive.schema().index_of(label).is_none() && self.dropped.insert(label.clone()) {
                tracing::warn!(label = %label, "Label not in archive, dropping");
            }
        }

        let values: Vec<Option<f64>> = archive
            .schema()
            .labels()
            .map(|label| self.pending.get(label).copied())
            .collect();
        archive.update(now, &values)?;

        tracing::debug!(
            known = values.iter().filter(|v| v.is_some()).count(),
            total = values.len(),
            "Archive updated"
        );
        self.pending.clear();
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), SinkError> {
        self.pending.clear();
        self.ready = false;
        if let Some(archive) = self.archive.take() {
            tracing::info!(path = %archive.path().display(), "Archive closed");
        }
        Ok(())
    }
}
