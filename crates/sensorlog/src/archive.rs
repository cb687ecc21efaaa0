// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Round-robin archive file (`.rrd`-style, fixed size).
//!
//! # Format Overview
//!
//! All integers and floats are little-endian. NaN encodes "unknown".
//!
//! ```text
//! +---------------------------------------------------------+
//! |                  File Header (36 bytes)                  |
//! |  Magic (8) | Version (4) | Step (8) | LastUpdate f64 (8) |
//! |  SourceCount (4) | ArchiveCount (4)                      |
//! +---------------------------------------------------------+
//! |  Source[]:  name_len (2) | name | heartbeat f64 (8)      |
//! |             min f64 (8) | max f64 (8)                    |
//! +---------------------------------------------------------+
//! |  Archive[]: cf (1) | xff f64 (8) | pdp_per_row (8)       |
//! |             rows (8)                                     |
//! +---------------------------------------------------------+
//! |  Live state                                              |
//! |  per source:  unknown_secs f64 | accum f64               |
//! |  per archive: cur_row (8), per source:                   |
//! |               accum f64 | known (8) | unknown (8)        |
//! +---------------------------------------------------------+
//! |  Rows: per archive, rows x source_count f64              |
//! +---------------------------------------------------------+
//! ```
//!
//! # Update Semantics
//!
//! Series are gauges. Each update credits the time elapsed since the previous
//! update to the open primary data point (PDP). When a step boundary is
//! crossed the PDP is finalised: it is unknown if the gap exceeds the source
//! heartbeat or if more than half of the step is unknown. Every finalised PDP
//! is consolidated into each archive, which writes a row once `pdp_per_row`
//! PDPs have accumulated (unknown when the unknown fraction exceeds `xff`).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Magic bytes: "SLRRD\0\0\0"
pub const MAGIC: [u8; 8] = [0x53, 0x4C, 0x52, 0x52, 0x44, 0x00, 0x00, 0x00];

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Heartbeat as a multiple of the step.
pub const HEARTBEAT_FACTOR: f64 = 1.5;

/// Fraction of unknown PDPs tolerated in a consolidated row.
pub const DEFAULT_XFF: f64 = 0.5;

/// History kept by the derived archive.
pub const RETENTION_SECS: u64 = 24 * 60 * 60;

const HEADER_SIZE: u64 = 36;
const LAST_UPDATE_OFFSET: u64 = 20;
const ARCHIVE_DEF_SIZE: u64 = 25;
const PDP_STATE_SIZE: u64 = 16;
const CDP_STATE_SIZE: u64 = 24;
const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Archive errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Invalid archive file: {0}")]
    Corrupt(String),

    #[error("Unsupported archive version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Update at {timestamp} is not after last update {last_update}")]
    StaleUpdate { timestamp: f64, last_update: f64 },

    #[error("Expected {expected} values, got {got}")]
    ValueCount { expected: usize, got: usize },
}

/// Consolidation function applied when rows are built from PDPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Consolidation {
    Average = 0,
    Min = 1,
    Max = 2,
    Last = 3,
}

impl Consolidation {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Average),
            1 => Some(Self::Min),
            2 => Some(Self::Max),
            3 => Some(Self::Last),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Last => "LAST",
        }
    }
}

/// One gauge series.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSource {
    pub name: String,
    /// Seconds without an update after which the series becomes unknown.
    pub heartbeat: f64,
    /// Lower bound, NaN = unbounded.
    pub min: f64,
    /// Upper bound, NaN = unbounded.
    pub max: f64,
}

impl DataSource {
    /// Unbounded gauge.
    pub fn gauge(name: impl Into<String>, heartbeat: f64) -> Self {
        Self {
            name: name.into(),
            heartbeat,
            min: f64::NAN,
            max: f64::NAN,
        }
    }

    fn accepts(&self, value: f64) -> bool {
        value.is_finite()
            && (self.min.is_nan() || value >= self.min)
            && (self.max.is_nan() || value <= self.max)
    }
}

/// One retention archive.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionArchive {
    pub cf: Consolidation,
    pub xff: f64,
    pub pdp_per_row: u64,
    pub rows: u64,
}

/// Frozen layout of an archive: step, series and retention archives.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveSchema {
    pub step_secs: u64,
    pub sources: Vec<DataSource>,
    pub archives: Vec<RetentionArchive>,
}

impl ArchiveSchema {
    /// Derive the schema for a set of labels.
    ///
    /// One unbounded gauge per label (sorted, heartbeat `1.5 x step`) and one
    /// AVERAGE archive holding a day of rows at `archive_interval` resolution.
    pub fn derive<I, S>(labels: I, step: Duration, archive_interval: Duration) -> Result<Self, ArchiveError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = labels.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        if names.is_empty() {
            return Err(ArchiveError::InvalidSchema("no labels".into()));
        }

        let step_secs = step.as_secs().max(1);
        let archive_secs = archive_interval.as_secs().max(1);
        let heartbeat = step_secs as f64 * HEARTBEAT_FACTOR;

        let schema = Self {
            step_secs,
            sources: names
                .into_iter()
                .map(|name| DataSource::gauge(name, heartbeat))
                .collect(),
            archives: vec![RetentionArchive {
                cf: Consolidation::Average,
                xff: DEFAULT_XFF,
                pdp_per_row: (archive_secs / step_secs).max(1),
                rows: (RETENTION_SECS / archive_secs).max(1),
            }],
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.name.as_str())
    }

    pub fn label_count(&self) -> usize {
        self.sources.len()
    }

    /// Position of `label` in the frozen series order.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.name == label)
    }

    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.step_secs == 0 {
            return Err(ArchiveError::InvalidSchema("step must be positive".into()));
        }
        if self.sources.is_empty() {
            return Err(ArchiveError::InvalidSchema("no data sources".into()));
        }
        if self.archives.is_empty() {
            return Err(ArchiveError::InvalidSchema("no retention archives".into()));
        }
        for (i, source) in self.sources.iter().enumerate() {
            if source.name.is_empty() || source.name.len() > MAX_NAME_LEN {
                return Err(ArchiveError::InvalidSchema(format!(
                    "invalid source name at index {}",
                    i
                )));
            }
            if !(source.heartbeat.is_finite() && source.heartbeat > 0.0) {
                return Err(ArchiveError::InvalidSchema(format!(
                    "invalid heartbeat for {}: {}",
                    source.name, source.heartbeat
                )));
            }
            if self.sources[..i].iter().any(|s| s.name == source.name) {
                return Err(ArchiveError::InvalidSchema(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
        }
        for archive in &self.archives {
            if archive.pdp_per_row == 0 || archive.rows == 0 {
                return Err(ArchiveError::InvalidSchema(
                    "archive needs at least one pdp per row and one row".into(),
                ));
            }
            if !(0.0..1.0).contains(&archive.xff) {
                return Err(ArchiveError::InvalidSchema(format!(
                    "xff out of range: {}",
                    archive.xff
                )));
            }
        }
        Ok(())
    }

    fn definition_size(&self) -> u64 {
        let sources: u64 = self
            .sources
            .iter()
            .map(|s| 2 + s.name.len() as u64 + 24)
            .sum();
        HEADER_SIZE + sources + ARCHIVE_DEF_SIZE * self.archives.len() as u64
    }

    fn live_size(&self) -> u64 {
        let n = self.sources.len() as u64;
        PDP_STATE_SIZE * n + self.archives.len() as u64 * (8 + CDP_STATE_SIZE * n)
    }
}

/// Open primary data point of one source.
#[derive(Debug, Clone, Copy, Default)]
struct PdpState {
    unknown_secs: f64,
    accum: f64,
}

/// Open consolidated data point of one source in one archive.
#[derive(Debug, Clone, Copy, Default)]
struct CdpState {
    accum: f64,
    known: u64,
    unknown: u64,
}

impl CdpState {
    fn push(&mut self, cf: Consolidation, pdp: Option<f64>) {
        let Some(v) = pdp else {
            self.unknown += 1;
            return;
        };
        self.accum = if self.known == 0 {
            v
        } else {
            match cf {
                Consolidation::Average => self.accum + v,
                Consolidation::Min => self.accum.min(v),
                Consolidation::Max => self.accum.max(v),
                Consolidation::Last => v,
            }
        };
        self.known += 1;
    }

    fn take(&mut self, cf: Consolidation, xff: f64, pdp_per_row: u64) -> f64 {
        let value = if self.known == 0 || self.unknown as f64 > xff * pdp_per_row as f64 {
            f64::NAN
        } else if cf == Consolidation::Average {
            self.accum / self.known as f64
        } else {
            self.accum
        };
        *self = Self::default();
        value
    }
}

/// Row pointer and open CDPs of one archive.
#[derive(Debug, Clone)]
struct RowCursor {
    cur_row: u64,
    cdp: Vec<CdpState>,
}

#[derive(Debug, Clone)]
struct ArchiveState {
    cursor: RowCursor,
    rows: Vec<f64>,
}

/// A consolidated row produced by an update.
#[derive(Debug)]
struct RowWrite {
    archive: usize,
    row: u64,
    values: Vec<f64>,
}

/// Outcome of one update, adopted only once it is on disk.
struct Staged {
    last_update: f64,
    pdp: Vec<PdpState>,
    cursors: Vec<RowCursor>,
    rows: Vec<RowWrite>,
}

/// A consolidated row read back from an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRow {
    /// Unix seconds at the end of the row's interval.
    pub timestamp: i64,
    /// One value per source, in schema order. NaN = unknown.
    pub values: Vec<f64>,
}

/// Open round-robin archive file.
pub struct RoundRobinArchive {
    path: PathBuf,
    file: File,
    schema: ArchiveSchema,
    last_update: f64,
    pdp: Vec<PdpState>,
    archives: Vec<ArchiveState>,
    live_offset: u64,
}

impl RoundRobinArchive {
    /// Create a new archive file. Fails if `path` already exists.
    ///
    /// `start` (Unix seconds) is the reference time of the first update
    /// interval; updates must be strictly later.
    pub fn create(path: impl AsRef<Path>, schema: ArchiveSchema, start: f64) -> Result<Self, ArchiveError> {
        schema.validate()?;
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ArchiveError::AlreadyExists(path));
            }
            Err(e) => return Err(e.into()),
        };

        let step = schema.step_secs as f64;
        let pdp_index = (start / step).floor() as u64;
        let pdp = vec![
            PdpState {
                unknown_secs: start - pdp_index as f64 * step,
                accum: 0.0,
            };
            schema.sources.len()
        ];
        let archives = schema
            .archives
            .iter()
            .map(|a| ArchiveState {
                cursor: RowCursor {
                    cur_row: a.rows - 1,
                    cdp: vec![
                        CdpState {
                            unknown: pdp_index % a.pdp_per_row,
                            ..Default::default()
                        };
                        schema.sources.len()
                    ],
                },
                rows: vec![f64::NAN; (a.rows as usize) * schema.sources.len()],
            })
            .collect();

        let mut archive = Self {
            path,
            file,
            live_offset: schema.definition_size(),
            schema,
            last_update: start,
            pdp,
            archives,
        };
        archive.write_all()?;

        tracing::debug!(
            path = %archive.path.display(),
            step = archive.schema.step_secs,
            sources = archive.schema.sources.len(),
            "Archive created"
        );
        Ok(archive)
    }

    /// Open an existing archive file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let mut r = Cursor::new(bytes.as_slice());

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)
            .map_err(|_| ArchiveError::Corrupt("truncated header".into()))?;
        if magic != MAGIC {
            return Err(ArchiveError::Corrupt("bad magic".into()));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(ArchiveError::UnsupportedVersion(version));
        }

        let (schema, last_update) = read_definition(&mut r)?;
        schema.validate()?;

        let expected = schema.definition_size()
            + schema.live_size()
            + schema
                .archives
                .iter()
                .map(|a| a.rows * schema.sources.len() as u64 * 8)
                .sum::<u64>();
        if bytes.len() as u64 != expected {
            return Err(ArchiveError::Corrupt(format!(
                "expected {} bytes, found {}",
                expected,
                bytes.len()
            )));
        }

        let n = schema.sources.len();
        let mut pdp = Vec::with_capacity(n);
        for _ in 0..n {
            pdp.push(PdpState {
                unknown_secs: r.read_f64::<LittleEndian>()?,
                accum: r.read_f64::<LittleEndian>()?,
            });
        }

        let mut archives = Vec::with_capacity(schema.archives.len());
        for def in &schema.archives {
            let cur_row = r.read_u64::<LittleEndian>()?;
            if cur_row >= def.rows {
                return Err(ArchiveError::Corrupt("row pointer out of range".into()));
            }
            let mut cdp = Vec::with_capacity(n);
            for _ in 0..n {
                cdp.push(CdpState {
                    accum: r.read_f64::<LittleEndian>()?,
                    known: r.read_u64::<LittleEndian>()?,
                    unknown: r.read_u64::<LittleEndian>()?,
                });
            }
            archives.push(ArchiveState {
                cursor: RowCursor { cur_row, cdp },
                rows: Vec::new(),
            });
        }
        for (state, def) in archives.iter_mut().zip(&schema.archives) {
            let count = def.rows as usize * n;
            state.rows.reserve_exact(count);
            for _ in 0..count {
                state.rows.push(r.read_f64::<LittleEndian>()?);
            }
        }

        let live_offset = schema.definition_size();
        Ok(Self {
            path,
            file,
            schema,
            last_update,
            pdp,
            archives,
            live_offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &ArchiveSchema {
        &self.schema
    }

    /// Unix seconds of the last accepted update.
    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    /// Apply one update at `timestamp` (Unix seconds).
    ///
    /// `values` follows the schema's source order; `None` means unknown.
    pub fn update(&mut self, timestamp: f64, values: &[Option<f64>]) -> Result<(), ArchiveError> {
        if values.len() != self.schema.sources.len() {
            return Err(ArchiveError::ValueCount {
                expected: self.schema.sources.len(),
                got: values.len(),
            });
        }
        if !timestamp.is_finite() || timestamp <= self.last_update {
            return Err(ArchiveError::StaleUpdate {
                timestamp,
                last_update: self.last_update,
            });
        }

        let step = self.schema.step_secs as f64;
        let interval = timestamp - self.last_update;
        let proc_pdp = (self.last_update / step).floor() as u64;
        let occu_pdp = (timestamp / step).floor() as u64;

        // Rate-weighted contribution of this update, per source.
        let incoming: Vec<Option<f64>> = values
            .iter()
            .zip(&self.schema.sources)
            .map(|(value, source)| match value {
                Some(v) if interval <= source.heartbeat && source.accepts(*v) => {
                    Some(v * interval)
                }
                _ => None,
            })
            .collect();

        let mut staged = Staged {
            last_update: timestamp,
            pdp: self.pdp.clone(),
            cursors: self.archives.iter().map(|a| a.cursor.clone()).collect(),
            rows: Vec::new(),
        };

        if occu_pdp <= proc_pdp {
            for (state, contribution) in staged.pdp.iter_mut().zip(&incoming) {
                match contribution {
                    Some(c) => state.accum += c,
                    None => state.unknown_secs += interval,
                }
            }
            return self.commit(staged);
        }

        let boundary = occu_pdp as f64 * step;
        let pre_int = boundary - self.last_update;
        let post_int = timestamp - boundary;
        let span = (occu_pdp - proc_pdp) as f64 * step;
        let elapsed = occu_pdp - proc_pdp;

        let mut finished = Vec::with_capacity(staged.pdp.len());
        for ((state, contribution), source) in staged
            .pdp
            .iter_mut()
            .zip(&incoming)
            .zip(&self.schema.sources)
        {
            match contribution {
                Some(c) => state.accum += c / interval * pre_int,
                None => state.unknown_secs += pre_int,
            }

            let known_secs = span - state.unknown_secs;
            let pdp = if interval > source.heartbeat
                || state.unknown_secs > step / 2.0
                || known_secs <= 0.0
            {
                None
            } else {
                Some(state.accum / known_secs)
            };
            finished.push(pdp);

            *state = match contribution {
                Some(c) => PdpState {
                    unknown_secs: 0.0,
                    accum: c / interval * post_int,
                },
                None => PdpState {
                    unknown_secs: post_int,
                    accum: 0.0,
                },
            };
        }

        for (idx, (def, cursor)) in self
            .schema
            .archives
            .iter()
            .zip(staged.cursors.iter_mut())
            .enumerate()
        {
            consolidate(def, cursor, proc_pdp, elapsed, &finished, idx, &mut staged.rows);
        }

        self.commit(staged)
    }

    /// All rows of archive `index`, oldest first.
    pub fn fetch(&self, index: usize) -> Option<Vec<ArchiveRow>> {
        let def = self.schema.archives.get(index)?;
        let state = &self.archives[index];
        let n = self.schema.sources.len();

        let row_secs = (self.schema.step_secs * def.pdp_per_row) as i64;
        let newest_end = (self.last_update as i64).div_euclid(row_secs) * row_secs;

        let mut rows = Vec::with_capacity(def.rows as usize);
        for age in (0..def.rows).rev() {
            let slot = ((state.cursor.cur_row + def.rows - age) % def.rows) as usize;
            rows.push(ArchiveRow {
                timestamp: newest_end - age as i64 * row_secs,
                values: state.rows[slot * n..(slot + 1) * n].to_vec(),
            });
        }
        Some(rows)
    }

    fn rows_offset(&self, index: usize) -> u64 {
        let n = self.schema.sources.len() as u64;
        self.live_offset
            + self.schema.live_size()
            + self.schema.archives[..index]
                .iter()
                .map(|a| a.rows * n * 8)
                .sum::<u64>()
    }

    fn write_all(&mut self) -> io::Result<()> {
        let mut buf = Vec::new();
        write_definition(&mut buf, &self.schema, self.last_update)?;
        buf.extend_from_slice(&encode_live(
            &self.pdp,
            self.archives.iter().map(|a| &a.cursor),
        )?);
        for state in &self.archives {
            for value in &state.rows {
                buf.write_f64::<LittleEndian>(*value)?;
            }
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.flush()
    }

    /// Write `staged` to the file, then adopt it.
    ///
    /// On error the in-memory state stays at the previous update; the next
    /// update recomputes and rewrites the same rows.
    fn commit(&mut self, staged: Staged) -> Result<(), ArchiveError> {
        let n = self.schema.sources.len();
        for write in &staged.rows {
            let offset = self.rows_offset(write.archive) + write.row * n as u64 * 8;
            let mut buf = Vec::with_capacity(n * 8);
            for value in &write.values {
                buf.write_f64::<LittleEndian>(*value)?;
            }
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(&buf)?;
        }

        let live = encode_live(&staged.pdp, staged.cursors.iter())?;
        self.file.seek(SeekFrom::Start(self.live_offset))?;
        self.file.write_all(&live)?;

        self.file.seek(SeekFrom::Start(LAST_UPDATE_OFFSET))?;
        self.file.write_f64::<LittleEndian>(staged.last_update)?;
        self.file.flush()?;

        for write in staged.rows {
            let start = write.row as usize * n;
            self.archives[write.archive].rows[start..start + n].copy_from_slice(&write.values);
        }
        for (state, cursor) in self.archives.iter_mut().zip(staged.cursors) {
            state.cursor = cursor;
        }
        self.pdp = staged.pdp;
        self.last_update = staged.last_update;
        Ok(())
    }
}

impl std::fmt::Debug for RoundRobinArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundRobinArchive")
            .field("path", &self.path)
            .field("last_update", &self.last_update)
            .field("sources", &self.schema.sources.len())
            .finish_non_exhaustive()
    }
}

/// Feed `count` finished PDPs, the first with absolute index `first`, into one archive.
fn consolidate(
    def: &RetentionArchive,
    cursor: &mut RowCursor,
    first: u64,
    count: u64,
    pdps: &[Option<f64>],
    index: usize,
    rows: &mut Vec<RowWrite>,
) {
    let window = def.pdp_per_row * def.rows;
    let end = first + count;
    let mut k = first;

    while k < end {
        // Rows that would be overwritten again within this update are skipped.
        if k % def.pdp_per_row == 0 && end - k > window {
            let skip_rows = (end - k - window) / def.pdp_per_row;
            cursor.cur_row = (cursor.cur_row + skip_rows) % def.rows;
            k += skip_rows * def.pdp_per_row;
            if skip_rows > 0 {
                continue;
            }
        }

        for (cdp, pdp) in cursor.cdp.iter_mut().zip(pdps) {
            cdp.push(def.cf, *pdp);
        }

        if (k + 1) % def.pdp_per_row == 0 {
            cursor.cur_row = (cursor.cur_row + 1) % def.rows;
            rows.push(RowWrite {
                archive: index,
                row: cursor.cur_row,
                values: cursor
                    .cdp
                    .iter_mut()
                    .map(|cdp| cdp.take(def.cf, def.xff, def.pdp_per_row))
                    .collect(),
            });
        }
        k += 1;
    }
}

fn encode_live<'a>(
    pdp: &[PdpState],
    cursors: impl Iterator<Item = &'a RowCursor>,
) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    for state in pdp {
        buf.write_f64::<LittleEndian>(state.unknown_secs)?;
        buf.write_f64::<LittleEndian>(state.accum)?;
    }
    for cursor in cursors {
        buf.write_u64::<LittleEndian>(cursor.cur_row)?;
        for cdp in &cursor.cdp {
            buf.write_f64::<LittleEndian>(cdp.accum)?;
            buf.write_u64::<LittleEndian>(cdp.known)?;
            buf.write_u64::<LittleEndian>(cdp.unknown)?;
        }
    }
    Ok(buf)
}

fn write_definition<W: Write>(w: &mut W, schema: &ArchiveSchema, last_update: f64) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    w.write_u64::<LittleEndian>(schema.step_secs)?;
    w.write_f64::<LittleEndian>(last_update)?;
    w.write_u32::<LittleEndian>(schema.sources.len() as u32)?;
    w.write_u32::<LittleEndian>(schema.archives.len() as u32)?;

    for source in &schema.sources {
        w.write_u16::<LittleEndian>(source.name.len() as u16)?;
        w.write_all(source.name.as_bytes())?;
        w.write_f64::<LittleEndian>(source.heartbeat)?;
        w.write_f64::<LittleEndian>(source.min)?;
        w.write_f64::<LittleEndian>(source.max)?;
    }
    for archive in &schema.archives {
        w.write_u8(archive.cf as u8)?;
        w.write_f64::<LittleEndian>(archive.xff)?;
        w.write_u64::<LittleEndian>(archive.pdp_per_row)?;
        w.write_u64::<LittleEndian>(archive.rows)?;
    }
    Ok(())
}

fn read_definition<R: Read>(r: &mut R) -> Result<(ArchiveSchema, f64), ArchiveError> {
    let step_secs = r.read_u64::<LittleEndian>()?;
    let last_update = r.read_f64::<LittleEndian>()?;
    let source_count = r.read_u32::<LittleEndian>()? as usize;
    let archive_count = r.read_u32::<LittleEndian>()? as usize;

    let mut sources = Vec::with_capacity(source_count.min(1024));
    for _ in 0..source_count {
        let len = r.read_u16::<LittleEndian>()? as usize;
        let mut name = vec![0u8; len];
        r.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| ArchiveError::Corrupt("source name is not UTF-8".into()))?;
        sources.push(DataSource {
            name,
            heartbeat: r.read_f64::<LittleEndian>()?,
            min: r.read_f64::<LittleEndian>()?,
            max: r.read_f64::<LittleEndian>()?,
        });
    }

    let mut archives = Vec::with_capacity(archive_count.min(64));
    for _ in 0..archive_count {
        let cf = r.read_u8()?;
        let cf = Consolidation::from_u8(cf)
            .ok_or_else(|| ArchiveError::Corrupt(format!("unknown consolidation {}", cf)))?;
        archives.push(RetentionArchive {
            cf,
            xff: r.read_f64::<LittleEndian>()?,
            pdp_per_row: r.read_u64::<LittleEndian>()?,
            rows: r.read_u64::<LittleEndian>()?,
        });
    }

    Ok((
        ArchiveSchema {
            step_secs,
            sources,
            archives,
        },
        last_update,
    ))
}
