// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Telemetry Logger
//!
//! Read `DATA` records from a serial device and store periodic snapshots of
//! the latest reading per sensor.
//!
//! # Architecture
//!
//! ```text
//! LineSource -> Acquirer -> LatestValues -> (tick) Sampler -> Sink -> storage
//! ```
//!
//! Two worker threads run in parallel: the [`Acquirer`] is paced by line
//! arrival, the [`Sampler`] by a fixed interval. The register is the only
//! state they share.
//!
//! # Sinks
//!
//! - **CSV**: `timestamp,label,value` lines, flushed per reading
//! - **SQLite**: table `t_events`, one transaction per cycle
//! - **Archive**: fixed-size round-robin file, layout frozen on first write
//!
//! # Example
//!
//! ```rust,ignore
//! use sensorlog::{create_sink, open_device, LoggerConfig, Pipeline, SinkKind};
//!
//! let config = LoggerConfig::builder()
//!     .device("/dev/ttyACM0")
//!     .destination("readings.csv")
//!     .sink(SinkKind::Csv)
//!     .interval(10)
//!     .build();
//!
//! let source = open_device(&config.device, config.baud)?;
//! let sink = create_sink(&config);
//! Pipeline::new(config).run(source, sink)?;
//! ```

pub mod acquirer;
pub mod archive;
pub mod config;
mod error;
pub mod lifecycle;
pub mod parser;
pub mod register;
pub mod sampler;
pub mod sink;
pub mod source;
pub mod supervisor;

pub use acquirer::{Acquirer, AcquirerExit, AcquirerStats, SampleCallback, StopHandle};
pub use archive::{ArchiveError, ArchiveSchema, RoundRobinArchive};
pub use config::{LoggerConfig, LoggerConfigBuilder};
pub use error::{Error, Result};
pub use lifecycle::{RunState, RunStatus};
pub use parser::{parse_sample, ParseOptions, Sample};
pub use register::{LatestValues, Snapshot};
pub use sampler::{Sampler, SamplerStats};
pub use sink::{create_sink, ArchiveSink, CsvSink, Sink, SinkError, SinkKind, SqliteSink};
pub use source::{open_device, ChannelSource, LineSource, ReaderSource, SerialSource};
pub use supervisor::{Event, InterruptHandle, Pipeline, PipelineReport};
