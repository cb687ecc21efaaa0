// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::float_cmp)] // Test assertions with constants
#![allow(clippy::unreadable_literal)] // Large test constants

//! End-to-end pipeline tests
//!
//! Drive the acquirer, sampler and sinks together through a channel-fed
//! line source.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sensorlog::{
    Acquirer, AcquirerExit, ChannelSource, CsvSink, Event, LineSource, LoggerConfig, Pipeline,
    RoundRobinArchive, Sampler, Sink, SinkError, SinkKind,
};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Setup,
    Begin,
    Store(String, f64),
    Commit,
    Teardown,
}

#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Recorder {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    fn stores(&self) -> Vec<(String, f64)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Store(k, v) => Some((k.clone(), *v)),
                _ => None,
            })
            .collect()
    }
}

impl Sink for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn setup(&mut self) -> Result<(), SinkError> {
        self.calls.lock().push(Call::Setup);
        Ok(())
    }

    fn begin(&mut self) -> Result<(), SinkError> {
        self.calls.lock().push(Call::Begin);
        Ok(())
    }

    fn store(&mut self, _: DateTime<Utc>, key: &str, value: f64) -> Result<(), SinkError> {
        self.calls.lock().push(Call::Store(key.to_string(), value));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        self.calls.lock().push(Call::Commit);
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), SinkError> {
        self.calls.lock().push(Call::Teardown);
        Ok(())
    }
}

/// Yields its lines, then fails like a device that was unplugged.
struct Unplugging {
    lines: Vec<String>,
    closes: Arc<AtomicUsize>,
}

impl LineSource for Unplugging {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        if self.lines.is_empty() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
        }
        Ok(Some(self.lines.remove(0)))
    }

    fn close(&mut self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

fn config(sink: SinkKind, destination: &Path) -> LoggerConfig {
    LoggerConfig::builder()
        .device("test")
        .destination(destination)
        .sink(sink)
        .interval(1)
        .build()
}

#[test]
fn test_csv_records_share_cycle_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("readings.csv");
    let config = config(SinkKind::Csv, &path);

    let (tx, rx) = mpsc::channel();
    tx.send("DATA temperature value=21.0".to_string()).unwrap();
    tx.send("DATA humidity value=55.0".to_string()).unwrap();

    let pipeline = Pipeline::new(config);
    let interrupt = pipeline.interrupt_handle();
    let sink = CsvSink::new(&path);
    let runner = thread::spawn(move || pipeline.run(ChannelSource::new(rx), sink));

    wait_for("two CSV lines", || {
        std::fs::read_to_string(&path)
            .map(|c| c.lines().count() >= 2)
            .unwrap_or(false)
    });
    interrupt.interrupt();
    drop(tx);

    let report = runner.join().unwrap().unwrap();
    assert_eq!(report.cause, Event::Interrupted);
    assert!(report.sampler.cycles_ok >= 1);

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<Vec<&str>> = content
        .lines()
        .take(2)
        .map(|l| l.split(',').collect())
        .collect();
    assert_eq!(lines[0][0], lines[1][0], "records of one cycle share a timestamp");
    assert_eq!(&lines[0][1..], &["humidity", "55.0"]);
    assert_eq!(&lines[1][1..], &["temperature", "21.0"]);
}

#[test]
fn test_zero_reading_never_reaches_sink() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(SinkKind::Csv, &dir.path().join("unused.csv"));

    let (tx, rx) = mpsc::channel();
    tx.send("DATA temp value=0.0".to_string()).unwrap();

    let pipeline = Pipeline::new(config);
    let interrupt = pipeline.interrupt_handle();
    let sink = Recorder::default();
    let recorder = sink.clone();
    let runner = thread::spawn(move || pipeline.run(ChannelSource::new(rx), sink));

    wait_for("one cycle", || recorder.count(&Call::Commit) >= 1);
    interrupt.interrupt();
    drop(tx);

    let report = runner.join().unwrap().unwrap();
    assert_eq!(report.acquirer_stats.lines_read, 1);
    assert_eq!(report.acquirer_stats.samples_accepted, 0);
    assert!(recorder.stores().is_empty());
    assert_eq!(recorder.count(&Call::Teardown), 1);
}

#[test]
fn test_keep_zero_records_zero_reading() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(SinkKind::Csv, &dir.path().join("unused.csv"));
    config.keep_zero = true;

    let (tx, rx) = mpsc::channel();
    tx.send("DATA temp value=0.0".to_string()).unwrap();

    let pipeline = Pipeline::new(config);
    let interrupt = pipeline.interrupt_handle();
    let sink = Recorder::default();
    let recorder = sink.clone();
    let runner = thread::spawn(move || pipeline.run(ChannelSource::new(rx), sink));

    wait_for("one cycle", || recorder.count(&Call::Commit) >= 1);
    interrupt.interrupt();
    drop(tx);

    runner.join().unwrap().unwrap();
    assert_eq!(recorder.stores()[0], ("temp".to_string(), 0.0));
}

#[test]
fn test_acquirer_exit_stops_sampler_cleanly() {
    let (tx, rx) = mpsc::channel();
    tx.send("DATA a value=1.5".to_string()).unwrap();

    let mut acquirer = Acquirer::new(ChannelSource::new(rx));
    let stop = acquirer.stop_handle();
    let sink = Recorder::default();
    let recorder = sink.clone();
    let mut sampler = Sampler::new(
        acquirer.register(),
        acquirer.status(),
        Duration::from_millis(20),
    );

    sampler.start(sink).unwrap();
    acquirer.start().unwrap();
    wait_for("one cycle", || recorder.count(&Call::Commit) >= 1);

    stop.stop();
    tx.send("DATA a value=2.5".to_string()).unwrap();
    assert_eq!(acquirer.join().unwrap(), AcquirerExit::Stopped);

    let stats = sampler.join().unwrap();
    let calls = recorder.calls();
    let n = calls.len();

    assert_eq!(calls[0], Call::Setup);
    assert_eq!(calls[n - 2], Call::Commit);
    assert_eq!(calls[n - 1], Call::Teardown);
    assert_eq!(recorder.count(&Call::Teardown), 1);
    assert_eq!(stats.cycles_ok as usize, recorder.count(&Call::Commit));
    assert_eq!(recorder.count(&Call::Begin), recorder.count(&Call::Commit));
}

#[test]
fn test_peer_close_ends_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(SinkKind::Csv, &dir.path().join("unused.csv"));

    let (tx, rx) = mpsc::channel();
    tx.send("DATA a value=1".to_string()).unwrap();

    let sink = Recorder::default();
    let recorder = sink.clone();
    let runner = thread::spawn(move || Pipeline::new(config).run(ChannelSource::new(rx), sink));

    wait_for("one cycle", || recorder.count(&Call::Commit) >= 1);
    drop(tx);

    let report = runner.join().unwrap().unwrap();
    assert_eq!(report.cause, Event::AcquirerExited);
    assert_eq!(report.acquirer, AcquirerExit::PeerClosed);
    assert_eq!(recorder.calls().last(), Some(&Call::Teardown));
    assert_eq!(recorder.count(&Call::Teardown), 1);
}

#[test]
fn test_read_error_is_fatal_after_clean_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(SinkKind::Csv, &dir.path().join("unused.csv"));

    let closes = Arc::new(AtomicUsize::new(0));
    let source = Unplugging {
        lines: vec!["DATA a value=1.5".to_string()],
        closes: Arc::clone(&closes),
    };
    let sink = Recorder::default();
    let recorder = sink.clone();

    let result = Pipeline::new(config).run(source, sink);
    match result {
        Err(sensorlog::Error::Transport(reason)) => assert_eq!(reason, "unplugged"),
        other => panic!("expected a transport error, got {:?}", other.map(|r| r.cause)),
    }
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.count(&Call::Setup), 1);
    assert_eq!(recorder.count(&Call::Teardown), 1);
    assert_eq!(recorder.calls().last(), Some(&Call::Teardown));
}

#[test]
fn test_sink_setup_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the CSV file should be.
    let blocked = dir.path().join("blocked");
    std::fs::create_dir(&blocked).unwrap();
    let config = config(SinkKind::Csv, &blocked);

    let (tx, rx) = mpsc::channel::<String>();
    let result = Pipeline::new(config).run(ChannelSource::new(rx), CsvSink::new(&blocked));
    assert!(matches!(result, Err(sensorlog::Error::Sink(_))));
    drop(tx);
}

#[test]
fn test_archive_pipeline_creates_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sensors.rrd");
    let config = LoggerConfig::builder()
        .device("test")
        .destination(&path)
        .interval(2)
        .build();

    let (tx, rx) = mpsc::channel();
    tx.send("DATA    temperature raw=153 volt=0.75 value=21.0".to_string())
        .unwrap();
    tx.send("DATA    humidity raw=512 volt=2.5 value=55.0".to_string())
        .unwrap();

    let pipeline = Pipeline::new(config.clone());
    let interrupt = pipeline.interrupt_handle();
    let sink = sensorlog::create_sink(&config);
    let runner = thread::spawn(move || pipeline.run(ChannelSource::new(rx), sink));

    let has_known_row = || {
        RoundRobinArchive::open(&path)
            .ok()
            .and_then(|archive| archive.fetch(0))
            .map(|rows| rows.iter().any(|r| r.values.iter().all(|v| !v.is_nan())))
            .unwrap_or(false)
    };
    wait_for("a consolidated row", has_known_row);
    interrupt.interrupt();
    drop(tx);
    runner.join().unwrap().unwrap();

    let archive = RoundRobinArchive::open(&path).unwrap();
    let labels: Vec<&str> = archive.schema().labels().collect();
    assert_eq!(labels, vec!["humidity", "temperature"]);
    assert_eq!(archive.schema().step_secs, 2);
    assert_eq!(archive.schema().sources[0].heartbeat, 3.0);
    assert_eq!(archive.schema().archives[0].pdp_per_row, 1);
    assert_eq!(archive.schema().archives[0].rows, 43200);

    let rows = archive.fetch(0).unwrap();
    let known: Vec<_> = rows
        .iter()
        .filter(|r| r.values.iter().all(|v| !v.is_nan()))
        .collect();
    assert!(!known.is_empty());
    assert!((known[0].values[0] - 55.0).abs() < 1e-6);
    assert!((known[0].values[1] - 21.0).abs() < 1e-6);
}
