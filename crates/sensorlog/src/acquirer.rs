// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Acquirer - reads the line source and folds samples into the register.

use crate::error::{Error, Result};
use crate::lifecycle::{ExitGuard, ExitHook, RunState, RunStatus, StateCell, StopSignal};
use crate::parser::{is_marked, parse_sample, ParseOptions, DATA_MARKER};
use crate::register::LatestValues;
use crate::source::LineSource;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Per-sample hook, called on the acquisition thread after the register update.
pub type SampleCallback = Box<dyn FnMut(&str, f64) -> anyhow::Result<()> + Send>;

/// Why the acquisition loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquirerExit {
    /// `stop()` was observed at a line boundary.
    Stopped,
    /// The source reported end of stream.
    PeerClosed,
    /// Reading from the source failed.
    Failed(String),
}

impl AcquirerExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Acquirer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquirerStats {
    /// Lines read from the source.
    pub lines_read: u64,
    /// Samples stored in the register.
    pub samples_accepted: u64,
    /// Unmarked or unparsable lines.
    pub lines_ignored: u64,
    /// Callback errors and panics.
    pub callback_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    lines_read: AtomicU64,
    samples_accepted: AtomicU64,
    lines_ignored: AtomicU64,
    callback_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> AcquirerStats {
        AcquirerStats {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            samples_accepted: self.samples_accepted.load(Ordering::Relaxed),
            lines_ignored: self.lines_ignored.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
        }
    }
}

/// Handle to stop the acquirer from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    signal: StopSignal,
}

impl StopHandle {
    /// Request a stop. Takes effect at the next line boundary.
    pub fn stop(&self) {
        self.signal.stop();
    }
}

/// Drives a [`LineSource`] on a dedicated thread.
pub struct Acquirer {
    source: Option<Box<dyn LineSource>>,
    register: LatestValues,
    marker: String,
    options: ParseOptions,
    callback: Option<SampleCallback>,
    on_exit: Option<ExitHook>,
    state: StateCell,
    stop: StopSignal,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<AcquirerExit>>,
}

impl Acquirer {
    /// Create an idle acquirer with an empty register.
    pub fn new(source: impl LineSource + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            register: LatestValues::new(),
            marker: DATA_MARKER.to_string(),
            options: ParseOptions::default(),
            callback: None,
            on_exit: None,
            state: StateCell::new(),
            stop: StopSignal::new(),
            counters: Arc::new(Counters::default()),
            handle: None,
        }
    }

    /// Set the line-type marker of data records.
    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn parse_options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    /// Invoke `callback` for every accepted sample.
    ///
    /// Errors and panics are logged and counted; acquisition continues.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str, f64) -> anyhow::Result<()> + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Run `hook` on the acquisition thread once the loop has exited.
    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_exit = Some(Box::new(hook));
        self
    }

    /// Shared handle to the register this acquirer writes.
    pub fn register(&self) -> LatestValues {
        self.register.clone()
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Read-only state view, used by the sampler.
    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    pub fn stats(&self) -> AcquirerStats {
        self.counters.snapshot()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            signal: self.stop.clone(),
        }
    }

    /// Request a stop. Non-blocking.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Spawn the acquisition thread. Non-blocking.
    pub fn start(&mut self) -> Result<()> {
        if !self.state.begin() {
            return Err(Error::InvalidState {
                action: "start acquirer",
                state: self.state.get(),
            });
        }
        let Some(source) = self.source.take() else {
            self.state.finish();
            return Err(Error::InvalidState {
                action: "start acquirer",
                state: RunState::Stopped,
            });
        };

        let worker = Worker {
            source,
            register: self.register.clone(),
            marker: self.marker.clone(),
            options: self.options,
            callback: self.callback.take(),
            stop: self.stop.clone(),
            counters: Arc::clone(&self.counters),
        };
        let exit_guard = ExitGuard::new(self.state.clone(), self.on_exit.take());

        let spawned = thread::Builder::new()
            .name("sensorlog-acquirer".into())
            .spawn(move || {
                // Dropped in reverse order: source closed, then hook and state.
                let _exit = exit_guard;
                let mut worker = worker;
                tracing::info!(marker = %worker.marker, "Acquirer started");
                worker.run()
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.state.finish();
                Err(Error::Spawn {
                    name: "acquirer",
                    source,
                })
            }
        }
    }

    /// Wait for the acquisition thread to exit.
    pub fn join(&mut self) -> Result<AcquirerExit> {
        let Some(handle) = self.handle.take() else {
            return Err(Error::InvalidState {
                action: "join acquirer",
                state: self.state.get(),
            });
        };
        handle.join().map_err(|_| Error::Panicked("acquirer"))
    }
}

impl Drop for Acquirer {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// State moved onto the acquisition thread.
struct Worker {
    source: Box<dyn LineSource>,
    register: LatestValues,
    marker: String,
    options: ParseOptions,
    callback: Option<SampleCallback>,
    stop: StopSignal,
    counters: Arc<Counters>,
}

impl Worker {
    fn run(&mut self) -> AcquirerExit {
        let exit = loop {
            if self.stop.is_stopped() {
                break AcquirerExit::Stopped;
            }
            match self.source.read_line() {
                Ok(Some(line)) => {
                    self.counters.lines_read.fetch_add(1, Ordering::Relaxed);
                    self.handle_line(&line);
                }
                Ok(None) => {
                    tracing::info!("Line source closed by peer");
                    break AcquirerExit::PeerClosed;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Line source read failed");
                    break AcquirerExit::Failed(e.to_string());
                }
            }
        };

        let stats = self.counters.snapshot();
        tracing::info!(
            lines_read = stats.lines_read,
            samples_accepted = stats.samples_accepted,
            lines_ignored = stats.lines_ignored,
            "Acquirer stopped"
        );
        exit
    }

    fn handle_line(&mut self, line: &str) {
        if !is_marked(line, &self.marker) {
            self.counters.lines_ignored.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(line, "Ignoring unmarked line");
            return;
        }
        let Some(sample) = parse_sample(line, self.options) else {
            self.counters.lines_ignored.fetch_add(1, Ordering::Relaxed);
            return;
        };

        self.register.set(&sample.label, sample.value);
        self.counters.samples_accepted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(label = %sample.label, value = sample.value, "Sample");

        let Some(callback) = self.callback.as_mut() else {
            return;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| callback(&sample.label, sample.value))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.counters.callback_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(label = %sample.label, error = %e, "Sample callback failed");
            }
            Err(_) => {
                self.counters.callback_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(label = %sample.label, "Sample callback panicked");
            }
        }
    }
}

impl Drop for Worker {
    // Runs on every exit path of the thread, including unwinding.
    fn drop(&mut self) {
        if let Err(e) = self.source.close() {
            tracing::warn!(error = %e, "Failed to close line source");
        }
    }
}
