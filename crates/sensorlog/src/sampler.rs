// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sampler - periodic snapshot of the register into a sink.
//!
//! Each tick takes one timestamp and one snapshot, then drives the sink
//! through `begin`, one `store` per label and `commit`. A failed cycle is
//! logged and counted; the next tick proceeds normally.

use crate::error::{Error, Result};
use crate::lifecycle::{ExitGuard, ExitHook, RunState, RunStatus, StateCell, StopSignal};
use crate::register::LatestValues;
use crate::sink::{run_cycle, Sink};
use chrono::Utc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sampler statistics, returned by [`Sampler::join`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Cycles committed.
    pub cycles_ok: u64,
    /// Cycles lost to a sink error.
    pub cycles_failed: u64,
    /// Most recent sink error.
    pub last_error: Option<String>,
}

/// Fixed-interval sampling loop on a dedicated thread.
pub struct Sampler {
    register: LatestValues,
    acquirer: RunStatus,
    interval: Duration,
    on_exit: Option<ExitHook>,
    state: StateCell,
    stop: StopSignal,
    handle: Option<JoinHandle<SamplerStats>>,
}

impl Sampler {
    /// Sample `register` every `interval` for as long as `acquirer` runs.
    pub fn new(register: LatestValues, acquirer: RunStatus, interval: Duration) -> Self {
        Self {
            register,
            acquirer,
            interval,
            on_exit: None,
            state: StateCell::new(),
            stop: StopSignal::new(),
            handle: None,
        }
    }

    /// Run `hook` on the sampling thread once the loop has exited.
    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_exit = Some(Box::new(hook));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Request a stop. Wakes the loop if it is waiting for the next tick.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Set up `sink` on the calling thread, then spawn the sampling thread.
    ///
    /// A setup failure is returned as is and leaves the sampler stopped.
    pub fn start<S: Sink + 'static>(&mut self, mut sink: S) -> Result<()> {
        if !self.state.begin() {
            return Err(Error::InvalidState {
                action: "start sampler",
                state: self.state.get(),
            });
        }

        if let Err(e) = sink.setup() {
            self.state.finish();
            tracing::error!(sink = sink.name(), error = %e, "Sink setup failed");
            return Err(e.into());
        }

        let worker = Worker {
            sink: SinkGuard { sink },
            register: self.register.clone(),
            acquirer: self.acquirer.clone(),
            interval: self.interval,
            stop: self.stop.clone(),
        };
        let exit_guard = ExitGuard::new(self.state.clone(), self.on_exit.take());

        let spawned = thread::Builder::new()
            .name("sensorlog-sampler".into())
            .spawn(move || {
                // Dropped in reverse order: sink torn down, then hook and state.
                let _exit = exit_guard;
                let mut worker = worker;
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
                    name: "sampler",
                    source,
                })
            }
        }
    }

    /// Wait for the sampling thread to exit.
    pub fn join(&mut self) -> Result<SamplerStats> {
        let Some(handle) = self.handle.take() else {
            return Err(Error::InvalidState {
                action: "join sampler",
                state: self.state.get(),
            });
        };
        handle.join().map_err(|_| Error::Panicked("sampler"))
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Owns the sink on the sampling thread; tears it down exactly once.
struct SinkGuard<S: Sink> {
    sink: S,
}

impl<S: Sink> Drop for SinkGuard<S> {
    fn drop(&mut self) {
        match self.sink.teardown() {
            Ok(()) => tracing::debug!(sink = self.sink.name(), "Sink torn down"),
            Err(e) => tracing::warn!(sink = self.sink.name(), error = %e, "Sink teardown failed"),
        }
    }
}

struct Worker<S: Sink> {
    sink: SinkGuard<S>,
    register: LatestValues,
    acquirer: RunStatus,
    interval: Duration,
    stop: StopSignal,
}

impl<S: Sink> Worker<S> {
    fn run(&mut self) -> SamplerStats {
        let mut stats = SamplerStats::default();
        tracing::info!(
            sink = self.sink.sink.name(),
            interval_secs = self.interval.as_secs_f64(),
            "Sampler started"
        );

        loop {
            if self.stop.wait_timeout(self.interval) {
                tracing::debug!("Sampler stop requested");
                break;
            }
            if !self.acquirer.is_running() {
                tracing::info!(acquirer = %self.acquirer.get(), "Acquirer not running, sampler exiting");
                break;
            }

            let timestamp = Utc::now();
            let snapshot = self.register.snapshot();
            match run_cycle(&mut self.sink.sink, timestamp, &snapshot) {
                Ok(()) => {
                    stats.cycles_ok += 1;
                    tracing::debug!(entries = snapshot.len(), "Cycle committed");
                }
                Err(e) => {
                    stats.cycles_failed += 1;
                    tracing::warn!(
                        sink = self.sink.sink.name(),
                        entries = snapshot.len(),
                        error = %e,
                        "Cycle lost"
                    );
                    stats.last_error = Some(e.to_string());
                }
            }
        }

        tracing::info!(
            cycles_ok = stats.cycles_ok,
            cycles_failed = stats.cycles_failed,
            "Sampler stopped"
        );
        stats
    }
}
