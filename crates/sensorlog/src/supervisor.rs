// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Supervisor - wires the acquirer and the sampler together.
//!
//! The pipeline runs until the first of: an interrupt, the acquirer exiting
//! (stop, end of stream, read error), or the sampler exiting. It then stops
//! both units and waits for both threads before returning, so the sink is
//! always torn down and the line source always closed.
//!
//! Cancellation is cooperative. A unit blocked in a read or a sink call is
//! only joined once that call returns.

use crate::acquirer::{Acquirer, AcquirerExit, AcquirerStats};
use crate::config::LoggerConfig;
use crate::error::{Error, Result};
use crate::sampler::{Sampler, SamplerStats};
use crate::sink::Sink;
use crate::source::LineSource;
use std::sync::mpsc::{self, Receiver, Sender};

/// What woke the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Interrupted,
    AcquirerExited,
    SamplerExited,
}

/// Requests a graceful shutdown from any thread (e.g. a signal handler).
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Sender<Event>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        let _ = self.tx.send(Event::Interrupted);
    }
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// First event observed.
    pub cause: Event,
    pub acquirer: AcquirerExit,
    pub acquirer_stats: AcquirerStats,
    pub sampler: SamplerStats,
}

/// Acquirer + sampler over one source and one sink.
pub struct Pipeline {
    config: LoggerConfig,
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl Pipeline {
    pub fn new(config: LoggerConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        Self { config, tx, rx }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run until shutdown. Blocks the calling thread.
    ///
    /// Sink setup failures and source read errors are returned as errors;
    /// interrupts and end of stream are a normal exit.
    pub fn run<L, S>(self, source: L, sink: S) -> Result<PipelineReport>
    where
        L: LineSource + 'static,
        S: Sink + 'static,
    {
        self.config.validate()?;

        let acquirer_tx = self.tx.clone();
        let mut acquirer = Acquirer::new(source)
            .marker(self.config.marker.clone())
            .parse_options(self.config.parse_options())
            .on_exit(move || {
                let _ = acquirer_tx.send(Event::AcquirerExited);
            });

        let sampler_tx = self.tx.clone();
        let mut sampler = Sampler::new(
            acquirer.register(),
            acquirer.status(),
            self.config.sampling_interval(),
        )
        .on_exit(move || {
            let _ = sampler_tx.send(Event::SamplerExited);
        });

        tracing::info!(
            device = %self.config.device,
            destination = %self.config.destination.display(),
            sink = %self.config.sink,
            interval_secs = self.config.sample_interval_secs,
            "Starting pipeline"
        );

        // The sink is set up before any line is read.
        sampler.start(sink)?;
        if let Err(e) = acquirer.start() {
            sampler.stop();
            if let Err(join_err) = sampler.join() {
                tracing::warn!(error = %join_err, "Sampler join failed");
            }
            return Err(e);
        }

        // Never disconnected: `self.tx` outlives the loop.
        let cause = self.rx.recv().unwrap_or(Event::Interrupted);
        match cause {
            Event::Interrupted => tracing::info!("Interrupt received, shutting down"),
            Event::AcquirerExited => tracing::info!("Acquirer exited, shutting down"),
            Event::SamplerExited => tracing::warn!("Sampler exited, shutting down"),
        }

        sampler.stop();
        acquirer.stop();

        let sampler_result = sampler.join();
        if !matches!(cause, Event::AcquirerExited) {
            tracing::debug!("Waiting for the line source to yield");
        }
        let acquirer_result = acquirer.join();

        let sampler_stats = sampler_result?;
        let acquirer_exit = acquirer_result?;
        if let AcquirerExit::Failed(reason) = &acquirer_exit {
            return Err(Error::Transport(reason.clone()));
        }

        let report = PipelineReport {
            cause,
            acquirer: acquirer_exit,
            acquirer_stats: acquirer.stats(),
            sampler: sampler_stats,
        };
        tracing::info!(
            samples = report.acquirer_stats.samples_accepted,
            cycles_ok = report.sampler.cycles_ok,
            cycles_failed = report.sampler.cycles_failed,
            "Pipeline stopped"
        );
        Ok(report)
    }
}
