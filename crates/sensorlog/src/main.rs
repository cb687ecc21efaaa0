// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sensorlog CLI
//!
//! Record sensor readings from a serial device.
//!
//! # Usage
//!
//! ```bash
//! # Round-robin archive, one row per minute
//! sensorlog /dev/ttyACM0 /var/lib/sensorlog/sensors.rrd
//!
//! # CSV every 10 seconds
//! sensorlog --csv -i 10 /dev/ttyUSB0 readings.csv
//!
//! # Replay a capture from stdin into SQLite
//! sensorlog --sqlite - events.db < capture.txt
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use sensorlog::{
    create_sink, open_device, InterruptHandle, LoggerConfig, LoggerConfigBuilder, Pipeline,
    SinkKind,
};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "sensorlog")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Record sensor readings from a serial device into CSV, SQLite or a round-robin archive")]
#[command(long_about = None)]
struct Cli {
    /// Serial device (use - for stdin)
    device: Option<String>,

    /// Output file
    destination: Option<PathBuf>,

    /// Sample interval in seconds [default: 60]
    #[arg(short, long)]
    interval: Option<u64>,

    /// Store as CSV
    #[arg(long, conflicts_with = "sqlite")]
    csv: bool,

    /// Store as SQLite
    #[arg(long)]
    sqlite: bool,

    /// Serial baud rate [default: 9600]
    #[arg(long)]
    baud: Option<u32>,

    /// Line marker of data records [default: DATA]
    #[arg(long)]
    marker: Option<String>,

    /// Record readings of exactly 0.0
    #[arg(long)]
    keep_zero: bool,

    /// YAML configuration file (command-line flags take precedence)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose mode (debug logs)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("sensorlog=debug")
        } else {
            EnvFilter::new("sensorlog=info")
        }
    });
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&cli)?;
    config.validate().context("Invalid configuration")?;

    let source = open_device(&config.device, config.baud)
        .with_context(|| format!("Failed to open device {}", config.device))?;
    let sink = create_sink(&config);

    let pipeline = Pipeline::new(config);
    ctrlc_handler(pipeline.interrupt_handle())?;

    let report = pipeline.run(source, sink).context("Logger failed")?;
    tracing::info!(
        cause = ?report.cause,
        exit = ?report.acquirer,
        "Logger shutdown complete"
    );
    Ok(())
}

fn build_config(cli: &Cli) -> Result<LoggerConfig> {
    let base = match &cli.config {
        Some(path) => LoggerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => LoggerConfig::default(),
    };

    let mut builder = LoggerConfigBuilder::from_config(base);
    if let Some(device) = &cli.device {
        builder = builder.device(device.clone());
    }
    if let Some(destination) = &cli.destination {
        builder = builder.destination(destination.clone());
    }
    if let Some(interval) = cli.interval {
        builder = builder.interval(interval);
    }
    if cli.csv {
        builder = builder.sink(SinkKind::Csv);
    } else if cli.sqlite {
        builder = builder.sink(SinkKind::Sqlite);
    }
    if let Some(baud) = cli.baud {
        builder = builder.baud(baud);
    }
    if let Some(marker) = &cli.marker {
        builder = builder.marker(marker.clone());
    }
    if cli.keep_zero {
        builder = builder.keep_zero(true);
    }
    Ok(builder.build())
}

/// Setup Ctrl+C / SIGTERM handler.
fn ctrlc_handler(handle: InterruptHandle) -> Result<()> {
    ctrlc::set_handler(move || {
        tracing::info!("Received interrupt, shutting down...");
        handle.interrupt();
    })
    .context("Failed to install signal handler")
}
