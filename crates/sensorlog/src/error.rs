// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.

use crate::lifecycle::RunState;
use crate::sink::SinkError;
use thiserror::Error;

/// Errors surfaced by the pipeline and its worker units.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: RunState,
    },

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Line source failed: {0}")]
    Transport(String),

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
