// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device line protocol.
//!
//! Records look like:
//!
//! ```text
//! DATA    temperature raw=153 volt=0.75 value=24.70
//! ```
//!
//! The first token is a line-type marker, the second the sensor label, and
//! the payload travels in the `value=` pair. Everything else is metadata.

use serde::{Deserialize, Serialize};

/// Default line-type marker for data records.
pub const DATA_MARKER: &str = "DATA";

/// Key carrying the reading in a data record.
const VALUE_KEY: &str = "value";

/// One labeled reading extracted from a data record.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub label: String,
    pub value: f64,
}

impl Sample {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Parser behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Record readings that are exactly `0.0`.
    ///
    /// Off by default: historically only non-zero readings were recorded, so
    /// a real `0.0` is dropped unless this is set.
    pub keep_zero: bool,
}

impl ParseOptions {
    pub fn keep_zero(mut self, keep: bool) -> Self {
        self.keep_zero = keep;
        self
    }
}

/// Check whether the first whitespace-delimited token of `line` is `marker`.
pub fn is_marked(line: &str, marker: &str) -> bool {
    line.split_whitespace().next() == Some(marker)
}

/// Parse a data record into a sample.
///
/// Returns `None` for short lines, lines without a usable `value=` pair and,
/// unless [`ParseOptions::keep_zero`] is set, zero readings. Malformed pairs
/// are reported and skipped; they never abort the line.
pub fn parse_sample(line: &str, options: ParseOptions) -> Option<Sample> {
    let mut tokens = line.split_whitespace();
    let _marker = tokens.next()?;
    let label = tokens.next()?;

    let mut value = None;
    for token in tokens {
        let Some((key, raw)) = token.split_once('=') else {
            continue;
        };
        if raw.contains('=') {
            tracing::warn!(label, token, "Invalid value");
            continue;
        }
        if key != VALUE_KEY {
            continue;
        }
        match raw.parse::<f64>() {
            Ok(v) => value = Some(v),
            Err(_) => tracing::warn!(label, token, "Invalid value"),
        }
    }

    let value = value?;
    if value == 0.0 && !options.keep_zero {
        tracing::debug!(label, "Dropping zero reading");
        return None;
    }

    Some(Sample::new(label, value))
}
