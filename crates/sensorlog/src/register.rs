// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Latest-value register shared between acquisition and sampling.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable copy of the register, sorted by label.
pub type Snapshot = Vec<(String, f64)>;

/// Label -> most recent reading.
///
/// Cheap to clone: clones share the same map. Every access takes the inner
/// lock, so a snapshot sees each label either before or after a concurrent
/// `set`, never in between.
#[derive(Debug, Clone, Default)]
pub struct LatestValues {
    inner: Arc<Mutex<BTreeMap<String, f64>>>,
}

impl LatestValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` as the latest reading for `label`, replacing any older one.
    pub fn set(&self, label: &str, value: f64) {
        let mut values = self.inner.lock();
        match values.get_mut(label) {
            Some(slot) => *slot = value,
            None => {
                values.insert(label.to_string(), value);
            }
        }
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.inner.lock().get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copy out every label and value, sorted by label.
    pub fn snapshot(&self) -> Snapshot {
        self.inner
            .lock()
            .iter()
            .map(|(label, value)| (label.clone(), *value))
            .collect()
    }
}
