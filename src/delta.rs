//! Absolute change of a metric between successive poll cycles.
//!
//! Each key is `Unseen` until its first observation and `Seen` afterwards.
//! Owned by the poll task, so no locking.

use std::collections::{HashMap, HashSet};

use crate::types::MetricKey;

/// Result of one [`DeltaTracker::observe`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// `|new - previous|`, or 0 on the first observation.
    pub delta: f64,
    pub first: bool,
}

#[derive(Debug, Default)]
pub struct DeltaTracker {
    last: HashMap<MetricKey, f64>,
}

impl DeltaTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `key` and return the change from the previous value.
    pub fn observe(&mut self, key: MetricKey, value: f64) -> Observation {
        match self.last.insert(key, value) {
            Some(prev) => Observation {
                delta: (value - prev).abs(),
                first: false,
            },
            None => Observation {
                delta: 0.0,
                first: true,
            },
        }
    }

    /// Drop every key not in `live`. Returns the number of keys removed.
    pub fn prune(&mut self, live: &HashSet<MetricKey>) -> usize {
        let before = self.last.len();
        self.last.retain(|k, _| live.contains(k));
        before - self.last.len()
    }

    #[must_use]
    pub fn previous(&self, key: &MetricKey) -> Option<f64> {
        self.last.get(key).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.last.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
