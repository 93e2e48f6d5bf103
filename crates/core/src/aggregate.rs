use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Lifecycle of an aggregate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WindowState {
    Open,
    Closed,
}

/// Rolling aggregate for one key over `[window_start, window_end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateWindow {
    pub window_key: String,
    pub window_start: i64,
    pub window_end: i64,
    pub count: i64,
    pub sum: f64,
    pub distinct_keys: BTreeSet<String>,
    pub last_update: i64,
    pub state: WindowState,
}

impl AggregateWindow {
    /// An empty open window. `last_update` starts at `window_start`.
    pub fn open(window_key: impl Into<String>, window_start: i64, window_end: i64) -> Self {
        Self {
            window_key: window_key.into(),
            window_start,
            window_end,
            count: 0,
            sum: 0.0,
            distinct_keys: BTreeSet::new(),
            last_update: window_start,
            state: WindowState::Open,
        }
    }

    /// Apply one event to the window.
    pub fn apply(&mut self, timestamp: i64, value: f64, source_key: &str) {
        self.count += 1;
        self.sum += value;
        self.distinct_keys.insert(source_key.to_string());
        self.last_update = self.last_update.max(timestamp);
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.window_start && timestamp < self.window_end
    }

    pub fn overlaps(&self, from: i64, to: i64) -> bool {
        self.window_start < to && from < self.window_end
    }

    pub fn is_open(&self) -> bool {
        self.state == WindowState::Open
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}
