//! Time series module
//!
//! Chronological ordering, temporal train/validation/latest partitioning and
//! fixed-length sequence windows for supervised sequence learning.

mod windowing;

pub use windowing::{
    add_shifted_target, columns_to_array2, sort_chronologically, split_windows, SequenceDataset,
    TemporalSplit,
};

use serde::{Deserialize, Serialize};

/// Column holding the target one hour ahead
pub const SHIFTED_TARGET: &str = "target_temp";

/// Sequence length and forecast horizon, both in hours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Input window length L
    pub seq_len: usize,
    /// Forecast horizon H
    pub horizon: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            seq_len: 336,
            horizon: 168,
        }
    }
}

impl WindowConfig {
    pub fn new(seq_len: usize, horizon: usize) -> Self {
        Self { seq_len, horizon }
    }

    /// Set the input window length
    pub fn with_seq_len(mut self, seq_len: usize) -> Self {
        self.seq_len = seq_len;
        self
    }

    /// Set the forecast horizon
    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    /// Rows held out for validation (L + H)
    pub fn validation_rows(&self) -> usize {
        self.seq_len + self.horizon
    }
}
