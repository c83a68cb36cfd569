//! Temporal partitioning and sequence windows

use crate::error::{ForecastError, Result};
use crate::preprocessing::{column_f64, column_i64, TIMESTAMP_COLUMNS};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use polars::prelude::*;
use tracing::{debug, info};

/// Train, validation and latest blocks of a sorted frame
#[derive(Debug, Clone)]
pub struct TemporalSplit {
    /// Everything before the validation block
    pub train: DataFrame,
    /// Last L + H rows
    pub validation: DataFrame,
    /// Last L rows, the input for the next forecast
    pub latest: DataFrame,
}

/// Sort ascending on (year, month, day, hour) and drop duplicate keys,
/// keeping the first occurrence.
pub fn sort_chronologically(df: &DataFrame) -> Result<DataFrame> {
    let keys: Vec<Vec<i64>> = TIMESTAMP_COLUMNS
        .iter()
        .map(|name| column_i64(df, name))
        .collect::<Result<_>>()?;
    let key = |row: usize| (keys[0][row], keys[1][row], keys[2][row], keys[3][row]);

    // stable sort keeps the earliest duplicate first
    let mut order: Vec<usize> = (0..df.height()).collect();
    order.sort_by_key(|&row| key(row));
    order.dedup_by_key(|row| key(*row));

    let n_duplicates = df.height() - order.len();
    if n_duplicates > 0 {
        debug!(n_duplicates, "Dropped duplicate timestamps");
    }

    let idx = IdxCa::from_vec(
        "idx".into(),
        order.into_iter().map(|row| row as IdxSize).collect(),
    );
    Ok(df.take(&idx)?)
}

/// Partition a sorted frame into train / validation / latest.
///
/// Validation is the last `seq_len + horizon` rows, train is everything
/// before it, and latest is the last `seq_len` rows.
pub fn split_windows(df: &DataFrame, seq_len: usize, horizon: usize) -> Result<TemporalSplit> {
    if seq_len == 0 || horizon == 0 {
        return Err(ForecastError::InvalidParameter {
            name: "seq_len/horizon".to_string(),
            value: format!("{}/{}", seq_len, horizon),
            reason: "must be positive".to_string(),
        });
    }

    let n = df.height();
    let needed = seq_len + horizon;
    if n < needed {
        return Err(ForecastError::DataError(format!(
            "need at least {} rows for seq_len {} and horizon {}, got {}",
            needed, seq_len, horizon, n
        )));
    }

    let split = TemporalSplit {
        train: df.slice(0, n - needed),
        validation: df.slice((n - needed) as i64, needed),
        latest: df.slice((n - seq_len) as i64, seq_len),
    };
    info!(
        train = split.train.height(),
        validation = split.validation.height(),
        latest = split.latest.height(),
        "Temporal split"
    );
    Ok(split)
}

/// Add a one-step-ahead label and drop the last row, which has none
pub fn add_shifted_target(df: &DataFrame, target: &str, label: &str) -> Result<DataFrame> {
    let values = column_f64(df, target)?;
    if values.len() < 2 {
        return Err(ForecastError::DataError(format!(
            "cannot shift '{}' with {} rows",
            target,
            values.len()
        )));
    }

    let n = values.len() - 1;
    let shifted: Vec<Option<f64>> = values[1..].to_vec();
    let mut result = df.slice(0, n);
    result.with_column(Series::new(label.into(), shifted))?;
    Ok(result)
}

/// Extract named columns into a row-major matrix, nulls as zero
pub fn columns_to_array2(df: &DataFrame, col_names: &[String]) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let n_cols = col_names.len();

    let col_data: Vec<Vec<f64>> = col_names
        .iter()
        .map(|col_name| {
            Ok(column_f64(df, col_name)?
                .into_iter()
                .map(|v| v.filter(|x| x.is_finite()).unwrap_or(0.0))
                .collect())
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
    Ok(Array2::from_shape_fn((n_rows, n_cols), |(r, c)| col_refs[c][r]))
}

/// Stride-1 input/label windows over a feature matrix
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    features: Array2<f64>,
    target: Array1<f64>,
    seq_len: usize,
    horizon: usize,
}

impl SequenceDataset {
    /// Wrap aligned features and target.
    ///
    /// A block shorter than `seq_len + horizon` yields zero windows.
    pub fn from_arrays(
        features: Array2<f64>,
        target: Array1<f64>,
        seq_len: usize,
        horizon: usize,
    ) -> Result<Self> {
        if features.nrows() != target.len() {
            return Err(ForecastError::ShapeError {
                expected: format!("{} target values", features.nrows()),
                actual: target.len().to_string(),
            });
        }
        if seq_len == 0 || horizon == 0 {
            return Err(ForecastError::InvalidParameter {
                name: "seq_len/horizon".to_string(),
                value: format!("{}/{}", seq_len, horizon),
                reason: "must be positive".to_string(),
            });
        }
        Ok(Self {
            features,
            target,
            seq_len,
            horizon,
        })
    }

    /// Number of windows, max(0, N - L - H + 1)
    pub fn len(&self) -> usize {
        (self.target.len() + 1).saturating_sub(self.seq_len + self.horizon)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn target(&self) -> &Array1<f64> {
        &self.target
    }

    /// Input rows i..i+L and targets i+L..i+L+H
    pub fn sample(&self, i: usize) -> Option<(ArrayView2<'_, f64>, ArrayView1<'_, f64>)> {
        if i >= self.len() {
            return None;
        }
        let inputs = self.features.slice(s![i..i + self.seq_len, ..]);
        let labels = self
            .target
            .slice(s![i + self.seq_len..i + self.seq_len + self.horizon]);
        Some((inputs, labels))
    }
}
