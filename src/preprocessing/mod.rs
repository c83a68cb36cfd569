//! Feature engineering for hourly weather observations
//!
//! Provides:
//! - Statistical feature selection (Spearman, redundancy, Kruskal-Wallis)
//! - Stateless feature transformation (imputation, clamping, calendar,
//!   cyclical and composite features, change rates)
//! - Categorical encoding with a frozen output schema
//! - Robust scaling fitted on the training block

mod config;
mod encoder;
mod scaler;
pub mod feature_selection;
pub mod stats;
pub mod transforms;

pub use config::{FeatureConfig, TIMESTAMP_COLUMNS};
pub use encoder::{ColumnEncoding, Encoder, FittedSchema, UNSEEN_CODE};
pub use scaler::{RobustScaler, ScalerParams};
pub use feature_selection::{DropDecision, DropReason, FeatureSelector, SelectionReport};
pub use transforms::FeatureTransformer;

use crate::error::{ForecastError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Column data type as seen by the feature pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Numeric,
    Categorical,
    Unknown,
}

impl ColumnType {
    /// Classify a polars data type
    pub fn of(dtype: &DataType) -> Self {
        match dtype {
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 |
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 |
            DataType::Float32 | DataType::Float64 => ColumnType::Numeric,
            DataType::String | DataType::Categorical(_, _) => ColumnType::Categorical,
            _ => ColumnType::Unknown,
        }
    }
}

/// Names of all numeric columns, in frame order
pub fn numeric_columns(df: &DataFrame) -> Vec<String> {
    columns_of_type(df, ColumnType::Numeric)
}

/// Names of all string or categorical columns, in frame order
pub fn categorical_columns(df: &DataFrame) -> Vec<String> {
    columns_of_type(df, ColumnType::Categorical)
}

fn columns_of_type(df: &DataFrame, wanted: ColumnType) -> Vec<String> {
    df.get_columns()
        .iter()
        .filter(|c| ColumnType::of(c.dtype()) == wanted)
        .map(|c| c.name().to_string())
        .collect()
}

/// Read a column as nullable f64 values
pub(crate) fn column_f64(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .map_err(|_| ForecastError::FeatureNotFound(name.to_string()))?;
    let casted = column.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

/// Read a column as nullable strings
pub(crate) fn column_str(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df
        .column(name)
        .map_err(|_| ForecastError::FeatureNotFound(name.to_string()))?;
    let casted = column.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

/// Read an integer-valued column (timestamp fields)
pub(crate) fn column_i64(df: &DataFrame, name: &str) -> Result<Vec<i64>> {
    let column = df
        .column(name)
        .map_err(|_| ForecastError::FeatureNotFound(name.to_string()))?;
    let casted = column.cast(&DataType::Int64)?;
    casted
        .i64()?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| {
                ForecastError::DataError(format!("null value in '{}' at row {}", name, row))
            })
        })
        .collect()
}
