//! Categorical encoding with a frozen output schema
//!
//! `Encoder::fit` inspects the training frame and returns a `FittedSchema`.
//! The schema is an immutable value: it is threaded into every `apply` call
//! and persisted next to the model artifact.

use super::config::FeatureConfig;
use super::{column_f64, column_str, ColumnType};
use crate::error::{ForecastError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info, warn};

/// Code assigned to a label-encoded value not seen during fitting
pub const UNSEEN_CODE: f64 = -1.0;

/// How one input column is turned into output columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnEncoding {
    /// Numeric passthrough, cast to f64
    Numeric,
    /// Sorted training categories mapped to 0..n-1
    Label { categories: Vec<String> },
    /// One indicator column per sorted training category
    OneHot { categories: Vec<String> },
}

impl ColumnEncoding {
    fn output_names(&self, column: &str) -> Vec<String> {
        match self {
            ColumnEncoding::Numeric | ColumnEncoding::Label { .. } => vec![column.to_string()],
            ColumnEncoding::OneHot { categories } => categories
                .iter()
                .map(|c| format!("{}_{}", column, c))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedColumn {
    name: String,
    encoding: ColumnEncoding,
}

/// Frozen column list and per-column encodings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FittedSchema {
    columns: Vec<FittedColumn>,
    output_columns: Vec<String>,
    is_fitted: bool,
}

impl FittedSchema {
    /// Output column names, in order
    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    /// Input column names the schema was fitted on, in order
    pub fn input_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Encoding chosen for an input column
    pub fn encoding(&self, column: &str) -> Option<&ColumnEncoding> {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| &c.encoding)
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    /// Check that a frame carries exactly the fitted input columns
    pub fn validate(&self, df: &DataFrame) -> Result<()> {
        if !self.is_fitted {
            return Err(ForecastError::ModelNotFitted);
        }
        let expected: BTreeSet<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let actual: BTreeSet<&str> = df.get_column_names().into_iter().map(|n| n.as_str()).collect();

        let missing: Vec<String> = expected.difference(&actual).map(|s| s.to_string()).collect();
        let unexpected: Vec<String> = actual.difference(&expected).map(|s| s.to_string()).collect();
        if missing.is_empty() && unexpected.is_empty() {
            Ok(())
        } else {
            Err(ForecastError::SchemaError { missing, unexpected })
        }
    }

    /// Encode a frame into exactly `output_columns`, all Float64.
    ///
    /// Missing input columns are zero-filled and extra columns are dropped.
    /// Unknown or null categories map to `UNSEEN_CODE` (label) or an
    /// all-zero row (one-hot).
    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(ForecastError::ModelNotFitted);
        }

        let n_rows = df.height();
        let mut columns: Vec<Column> = Vec::with_capacity(self.output_columns.len());

        for fitted in &self.columns {
            let present = df.column(&fitted.name).is_ok();
            if !present {
                debug!(column = %fitted.name, "Zero-filling missing column");
                for name in fitted.encoding.output_names(&fitted.name) {
                    columns.push(Series::new(name.into(), vec![0.0f64; n_rows]).into());
                }
                continue;
            }

            match &fitted.encoding {
                ColumnEncoding::Numeric => {
                    let values = column_f64(df, &fitted.name)?;
                    columns.push(Series::new(fitted.name.as_str().into(), values).into());
                }
                ColumnEncoding::Label { categories } => {
                    let codes: Vec<f64> = column_str(df, &fitted.name)?
                        .iter()
                        .map(|v| label_code(categories, v.as_deref()))
                        .collect();
                    columns.push(Series::new(fitted.name.as_str().into(), codes).into());
                }
                ColumnEncoding::OneHot { categories } => {
                    let levels = column_str(df, &fitted.name)?;
                    for category in categories {
                        let indicator: Vec<f64> = levels
                            .iter()
                            .map(|v| if v.as_deref() == Some(category.as_str()) { 1.0 } else { 0.0 })
                            .collect();
                        let name = format!("{}_{}", fitted.name, category);
                        columns.push(Series::new(name.into(), indicator).into());
                    }
                }
            }
        }

        Ok(DataFrame::new(columns)?)
    }

    /// Persist as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load a persisted schema
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

fn label_code(categories: &[String], value: Option<&str>) -> f64 {
    value
        .and_then(|v| categories.binary_search_by(|c| c.as_str().cmp(v)).ok())
        .map(|idx| idx as f64)
        .unwrap_or(UNSEEN_CODE)
}

/// Fits a `FittedSchema` on the training block
#[derive(Debug, Clone)]
pub struct Encoder {
    max_onehot_categories: usize,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::from_config(&FeatureConfig::default())
    }
}

impl Encoder {
    /// Create an encoder with the given one-hot cardinality limit
    pub fn new(max_onehot_categories: usize) -> Self {
        Self { max_onehot_categories }
    }

    pub fn from_config(config: &FeatureConfig) -> Self {
        Self::new(config.max_onehot_categories)
    }

    /// Route every column of `train` and freeze the output schema
    pub fn fit(&self, train: &DataFrame) -> Result<FittedSchema> {
        let mut columns = Vec::with_capacity(train.width());

        for column in train.get_columns() {
            let name = column.name().to_string();
            let encoding = match ColumnType::of(column.dtype()) {
                ColumnType::Numeric => ColumnEncoding::Numeric,
                ColumnType::Categorical => {
                    let categories: Vec<String> = column_str(train, &name)?
                        .into_iter()
                        .flatten()
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    if categories.len() <= self.max_onehot_categories {
                        ColumnEncoding::OneHot { categories }
                    } else {
                        ColumnEncoding::Label { categories }
                    }
                }
                ColumnType::Unknown => {
                    warn!(column = %name, dtype = ?column.dtype(), "Skipping column with unsupported type");
                    continue;
                }
            };
            columns.push(FittedColumn { name, encoding });
        }

        let output_columns: Vec<String> = columns
            .iter()
            .flat_map(|c| c.encoding.output_names(&c.name))
            .collect();

        info!(
            inputs = columns.len(),
            outputs = output_columns.len(),
            "Encoder fitted"
        );

        Ok(FittedSchema {
            columns,
            output_columns,
            is_fitted: true,
        })
    }
}
