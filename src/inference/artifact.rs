//! Self-contained model bundle for serving

use crate::error::{ForecastError, Result};
use crate::preprocessing::{FittedSchema, RobustScaler};
use crate::timeseries::columns_to_array2;
use crate::training::TrainedModel;
use chrono::{DateTime, Utc};
use ndarray::{s, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Everything needed to turn the latest observations into a forecast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: TrainedModel,
    pub schema: FittedSchema,
    pub scaler: Option<RobustScaler>,
    /// Forecast column, e.g. `Temperature`
    pub target: String,
    /// Shifted-target column excluded from the features
    pub label: String,
    pub seq_len: usize,
    pub horizon: usize,
    pub created_at: DateTime<Utc>,
}

impl ModelArtifact {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ForecastError::DataError(format!(
                "model artifact {} does not exist",
                path.display()
            )));
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Scale and encode raw rows into the model's input window.
    ///
    /// Sequence models get exactly the last `seq_len` rows.
    pub fn prepare_window(&self, latest: &DataFrame) -> Result<Array2<f64>> {
        let features = if latest.get_column_names().iter().any(|c| c.as_str() == self.label) {
            latest.drop(&self.label)?
        } else {
            latest.clone()
        };
        let scaled = match &self.scaler {
            Some(scaler) => scaler.transform(&features)?,
            None => features,
        };
        let encoded = self.schema.apply(&scaled)?;
        let x = columns_to_array2(&encoded, self.schema.output_columns())?;

        if !self.model.is_sequence() {
            return Ok(x);
        }
        if x.nrows() < self.seq_len {
            return Err(ForecastError::ShapeError {
                expected: format!("at least {} rows", self.seq_len),
                actual: format!("{} rows", x.nrows()),
            });
        }
        let start = x.nrows() - self.seq_len;
        Ok(x.slice(s![start.., ..]).to_owned())
    }
}
