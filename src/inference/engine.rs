//! Forecast generation

use super::artifact::ModelArtifact;
use super::clothing::{recommend, Recommendation, Sensitivity};
use crate::error::{ForecastError, Result};
use crate::preprocessing::{column_i64, TIMESTAMP_COLUMNS};
use crate::training::TrainedModel;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use ndarray::ArrayView2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Column holding the forecast values in `Forecast::to_frame`
pub const PREDICTION_COLUMN: &str = "pred_Temperature";

/// Hourly forecast values and their timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub values: Vec<f64>,
    pub timestamps: Vec<NaiveDateTime>,
}

impl Forecast {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Calendar columns, weekday name and the rounded forecast
    pub fn to_frame(&self) -> Result<DataFrame> {
        let ts = &self.timestamps;
        let df = df!(
            "year" => ts.iter().map(|t| t.year()).collect::<Vec<i32>>(),
            "month" => ts.iter().map(|t| t.month() as i32).collect::<Vec<i32>>(),
            "day" => ts.iter().map(|t| t.day() as i32).collect::<Vec<i32>>(),
            "hour" => ts.iter().map(|t| t.hour() as i32).collect::<Vec<i32>>(),
            "day_of_week" => ts.iter().map(|t| t.format("%A").to_string()).collect::<Vec<String>>(),
            PREDICTION_COLUMN => self.values.iter().map(|v| (v * 10.0).round() / 10.0).collect::<Vec<f64>>()
        )?;
        Ok(df)
    }

    /// Clothing advice for every forecast hour
    pub fn recommendations(&self, sensitivity: Sensitivity) -> Vec<(NaiveDateTime, Recommendation)> {
        self.timestamps
            .iter()
            .zip(&self.values)
            .map(|(&t, &v)| (t, recommend(v, sensitivity)))
            .collect()
    }
}

/// Timestamp of the last row of a frame with year/month/day/hour columns
pub fn last_timestamp(df: &DataFrame) -> Result<NaiveDateTime> {
    if df.height() == 0 {
        return Err(ForecastError::DataError("cannot take the timestamp of an empty frame".to_string()));
    }
    let last = df.height() - 1;
    let fields: Vec<i64> = TIMESTAMP_COLUMNS
        .iter()
        .map(|name| column_i64(df, name).map(|values| values[last]))
        .collect::<Result<_>>()?;
    let invalid = || ForecastError::DataError(format!("invalid timestamp {:?} in last row", fields));
    NaiveDate::from_ymd_opt(fields[0] as i32, fields[1] as u32, fields[2] as u32)
        .and_then(|d| d.and_hms_opt(fields[3] as u32, 0, 0))
        .ok_or_else(invalid)
}

/// Serves forecasts from a promoted model artifact
#[derive(Debug, Clone)]
pub struct Forecaster {
    artifact: Arc<ModelArtifact>,
}

impl Forecaster {
    pub fn new(artifact: ModelArtifact) -> Self {
        Self {
            artifact: Arc::new(artifact),
        }
    }

    /// Load an artifact written by `ModelArtifact::save`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let artifact = ModelArtifact::load(path.as_ref())?;
        info!(model = %artifact.model.kind(), path = %path.as_ref().display(), "Loaded model artifact");
        Ok(Self::new(artifact))
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Forecast from a prepared window.
    ///
    /// Timestamps run from `last_timestamp` + 1h, one per value.
    pub fn forecast(
        model: &TrainedModel,
        window: ArrayView2<f64>,
        last_timestamp: NaiveDateTime,
    ) -> Result<Forecast> {
        let start = Instant::now();
        let values = model.forecast(window)?;
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(ForecastError::InferenceError(format!(
                "{} produced a non-finite forecast ({})",
                model.kind(),
                bad
            )));
        }
        let timestamps = (1..=values.len())
            .map(|h| last_timestamp + Duration::hours(h as i64))
            .collect();
        debug!(
            model = %model.kind(),
            steps = values.len(),
            latency_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Forecast generated"
        );
        Ok(Forecast { values, timestamps })
    }

    /// Prepare the latest raw rows and forecast past their last timestamp
    pub fn forecast_latest(&self, latest: &DataFrame) -> Result<Forecast> {
        let window = self.artifact.prepare_window(latest)?;
        let last = last_timestamp(latest)?;
        Self::forecast(&self.artifact.model, window.view(), last)
    }
}
