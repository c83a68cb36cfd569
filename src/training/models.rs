//! Trained model container and evaluation metrics

use crate::error::{ForecastError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::config::CandidateKind;
use super::extra_trees::ExtraTrees;
use super::gradient_boosting::GradientBoostingRegressor;
use super::gru::GruRegressor;
use super::hist_gradient_boosting::HistGradientBoostingRegressor;
use super::random_forest::RandomForest;

/// Regression metrics for one candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Error
    pub mae: f64,
    /// R-squared
    pub r2: f64,
    /// Number of evaluated predictions
    pub n_samples: usize,
    /// Training time in seconds
    pub training_time_secs: f64,
}

impl ModelMetrics {
    /// Compute regression metrics over paired values
    pub fn compute_regression<'a>(
        y_true: impl IntoIterator<Item = &'a f64>,
        y_pred: impl IntoIterator<Item = &'a f64>,
    ) -> Self {
        let pairs: Vec<(f64, f64)> = y_true.into_iter().copied().zip(y_pred.into_iter().copied()).collect();
        let n = pairs.len();
        if n == 0 {
            return Self {
                rmse: f64::NAN,
                mae: f64::NAN,
                r2: f64::NAN,
                ..Self::default()
            };
        }

        let nf = n as f64;
        let mse = pairs.iter().map(|(t, p)| (t - p).powi(2)).sum::<f64>() / nf;
        let mae = pairs.iter().map(|(t, p)| (t - p).abs()).sum::<f64>() / nf;

        let y_mean = pairs.iter().map(|(t, _)| t).sum::<f64>() / nf;
        let ss_tot: f64 = pairs.iter().map(|(t, _)| (t - y_mean).powi(2)).sum();
        let ss_res = mse * nf;

        Self {
            rmse: mse.sqrt(),
            mae,
            r2: if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 },
            n_samples: n,
            training_time_secs: 0.0,
        }
    }

    /// Metric lookup by name, as recorded by experiment tracking
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "rmse" => Some(self.rmse),
            "mae" => Some(self.mae),
            "r2" => Some(self.r2),
            "training_time_secs" => Some(self.training_time_secs),
            _ => None,
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        [
            ("rmse", self.rmse),
            ("mae", self.mae),
            ("r2", self.r2),
            ("training_time_secs", self.training_time_secs),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

/// A fitted candidate of any family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedModel {
    GradientBoosting(GradientBoostingRegressor),
    RandomForest(RandomForest),
    ExtraTrees(ExtraTrees),
    HistGradientBoosting(HistGradientBoostingRegressor),
    Gru(GruRegressor),
}

impl TrainedModel {
    pub fn kind(&self) -> CandidateKind {
        match self {
            TrainedModel::GradientBoosting(_) => CandidateKind::GradientBoosting,
            TrainedModel::RandomForest(_) => CandidateKind::RandomForest,
            TrainedModel::ExtraTrees(_) => CandidateKind::ExtraTrees,
            TrainedModel::HistGradientBoosting(_) => CandidateKind::HistGradientBoosting,
            TrainedModel::Gru(_) => CandidateKind::Gru,
        }
    }

    pub fn is_sequence(&self) -> bool {
        self.kind().is_sequence()
    }

    /// Row-wise predictions of a tabular model
    pub fn predict_rows(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            TrainedModel::GradientBoosting(m) => m.predict(x),
            TrainedModel::RandomForest(m) => m.predict(x),
            TrainedModel::ExtraTrees(m) => m.predict(x),
            TrainedModel::HistGradientBoosting(m) => m.predict(x),
            TrainedModel::Gru(_) => Err(ForecastError::InferenceError(
                "sequence model needs a full input window".to_string(),
            )),
        }
    }

    /// Forecast from an input window.
    ///
    /// A sequence model returns its full horizon. A tabular model returns one
    /// value, predicted from the last row of the window.
    pub fn forecast(&self, window: ArrayView2<f64>) -> Result<Vec<f64>> {
        if let TrainedModel::Gru(m) = self {
            return Ok(m.predict_window(window)?.to_vec());
        }
        let n_rows = window.nrows();
        if n_rows == 0 {
            return Err(ForecastError::ShapeError {
                expected: "at least one row".to_string(),
                actual: "0 rows".to_string(),
            });
        }
        let last = window.row(n_rows - 1).insert_axis(Axis(0)).to_owned();
        Ok(self.predict_rows(&last)?.to_vec())
    }

    /// Per-feature importances for the tree ensembles
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        match self {
            TrainedModel::GradientBoosting(m) => Some(Array1::from_vec(m.feature_importances().to_vec())),
            TrainedModel::RandomForest(m) => m.feature_importances().cloned(),
            TrainedModel::ExtraTrees(m) => m.feature_importances().cloned(),
            TrainedModel::HistGradientBoosting(_) | TrainedModel::Gru(_) => None,
        }
    }
}
