//! Candidate training and model selection

use super::config::{CandidateKind, SequenceConfig, TrainingConfig};
use super::extra_trees::ExtraTrees;
use super::gradient_boosting::{GradientBoostingConfig, GradientBoostingRegressor};
use super::gru::GruRegressor;
use super::hist_gradient_boosting::{HistGradientBoostingConfig, HistGradientBoostingRegressor};
use super::models::{ModelMetrics, TrainedModel};
use super::random_forest::RandomForest;
use crate::error::{ForecastError, Result};
use crate::preprocessing::{column_f64, FittedSchema};
use crate::timeseries::{columns_to_array2, SequenceDataset, WindowConfig};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::time::Instant;
use tracing::{info, warn};

/// Model inputs derived from the training and validation blocks
#[derive(Debug, Clone)]
pub struct TrainingData {
    /// Encoded feature column names, in matrix column order
    pub feature_columns: Vec<String>,
    pub x_train: Array2<f64>,
    /// Shifted (one hour ahead) target for the training rows
    pub y_train: Array1<f64>,
    pub x_val: Array2<f64>,
    pub y_val: Array1<f64>,
    /// Windows over the training block, labelled with the current target
    pub seq_train: SequenceDataset,
    pub seq_val: SequenceDataset,
}

impl TrainingData {
    /// Encode both blocks with the frozen schema and build model inputs.
    ///
    /// `label` is the shifted-target column; it is excluded from the
    /// features. The validation block must carry exactly the columns the
    /// schema was fitted on.
    pub fn from_frames(
        train: &DataFrame,
        validation: &DataFrame,
        schema: &FittedSchema,
        target: &str,
        label: &str,
        window: WindowConfig,
    ) -> Result<Self> {
        let y_train = label_values(train, label)?;
        let y_val = label_values(validation, label)?;
        check_target(&y_train)?;

        let train_features = drop_if_present(train, label)?;
        let val_features = drop_if_present(validation, label)?;
        schema.validate(&val_features)?;

        let train_encoded = schema.apply(&train_features)?;
        let val_encoded = schema.apply(&val_features)?;
        let feature_columns = schema.output_columns().to_vec();
        if !feature_columns.iter().any(|c| c == target) {
            return Err(ForecastError::ConfigError(format!(
                "target column '{}' is not among the encoded features",
                target
            )));
        }

        let x_train = columns_to_array2(&train_encoded, &feature_columns)?;
        let x_val = columns_to_array2(&val_encoded, &feature_columns)?;
        let target_col = [target.to_string()];
        let temp_train = columns_to_array2(&train_encoded, &target_col)?.column(0).to_owned();
        let temp_val = columns_to_array2(&val_encoded, &target_col)?.column(0).to_owned();

        let seq_train = SequenceDataset::from_arrays(x_train.clone(), temp_train, window.seq_len, window.horizon)?;
        let seq_val = SequenceDataset::from_arrays(x_val.clone(), temp_val, window.seq_len, window.horizon)?;

        Ok(Self {
            feature_columns,
            x_train,
            y_train,
            x_val,
            y_val,
            seq_train,
            seq_val,
        })
    }
}

fn drop_if_present(df: &DataFrame, column: &str) -> Result<DataFrame> {
    if df.get_column_names().iter().any(|c| c.as_str() == column) {
        Ok(df.drop(column)?)
    } else {
        Ok(df.clone())
    }
}

fn label_values(df: &DataFrame, label: &str) -> Result<Array1<f64>> {
    let values = column_f64(df, label)?;
    values
        .into_iter()
        .map(|v| {
            v.filter(|x| x.is_finite())
                .ok_or_else(|| ForecastError::DataError(format!("target column '{}' has missing values", label)))
        })
        .collect()
}

/// Reject targets no model can learn from
pub fn check_target(y: &Array1<f64>) -> Result<()> {
    if y.is_empty() {
        return Err(ForecastError::DataError("target is empty".to_string()));
    }
    let first = y[0];
    if y.iter().all(|&v| (v - first).abs() < 1e-12) {
        return Err(ForecastError::DataError(format!("target is constant ({})", first)));
    }
    Ok(())
}

/// One successfully fitted candidate
#[derive(Debug, Clone)]
pub struct CandidateFit {
    pub kind: CandidateKind,
    pub model: TrainedModel,
    pub metrics: ModelMetrics,
    /// Hyperparameters, as recorded with the run
    pub params: serde_json::Value,
}

/// A candidate that failed to fit or evaluate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub kind: CandidateKind,
    pub error: String,
}

/// Fitted candidates ranked by validation RMSE, plus failures
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub ranked: Vec<CandidateFit>,
    pub failures: Vec<CandidateFailure>,
}

impl SelectionOutcome {
    /// Names of the `n` best candidates
    pub fn top_models(&self, n: usize) -> Vec<String> {
        self.ranked.iter().take(n).map(|c| c.kind.name().to_string()).collect()
    }

    pub fn best(&self) -> Option<&CandidateFit> {
        self.ranked.first()
    }
}

/// Stable ascending sort by a metric; NaN sorts last and ties keep input order
pub fn rank_by_metric<T>(mut items: Vec<T>, metric: impl Fn(&T) -> f64) -> Vec<T> {
    items.sort_by(|a, b| {
        let (x, y) = (metric(a), metric(b));
        match (x.is_nan(), y.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        }
    });
    items
}

/// Fits every configured candidate and ranks them
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    training: TrainingConfig,
    sequence: SequenceConfig,
}

impl ModelSelector {
    pub fn new(training: TrainingConfig, sequence: SequenceConfig) -> Self {
        Self { training, sequence }
    }

    /// Fit all candidates in parallel.
    ///
    /// A failing candidate is logged and recorded; selection fails only when
    /// no candidate survives.
    pub fn select(&self, data: &TrainingData) -> Result<SelectionOutcome> {
        check_target(&data.y_train)?;
        info!(
            candidates = self.training.candidates.len(),
            train_rows = data.x_train.nrows(),
            validation_rows = data.x_val.nrows(),
            features = data.feature_columns.len(),
            "Fitting candidates"
        );

        let results: Vec<(CandidateKind, Result<CandidateFit>)> = self
            .training
            .candidates
            .par_iter()
            .map(|&kind| (kind, self.fit_candidate(kind, data)))
            .collect();

        let mut fits = Vec::new();
        let mut failures = Vec::new();
        for (kind, result) in results {
            match result {
                Ok(fit) => {
                    info!(model = %kind, rmse = fit.metrics.rmse, "Candidate fitted");
                    fits.push(fit);
                }
                Err(e) => {
                    warn!(model = %kind, error = %e, "Candidate failed");
                    failures.push(CandidateFailure {
                        kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        if fits.is_empty() {
            let detail: Vec<String> = failures.iter().map(|f| format!("{}: {}", f.kind, f.error)).collect();
            return Err(ForecastError::TrainingError(format!(
                "no candidate survived ({})",
                detail.join("; ")
            )));
        }

        Ok(SelectionOutcome {
            ranked: rank_by_metric(fits, |f| f.metrics.rmse),
            failures,
        })
    }

    fn fit_candidate(&self, kind: CandidateKind, data: &TrainingData) -> Result<CandidateFit> {
        let start = Instant::now();
        let cfg = &self.training;
        let params = self.params(kind);

        let (model, mut metrics) = match kind {
            CandidateKind::Gru => {
                let mut gru = GruRegressor::new(self.sequence.clone());
                gru.fit(&data.seq_train, &data.seq_val)?;
                let pred = gru.predict(&data.seq_val)?;
                let truth = Array2::from_shape_fn(pred.raw_dim(), |(i, k)| {
                    data.seq_val.sample(i).map_or(f64::NAN, |(_, y)| y[k])
                });
                let metrics = ModelMetrics::compute_regression(&truth, &pred);
                (TrainedModel::Gru(gru), metrics)
            }
            tabular => {
                let model = match tabular {
                    CandidateKind::GradientBoosting => {
                        let mut m = GradientBoostingRegressor::new(GradientBoostingConfig {
                            n_estimators: cfg.n_estimators,
                            learning_rate: cfg.learning_rate,
                            max_depth: cfg.max_depth.unwrap_or(3),
                            min_samples_leaf: cfg.min_samples_leaf,
                            subsample: cfg.subsample,
                            random_state: cfg.random_seed,
                            ..Default::default()
                        });
                        m.fit(&data.x_train, &data.y_train)?;
                        TrainedModel::GradientBoosting(m)
                    }
                    CandidateKind::RandomForest => {
                        let mut m = RandomForest::new(cfg.n_estimators)
                            .with_min_samples_leaf(cfg.min_samples_leaf)
                            .with_random_state(cfg.random_seed);
                        if let Some(depth) = cfg.max_depth {
                            m = m.with_max_depth(depth);
                        }
                        m.fit(&data.x_train, &data.y_train)?;
                        TrainedModel::RandomForest(m)
                    }
                    CandidateKind::ExtraTrees => {
                        let mut m = ExtraTrees::new(cfg.n_estimators)
                            .with_min_samples_leaf(cfg.min_samples_leaf)
                            .with_random_state(cfg.random_seed);
                        if let Some(depth) = cfg.max_depth {
                            m = m.with_max_depth(depth);
                        }
                        m.fit(&data.x_train, &data.y_train)?;
                        TrainedModel::ExtraTrees(m)
                    }
                    _ => {
                        let mut m = HistGradientBoostingRegressor::new(HistGradientBoostingConfig {
                            max_iter: cfg.n_estimators,
                            learning_rate: cfg.learning_rate,
                            max_leaf_nodes: cfg.max_leaf_nodes,
                            max_depth: cfg.max_depth,
                            max_bins: cfg.max_bins,
                            ..Default::default()
                        });
                        m.fit(&data.x_train, &data.y_train)?;
                        TrainedModel::HistGradientBoosting(m)
                    }
                };
                let pred = model.predict_rows(&data.x_val)?;
                let metrics = ModelMetrics::compute_regression(&data.y_val, &pred);
                (model, metrics)
            }
        };

        if !metrics.rmse.is_finite() {
            return Err(ForecastError::TrainingError(format!(
                "{} produced no finite validation score",
                kind
            )));
        }
        metrics.training_time_secs = start.elapsed().as_secs_f64();
        Ok(CandidateFit {
            kind,
            model,
            metrics,
            params,
        })
    }

    /// Hyperparameters that affect a candidate
    fn params(&self, kind: CandidateKind) -> serde_json::Value {
        let cfg = &self.training;
        match kind {
            CandidateKind::Gru => serde_json::to_value(&self.sequence).unwrap_or(serde_json::Value::Null),
            CandidateKind::GradientBoosting => json!({
                "n_estimators": cfg.n_estimators,
                "learning_rate": cfg.learning_rate,
                "max_depth": cfg.max_depth.unwrap_or(3),
                "subsample": cfg.subsample,
                "random_seed": cfg.random_seed,
            }),
            CandidateKind::HistGradientBoosting => json!({
                "max_iter": cfg.n_estimators,
                "learning_rate": cfg.learning_rate,
                "max_leaf_nodes": cfg.max_leaf_nodes,
                "max_depth": cfg.max_depth,
                "max_bins": cfg.max_bins,
            }),
            CandidateKind::RandomForest | CandidateKind::ExtraTrees => json!({
                "n_estimators": cfg.n_estimators,
                "max_depth": cfg.max_depth,
                "min_samples_leaf": cfg.min_samples_leaf,
                "random_seed": cfg.random_seed,
            }),
        }
    }
}
