//! End-to-end pipeline configuration

use crate::error::{ForecastError, Result};
use crate::inference::Sensitivity;
use crate::preprocessing::FeatureConfig;
use crate::timeseries::WindowConfig;
use crate::training::{SequenceConfig, TrainingConfig};
use chrono::{Datelike, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Years of history loaded by default
pub const DEFAULT_HISTORY_YEARS: i32 = 3;

/// Configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the `year=YYYY/month=MM` raw partitions
    pub data_dir: PathBuf,
    /// Root for stage artifacts, models and run records
    pub output_dir: PathBuf,
    /// First year of data to load
    pub start_year: i32,
    /// Prefix of the experiment label shared by this run's records
    pub experiment: String,
    pub features: FeatureConfig,
    pub window: WindowConfig,
    pub training: TrainingConfig,
    pub sequence: SequenceConfig,
    /// Sensitivity used for the clothing advice
    pub sensitivity: Sensitivity,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/raw"),
            output_dir: PathBuf::from("output"),
            start_year: Local::now().year() - DEFAULT_HISTORY_YEARS,
            experiment: "weather_forecast".to_string(),
            features: FeatureConfig::default(),
            window: WindowConfig::default(),
            training: TrainingConfig::default(),
            sequence: SequenceConfig::default(),
            sensitivity: Sensitivity::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON configuration; absent fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ForecastError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_start_year(mut self, year: i32) -> Self {
        self.start_year = year;
        self
    }

    pub fn with_experiment(mut self, experiment: impl Into<String>) -> Self {
        self.experiment = experiment.into();
        self
    }

    pub fn with_features(mut self, features: FeatureConfig) -> Self {
        self.features = features;
        self
    }

    pub fn with_window(mut self, window: WindowConfig) -> Self {
        self.window = window;
        self
    }

    pub fn with_training(mut self, training: TrainingConfig) -> Self {
        self.training = training;
        self
    }

    pub fn with_sequence(mut self, sequence: SequenceConfig) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Reject settings no stage can run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("window.seq_len", self.window.seq_len),
            ("window.horizon", self.window.horizon),
            ("sequence.hidden_size", self.sequence.hidden_size),
            ("sequence.num_layers", self.sequence.num_layers),
            ("sequence.batch_size", self.sequence.batch_size),
            ("training.n_estimators", self.training.n_estimators),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(invalid(name, value, "must be positive"));
            }
        }
        if !(0.0..1.0).contains(&self.sequence.dropout) {
            return Err(invalid("sequence.dropout", self.sequence.dropout, "must be in [0, 1)"));
        }
        if !(self.sequence.learning_rate > 0.0) {
            return Err(invalid("sequence.learning_rate", self.sequence.learning_rate, "must be positive"));
        }
        if self.training.candidates.is_empty() {
            return Err(ForecastError::ConfigError("no candidate models configured".to_string()));
        }
        // Served forecasts cover the whole horizon, which only sequence models emit
        if !self.training.candidates.iter().any(|k| k.is_sequence()) {
            return Err(ForecastError::ConfigError(
                "candidates need at least one sequence model to forecast the horizon".to_string(),
            ));
        }
        if self.features.target_column.is_empty() {
            return Err(ForecastError::ConfigError("target column is empty".to_string()));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: impl ToString, reason: &str) -> ForecastError {
    ForecastError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
