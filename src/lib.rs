//! Weather Forecast - Hourly temperature forecasting pipeline
//!
//! This crate turns raw hourly station observations into a promoted
//! forecasting model and a 168-hour temperature forecast:
//! - Statistical feature selection and feature engineering
//! - Frozen-schema categorical encoding and robust scaling
//! - Chronological splitting and sequence windows
//! - Parallel candidate training (tree ensembles and a GRU) with selection
//! - Append-only experiment tracking and artifact storage
//! - Forecast serving with clothing advice
//!
//! # Modules
//!
//! ## Core
//! - [`preprocessing`] - Feature selection, transformation, encoding, scaling
//! - [`timeseries`] - Sorting, temporal split, sequence windows
//! - [`training`] - Candidate models and model selection
//! - [`inference`] - Forecast serving and clothing recommendation
//!
//! ## Infrastructure
//! - [`tracking`] - Experiment tracking
//! - [`utils`] - Raw data source and artifact store
//! - [`pipeline`] - Stage orchestration
//!
//! ## Services
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Core modules
pub mod preprocessing;
pub mod timeseries;
pub mod training;
pub mod inference;

// Infrastructure
pub mod tracking;
pub mod utils;
pub mod pipeline;

// Services
pub mod cli;

pub use error::{ForecastError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{ForecastError, Result};

    // Preprocessing
    pub use crate::preprocessing::{
        Encoder, FeatureConfig, FeatureSelector, FeatureTransformer, FittedSchema, RobustScaler,
        SelectionReport,
    };

    // Time series
    pub use crate::timeseries::{SequenceDataset, TemporalSplit, WindowConfig, SHIFTED_TARGET};

    // Training
    pub use crate::training::{
        CandidateKind, ModelSelector, SelectionOutcome, SequenceConfig, TrainedModel, TrainingConfig,
        TrainingData,
    };

    // Inference
    pub use crate::inference::{recommend, Forecast, Forecaster, ModelArtifact, Sensitivity};

    // Experiment tracking
    pub use crate::tracking::{ExperimentStore, LocalExperimentStore, RunFilter, RunRecord};

    // Storage
    pub use crate::utils::{ArtifactStore, DataSource, LocalArtifactStore, PartitionedSource};

    // Pipeline
    pub use crate::pipeline::{ForecastPipeline, PipelineConfig};
}
