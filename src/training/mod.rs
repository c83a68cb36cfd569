//! Model training module
//!
//! Candidate models for hourly forecasting and the selector that ranks them:
//! - Gradient boosting, histogram gradient boosting
//! - Random Forest and Extra Trees (bagged regression trees)
//! - A stacked GRU producing a full forecast horizon per window
//!
//! Every candidate is fitted in parallel and scored by validation RMSE.

mod config;
mod engine;
mod models;
pub mod decision_tree;
pub mod extra_trees;
pub mod gradient_boosting;
pub mod gru;
pub mod hist_gradient_boosting;
pub mod random_forest;

pub use config::{CandidateKind, SequenceConfig, TrainingConfig};
pub use engine::{
    check_target, rank_by_metric, CandidateFailure, CandidateFit, ModelSelector, SelectionOutcome,
    TrainingData,
};
pub use models::{ModelMetrics, TrainedModel};
pub use decision_tree::{DecisionTree, Splitter, TreeNode};
pub use extra_trees::ExtraTrees;
pub use gradient_boosting::{GradientBoostingConfig, GradientBoostingRegressor};
pub use gru::GruRegressor;
pub use hist_gradient_boosting::{HistGradientBoostingConfig, HistGradientBoostingRegressor};
pub use random_forest::{MaxFeatures, RandomForest};
