//! Training configuration

use serde::{Deserialize, Serialize};
use std::fmt;

/// Candidate model in the training roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateKind {
    GradientBoosting,
    RandomForest,
    ExtraTrees,
    HistGradientBoosting,
    Gru,
}

impl CandidateKind {
    /// Default roster, in ranking tie-break order
    pub fn roster() -> Vec<CandidateKind> {
        vec![
            CandidateKind::GradientBoosting,
            CandidateKind::RandomForest,
            CandidateKind::ExtraTrees,
            CandidateKind::HistGradientBoosting,
            CandidateKind::Gru,
        ]
    }

    /// Stable name used for run ids and logs
    pub fn name(&self) -> &'static str {
        match self {
            CandidateKind::GradientBoosting => "gradient_boosting",
            CandidateKind::RandomForest => "random_forest",
            CandidateKind::ExtraTrees => "extra_trees",
            CandidateKind::HistGradientBoosting => "hist_gradient_boosting",
            CandidateKind::Gru => "gru",
        }
    }

    /// Sequence-to-vector model trained on windows of the target
    pub fn is_sequence(&self) -> bool {
        matches!(self, CandidateKind::Gru)
    }

    /// Parse a name produced by `name`
    pub fn from_name(name: &str) -> Option<Self> {
        Self::roster().into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for the tabular candidates and model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Candidates to fit
    pub candidates: Vec<CandidateKind>,
    /// Trees per ensemble
    pub n_estimators: usize,
    /// Shrinkage for the boosted models
    pub learning_rate: f64,
    /// Maximum tree depth (None = unlimited for forests)
    pub max_depth: Option<usize>,
    /// Minimum samples per leaf
    pub min_samples_leaf: usize,
    /// Leaf budget for histogram boosting
    pub max_leaf_nodes: usize,
    /// Feature bins for histogram boosting
    pub max_bins: usize,
    /// Row subsample for gradient boosting
    pub subsample: f64,
    /// Base random seed
    pub random_seed: u64,
    /// Runs promoted for tree models
    pub top_k_trees: usize,
    /// Runs promoted for sequence models
    pub top_k_sequence: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            candidates: CandidateKind::roster(),
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: None,
            min_samples_leaf: 1,
            max_leaf_nodes: 31,
            max_bins: 255,
            subsample: 1.0,
            random_seed: 42,
            top_k_trees: 3,
            top_k_sequence: 1,
        }
    }
}

impl TrainingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the roster
    pub fn with_candidates(mut self, candidates: Vec<CandidateKind>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Builder method to set the number of trees
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    /// Builder method to set the boosting learning rate
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Builder method to set the maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Builder method to set the random seed
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Builder method to set the promotion count for tree models
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k_trees = k;
        self
    }

    /// Number of runs to promote for a model family
    pub fn top_k(&self, kind: CandidateKind) -> usize {
        if kind.is_sequence() {
            self.top_k_sequence
        } else {
            self.top_k_trees
        }
    }
}

/// Configuration for the recurrent sequence model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub hidden_size: usize,
    pub num_layers: usize,
    /// Inverted dropout between stacked layers
    pub dropout: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Adam step size
    pub learning_rate: f64,
    /// Epochs without validation improvement before stopping
    pub patience: usize,
    /// Global gradient-norm clip
    pub grad_clip: f64,
    pub random_seed: u64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            hidden_size: 64,
            num_layers: 2,
            dropout: 0.2,
            epochs: 50,
            batch_size: 64,
            learning_rate: 1e-3,
            patience: 5,
            grad_clip: 5.0,
            random_seed: 42,
        }
    }
}

impl SequenceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }
}
