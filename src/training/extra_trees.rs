//! Extra Trees (Extremely Randomized Trees) regressor
//!
//! Unlike Random Forest, each split draws one uniform threshold per
//! candidate feature and keeps the best of those. Trees see the full
//! training set (no bootstrap).

use super::decision_tree::{DecisionTree, Splitter};
use super::random_forest::{grow_forest, mean_importances, predict_mean, ForestParams, MaxFeatures};
use crate::error::Result;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraTrees {
    trees: Vec<DecisionTree>,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub random_state: u64,
    feature_importances: Option<Array1<f64>>,
    n_features: usize,
}

impl Default for ExtraTrees {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ExtraTrees {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            random_state: 42,
            feature_importances: None,
            n_features: 0,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        self.n_features = x.ncols();
        self.trees = grow_forest(
            x,
            y,
            ForestParams {
                n_estimators: self.n_estimators,
                max_depth: self.max_depth,
                min_samples_leaf: self.min_samples_leaf,
                max_features: self.max_features.resolve(self.n_features),
                bootstrap: false,
                splitter: Splitter::Random,
                seed: self.random_state,
            },
        )?;
        self.feature_importances = Some(mean_importances(&self.trees, self.n_features));
        Ok(self)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        predict_mean(&self.trees, x)
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_trees_regression() {
        let x = Array2::from_shape_fn((100, 2), |(r, c)| if c == 0 { r as f64 } else { (r % 7) as f64 });
        let y = x.column(0).mapv(|v| 0.5 * v + 3.0);

        let mut model = ExtraTrees::new(20).with_random_state(11);
        model.fit(&x, &y).unwrap();
        let pred = model.predict(&x).unwrap();

        let mse = (&pred - &y).mapv(|e| e * e).mean().unwrap();
        assert!(mse < 1.0, "MSE too high: {}", mse);

        let importances = model.feature_importances().unwrap();
        assert!(importances[0] > importances[1]);
    }
}
