//! Random Forest regressor

use super::decision_tree::{DecisionTree, Splitter};
use crate::error::{ForecastError, Result};
use ndarray::{Array1, Array2, Axis};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Strategy for max features
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum MaxFeatures {
    /// Square root of n_features
    Sqrt,
    /// Fraction of n_features
    Fraction(f64),
    /// All features
    All,
}

impl MaxFeatures {
    pub(crate) fn resolve(&self, n_features: usize) -> usize {
        match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).ceil() as usize,
            MaxFeatures::All => n_features,
        }
        .clamp(1, n_features.max(1))
    }
}

/// Tree-growing settings shared by the bagged ensembles
#[derive(Debug, Clone, Copy)]
pub(crate) struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    pub max_features: usize,
    pub bootstrap: bool,
    pub splitter: Splitter,
    pub seed: u64,
}

/// Grow `n_estimators` independent trees in parallel
pub(crate) fn grow_forest(
    x: &Array2<f64>,
    y: &Array1<f64>,
    params: ForestParams,
) -> Result<Vec<DecisionTree>> {
    let n_samples = x.nrows();
    if n_samples != y.len() {
        return Err(ForecastError::ShapeError {
            expected: format!("y length = {}", n_samples),
            actual: format!("y length = {}", y.len()),
        });
    }
    if n_samples == 0 {
        return Err(ForecastError::TrainingError("empty training set".to_string()));
    }

    (0..params.n_estimators)
        .into_par_iter()
        .map(|tree_idx| {
            let seed = params.seed.wrapping_add(tree_idx as u64);
            let mut tree = DecisionTree::new()
                .with_min_samples_leaf(params.min_samples_leaf)
                .with_max_features(params.max_features)
                .with_splitter(params.splitter)
                .with_random_state(seed);
            if let Some(d) = params.max_depth {
                tree = tree.with_max_depth(d);
            }

            if params.bootstrap {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let sample_indices: Vec<usize> = (0..n_samples)
                    .map(|_| (rng.next_u64() as usize) % n_samples)
                    .collect();
                let x_boot = x.select(Axis(0), &sample_indices);
                let y_boot = y.select(Axis(0), &sample_indices);
                tree.fit(&x_boot, &y_boot)?;
            } else {
                tree.fit(x, y)?;
            }
            Ok(tree)
        })
        .collect()
}

/// Average of the per-tree predictions
pub(crate) fn predict_mean(trees: &[DecisionTree], x: &Array2<f64>) -> Result<Array1<f64>> {
    if trees.is_empty() {
        return Err(ForecastError::ModelNotFitted);
    }
    let predictions: Vec<Array1<f64>> = trees
        .par_iter()
        .map(|tree| tree.predict(x))
        .collect::<Result<_>>()?;

    let mut sum: Array1<f64> = Array1::zeros(x.nrows());
    for p in &predictions {
        sum += p;
    }
    Ok(sum / trees.len() as f64)
}

/// Mean of the normalized per-tree importances
pub(crate) fn mean_importances(trees: &[DecisionTree], n_features: usize) -> Array1<f64> {
    let mut total: Array1<f64> = Array1::zeros(n_features);
    for imp in trees.iter().filter_map(|t| t.feature_importances()) {
        if imp.len() == n_features {
            total += imp;
        }
    }
    if !trees.is_empty() {
        total /= trees.len() as f64;
    }
    total
}

/// Bootstrap-aggregated regression trees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    /// Number of trees
    pub n_estimators: usize,
    /// Maximum depth per tree
    pub max_depth: Option<usize>,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Features considered per split
    pub max_features: MaxFeatures,
    /// Bootstrap sampling
    pub bootstrap: bool,
    /// Random state
    pub random_state: u64,
    feature_importances: Option<Array1<f64>>,
    n_features: usize,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RandomForest {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: true,
            random_state: 42,
            feature_importances: None,
            n_features: 0,
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Set minimum samples in leaf
    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples;
        self
    }

    /// Set max features strategy
    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    /// Set random state
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fit the forest to training data
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
                bootstrap: self.bootstrap,
                splitter: Splitter::Best,
                seed: self.random_state,
            },
        )?;
        self.feature_importances = Some(mean_importances(&self.trees, self.n_features));
        Ok(self)
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        predict_mean(&self.trees, x)
    }

    /// Get feature importances
    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 3), |(r, c)| ((r * (c + 1)) % 17) as f64 + c as f64);
        let y = x.column(0).mapv(|v| 2.0 * v) + &x.column(1);
        (x, y)
    }

    #[test]
    fn test_forest_regression() {
        let (x, y) = linear_data(120);
        let mut forest = RandomForest::new(10).with_max_depth(8).with_random_state(7);
        forest.fit(&x, &y).unwrap();

        let pred = forest.predict(&x).unwrap();
        let mse = (&pred - &y).mapv(|e| e * e).mean().unwrap();
        let var = y.var(0.0);
        assert!(mse < 0.2 * var, "mse {} var {}", mse, var);
        assert_eq!(forest.n_trees(), 10);
    }

    #[test]
    fn test_seeded_forest_is_deterministic() {
        let (x, y) = linear_data(60);
        let mut a = RandomForest::new(5).with_random_state(3);
        let mut b = RandomForest::new(5).with_random_state(3);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(16), 4);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(9), 5);
        assert_eq!(MaxFeatures::All.resolve(0), 1);
    }

    #[test]
    fn test_predict_before_fit() {
        let forest = RandomForest::new(3);
        assert!(forest.predict(&Array2::zeros((1, 2))).is_err());
    }
}
