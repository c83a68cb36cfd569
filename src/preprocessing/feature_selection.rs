//! Statistical feature selection
//!
//! Produces a deterministic drop-list from four rules:
//! - Spearman significance against the target
//! - Pairwise redundancy among numeric features
//! - Kruskal-Wallis association for categorical columns
//! - A fixed list of identifier/code exclusions
//!
//! Timestamp fields and the target are never dropped.

use super::config::{FeatureConfig, TIMESTAMP_COLUMNS};
use super::stats::{kruskal_wallis, pearson, rank, spearman, spearman_test};
use super::{categorical_columns, column_f64, column_str, numeric_columns};
use crate::error::{ForecastError, Result};
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Why a column was dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DropReason {
    /// Spearman p-value at or above the significance level
    NotSignificant { rho: f64, p_value: f64 },
    /// Correlation undefined because the column is constant
    ZeroVariance,
    /// Nearly collinear with a feature that tracks the target better
    Redundant { kept: String, rho: f64 },
    /// Target distribution does not differ across the column's levels
    NoGroupAssociation { p_value: f64 },
    /// Identifier or code column
    Excluded,
}

/// One drop decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropDecision {
    pub column: String,
    pub reason: DropReason,
}

/// Result of a selection pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionReport {
    /// Sorted, de-duplicated column names to drop
    pub dropped: Vec<String>,
    /// Every rule that fired, in rule order
    pub decisions: Vec<DropDecision>,
    /// Columns that were tested
    pub n_tested: usize,
}

impl SelectionReport {
    /// Whether a column is on the drop-list
    pub fn drops(&self, column: &str) -> bool {
        self.dropped.binary_search_by(|c| c.as_str().cmp(column)).is_ok()
    }
}

/// Numeric column prepared for repeated rank correlation
struct RankedColumn {
    name: String,
    values: Vec<Option<f64>>,
    /// Precomputed ranks when the column has no nulls
    ranks: Option<Vec<f64>>,
}

impl RankedColumn {
    fn new(name: String, values: Vec<Option<f64>>) -> Self {
        let ranks = if values.iter().all(|v| v.map_or(false, f64::is_finite)) {
            let dense: Vec<f64> = values.iter().map(|v| v.unwrap_or(0.0)).collect();
            Some(rank(&dense))
        } else {
            None
        };
        Self { name, values, ranks }
    }

    fn correlation(&self, other: &RankedColumn) -> Option<f64> {
        if let (Some(a), Some(b)) = (&self.ranks, &other.ranks) {
            return pearson(a, b);
        }
        let (x, y) = complete_pairs(&self.values, &other.values);
        spearman(&x, &y)
    }
}

/// Rows where both sides are present and finite
fn complete_pairs(x: &[Option<f64>], y: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y.iter())
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Some((*a, *b)),
            _ => None,
        })
        .unzip()
}

/// Statistical feature selector
#[derive(Debug, Clone, Default)]
pub struct FeatureSelector {
    config: FeatureConfig,
}

impl FeatureSelector {
    /// Create a selector from a feature configuration
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Compute the drop-list for `target`
    pub fn select(&self, df: &DataFrame, target: &str) -> Result<SelectionReport> {
        if df.column(target).is_err() {
            return Err(ForecastError::ConfigError(format!(
                "target column '{}' not found",
                target
            )));
        }

        let protected: BTreeSet<String> = TIMESTAMP_COLUMNS
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(target.to_string()))
            .collect();

        let target_values = column_f64(df, target)?;
        let alpha = self.config.significance_level;
        let mut decisions = Vec::new();

        // Correlation significance
        let numeric: Vec<String> = numeric_columns(df)
            .into_iter()
            .filter(|c| c != target)
            .collect();
        let mut target_corr: BTreeMap<String, f64> = BTreeMap::new();
        let mut ranked = Vec::with_capacity(numeric.len());

        for name in &numeric {
            let values = column_f64(df, name)?;
            let (x, y) = complete_pairs(&values, &target_values);
            match spearman_test(&x, &y) {
                None => {
                    target_corr.insert(name.clone(), 0.0);
                    decisions.push(DropDecision {
                        column: name.clone(),
                        reason: DropReason::ZeroVariance,
                    });
                }
                Some(test) => {
                    target_corr.insert(name.clone(), test.rho.abs());
                    if test.p_value >= alpha {
                        decisions.push(DropDecision {
                            column: name.clone(),
                            reason: DropReason::NotSignificant {
                                rho: test.rho,
                                p_value: test.p_value,
                            },
                        });
                    }
                }
            }
            ranked.push(RankedColumn::new(name.clone(), values));
        }

        // Redundancy
        decisions.extend(self.redundancy_drops(&ranked, &target_corr, &protected));

        // Categorical association
        for name in categorical_columns(df).into_iter().filter(|c| c != target) {
            if let Some(decision) = self.group_association(df, &name, &target_values)? {
                decisions.push(decision);
            }
        }

        // Fixed exclusions
        for name in &self.config.excluded_columns {
            if df.column(name).is_ok() {
                decisions.push(DropDecision {
                    column: name.clone(),
                    reason: DropReason::Excluded,
                });
            }
        }

        decisions.retain(|d| !protected.contains(&d.column));
        let dropped: Vec<String> = decisions
            .iter()
            .map(|d| d.column.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        info!(
            tested = df.width(),
            dropped = dropped.len(),
            "Feature selection complete"
        );
        debug!(?dropped, "Drop-list");

        Ok(SelectionReport {
            dropped,
            decisions,
            n_tested: df.width().saturating_sub(1),
        })
    }

    /// Drop the listed columns and reorder to timestamps, target, rest
    pub fn apply(&self, df: &DataFrame, report: &SelectionReport, target: &str) -> Result<DataFrame> {
        let mut order: Vec<String> = Vec::with_capacity(df.width());
        for name in TIMESTAMP_COLUMNS.iter().copied().chain(std::iter::once(target)) {
            if df.column(name).is_ok() && !order.iter().any(|c| c == name) {
                order.push(name.to_string());
            }
        }
        for name in df.get_column_names() {
            let name = name.as_str();
            if report.drops(name) || order.iter().any(|c| c == name) {
                continue;
            }
            order.push(name.to_string());
        }
        Ok(df.select(order)?)
    }

    /// Pairs above the redundancy threshold, loser chosen by weaker target correlation
    fn redundancy_drops(
        &self,
        ranked: &[RankedColumn],
        target_corr: &BTreeMap<String, f64>,
        protected: &BTreeSet<String>,
    ) -> Vec<DropDecision> {
        let threshold = self.config.redundancy_threshold;
        let candidates: Vec<&RankedColumn> = ranked
            .iter()
            .filter(|c| !protected.contains(&c.name))
            .collect();

        let mut decisions: Vec<DropDecision> = (0..candidates.len())
            .into_par_iter()
            .flat_map_iter(|i| {
                let a = candidates[i];
                candidates[i + 1..].iter().filter_map(move |b| {
                    let rho = a.correlation(b)?;
                    if rho.abs() <= threshold {
                        return None;
                    }
                    let corr_a = target_corr.get(&a.name).copied().unwrap_or(0.0);
                    let corr_b = target_corr.get(&b.name).copied().unwrap_or(0.0);
                    let (loser, winner) = if corr_a > corr_b {
                        (&b.name, &a.name)
                    } else if corr_b > corr_a {
                        (&a.name, &b.name)
                    } else if a.name > b.name {
                        (&a.name, &b.name)
                    } else {
                        (&b.name, &a.name)
                    };
                    Some(DropDecision {
                        column: loser.clone(),
                        reason: DropReason::Redundant {
                            kept: winner.clone(),
                            rho,
                        },
                    })
                })
            })
            .collect();

        decisions.sort_by(|x, y| x.column.cmp(&y.column));
        decisions
    }

    /// Kruskal-Wallis over target groups keyed by the column's levels
    fn group_association(
        &self,
        df: &DataFrame,
        column: &str,
        target: &[Option<f64>],
    ) -> Result<Option<DropDecision>> {
        let levels = column_str(df, column)?;
        let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (level, value) in levels.into_iter().zip(target.iter()) {
            if let (Some(level), Some(value)) = (level, value) {
                if value.is_finite() {
                    groups.entry(level).or_default().push(*value);
                }
            }
        }

        let valid: Vec<Vec<f64>> = groups
            .into_values()
            .filter(|g| g.len() >= self.config.min_group_size)
            .collect();
        if valid.len() < 2 {
            debug!(column, "Too few groups for Kruskal-Wallis, keeping");
            return Ok(None);
        }

        Ok(kruskal_wallis(&valid)
            .filter(|test| test.p_value >= self.config.significance_level)
            .map(|test| DropDecision {
                column: column.to_string(),
                reason: DropReason::NoGroupAssociation {
                    p_value: test.p_value,
                },
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> DataFrame {
        let n = 60;
        let hours: Vec<i32> = (0..n).map(|i| i % 24).collect();
        let temp: Vec<f64> = (0..n).map(|i| 10.0 + i as f64 * 0.3).collect();
        let pressure: Vec<f64> = (0..n).map(|i| 1000.0 + i as f64 * 0.5).collect();
        let pressure_copy: Vec<f64> = pressure.iter().map(|p| p * 2.0 + 1.0).collect();
        let noise: Vec<f64> = (0..n).map(|i| ((i * 7919) % 13) as f64).collect();
        let constant = vec![3.0; n as usize];
        let cloud: Vec<&str> = (0..n).map(|i| if i < 30 { "Cu" } else { "St" }).collect();
        let station: Vec<i32> = vec![42; n as usize];

        df!(
            "StationID" => station,
            "year" => vec![2024i32; n as usize],
            "month" => vec![1i32; n as usize],
            "day" => vec![1i32; n as usize],
            "hour" => hours,
            "Pressure" => pressure,
            "PressureCopy" => pressure_copy,
            "Noise" => noise,
            "Constant" => constant,
            "CloudType" => cloud,
            "Temperature" => temp
        )
        .unwrap()
    }

    #[test]
    fn test_missing_target_is_config_error() {
        let df = sample_frame();
        let selector = FeatureSelector::default();
        let err = selector.select(&df, "Dewpoint").unwrap_err();
        assert!(matches!(err, ForecastError::ConfigError(_)));
    }

    #[test]
    fn test_drop_rules() {
        let df = sample_frame();
        let report = FeatureSelector::default().select(&df, "Temperature").unwrap();

        assert!(report.drops("StationID"));
        assert!(report.drops("Constant"));
        assert!(report.drops("Noise"));
        // equal target correlation, the larger name goes
        assert!(report.drops("PressureCopy"));
        assert!(!report.drops("Pressure"));
        assert!(!report.drops("CloudType"));
        for protected in ["year", "month", "day", "hour", "Temperature"] {
            assert!(!report.drops(protected));
        }
    }

    #[test]
    fn test_drop_list_is_sorted_and_deterministic() {
        let df = sample_frame();
        let selector = FeatureSelector::default();
        let first = selector.select(&df, "Temperature").unwrap();
        let second = selector.select(&df, "Temperature").unwrap();

        assert_eq!(first.dropped, second.dropped);
        let mut sorted = first.dropped.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(first.dropped, sorted);
    }

    #[test]
    fn test_apply_reorders_columns() {
        let df = sample_frame();
        let selector = FeatureSelector::default();
        let report = selector.select(&df, "Temperature").unwrap();
        let out = selector.apply(&df, &report, "Temperature").unwrap();

        let names: Vec<String> = out
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(&names[..5], &["year", "month", "day", "hour", "Temperature"]);
        assert!(names.contains(&"Pressure".to_string()));
        assert!(!names.contains(&"StationID".to_string()));
    }
}
