//! Robust feature scaling: (x - median) / IQR

use crate::error::{ForecastError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fitted center and scale for one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub center: f64,
    pub scale: f64,
}

/// Median/IQR scaler fitted on the training block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RobustScaler {
    params: BTreeMap<String, ScalerParams>,
    is_fitted: bool,
}

impl RobustScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit median and IQR for each listed column
    pub fn fit(&mut self, df: &DataFrame, columns: &[String]) -> Result<&mut Self> {
        for col_name in columns {
            let column = df
                .column(col_name)
                .map_err(|_| ForecastError::FeatureNotFound(col_name.to_string()))?;
            let casted = column.cast(&DataType::Float64)?;
            let ca = casted.f64()?;

            let median = ca.median().unwrap_or(0.0);
            let q1 = ca.quantile(0.25, QuantileMethod::Linear).unwrap_or(Some(0.0)).unwrap_or(0.0);
            let q3 = ca.quantile(0.75, QuantileMethod::Linear).unwrap_or(Some(1.0)).unwrap_or(1.0);
            let iqr = q3 - q1;
            self.params.insert(
                col_name.clone(),
                ScalerParams {
                    center: median,
                    scale: if iqr.abs() < f64::EPSILON { 1.0 } else { iqr },
                },
            );
        }

        self.is_fitted = true;
        Ok(self)
    }

    /// Scale the fitted columns that are present in `df`
    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(ForecastError::ModelNotFitted);
        }

        let mut result = df.clone();
        for (col_name, params) in &self.params {
            let Ok(column) = df.column(col_name) else {
                continue;
            };
            let casted = column.cast(&DataType::Float64)?;
            let scaled: Float64Chunked = casted
                .f64()?
                .into_iter()
                .map(|opt| opt.map(|v| (v - params.center) / params.scale))
                .collect();
            result.with_column(scaled.with_name(col_name.as_str().into()).into_series())?;
        }

        Ok(result)
    }

    /// Fitted parameters for a column
    pub fn params(&self, column: &str) -> Option<ScalerParams> {
        self.params.get(column).copied()
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robust_scaler_uses_training_params() {
        let train = DataFrame::new(vec![
            Series::new("a".into(), &[1.0, 2.0, 3.0, 4.0, 5.0]).into(),
        ])
        .unwrap();
        let other = DataFrame::new(vec![
            Series::new("a".into(), &[3.0, 7.0]).into(),
        ])
        .unwrap();

        let mut scaler = RobustScaler::new();
        scaler.fit(&train, &["a".to_string()]).unwrap();
        let params = scaler.params("a").unwrap();
        assert_eq!(params.center, 3.0);
        assert_eq!(params.scale, 2.0);

        let out = scaler.transform(&other).unwrap();
        let col: Vec<Option<f64>> = out.column("a").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(col, vec![Some(0.0), Some(2.0)]);
    }

    #[test]
    fn test_constant_column_keeps_unit_scale() {
        let train = DataFrame::new(vec![Series::new("a".into(), &[4.0, 4.0, 4.0]).into()]).unwrap();
        let mut scaler = RobustScaler::new();
        scaler.fit(&train, &["a".to_string()]).unwrap();
        assert_eq!(scaler.params("a").unwrap().scale, 1.0);
    }

    #[test]
    fn test_transform_before_fit() {
        let df = DataFrame::new(vec![Series::new("a".into(), &[1.0]).into()]).unwrap();
        assert!(matches!(RobustScaler::new().transform(&df), Err(ForecastError::ModelNotFitted)));
    }
}
