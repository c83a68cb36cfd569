//! Stateless feature transformations
//!
//! `prepare` (missing-token imputation and non-negative clamping) runs on the
//! raw frame before selection. `derive` (calendar, cyclical, composite and
//! change-rate features) runs after selection on a chronologically sorted
//! frame, so derived columns are never dropped by the selector.

use super::config::FeatureConfig;
use super::{categorical_columns, column_f64, column_i64, column_str, ColumnType};
use crate::error::{ForecastError, Result};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use std::f64::consts::PI;
use tracing::debug;

/// Deterministic row/column derivations with no fitted state
#[derive(Debug, Clone, Default)]
pub struct FeatureTransformer {
    config: FeatureConfig,
}

impl FeatureTransformer {
    /// Create a transformer from a feature configuration
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Impute and clamp raw observations
    pub fn prepare(&self, df: &DataFrame) -> Result<DataFrame> {
        let df = self.replace_missing_tokens(df)?;
        self.clamp_non_negative(&df)
    }

    /// Add every derived feature
    pub fn derive(&self, df: &DataFrame) -> Result<DataFrame> {
        let df = self.add_calendar_features(df)?;
        let df = self.add_cyclical_features(&df)?;
        let df = self.add_composite_features(&df)?;
        self.add_change_rates(&df)
    }

    /// Replace the missing-value token in string columns
    pub fn replace_missing_tokens(&self, df: &DataFrame) -> Result<DataFrame> {
        let mut result = df.clone();
        let token = self.config.missing_token.as_str();
        let replacement = self.config.missing_replacement.as_str();

        for name in categorical_columns(df) {
            let values = column_str(df, &name)?;
            if !values.iter().any(|v| v.as_deref() == Some(token)) {
                continue;
            }
            let replaced: Vec<Option<String>> = values
                .into_iter()
                .map(|v| v.map(|s| if s == token { replacement.to_string() } else { s }))
                .collect();
            result.with_column(Series::new(name.as_str().into(), replaced))?;
            debug!(column = %name, "Replaced missing tokens");
        }

        Ok(result)
    }

    /// Floor negative values to zero in physically non-negative columns
    pub fn clamp_non_negative(&self, df: &DataFrame) -> Result<DataFrame> {
        let mut result = df.clone();

        for name in &self.config.non_negative_columns {
            let Ok(column) = df.column(name) else {
                continue;
            };
            if ColumnType::of(column.dtype()) != ColumnType::Numeric {
                continue;
            }
            let clamped: Vec<Option<f64>> = column_f64(df, name)?
                .into_iter()
                .map(|v| v.map(|x| x.max(0.0)))
                .collect();
            result.with_column(Series::new(name.as_str().into(), clamped))?;
        }

        Ok(result)
    }

    /// Add `season`, `time_segment` and `day_of_week` (0 = Monday)
    pub fn add_calendar_features(&self, df: &DataFrame) -> Result<DataFrame> {
        let months = column_i64(df, "month")?;
        let hours = column_i64(df, "hour")?;
        let weekdays = weekdays(df)?;

        let seasons: Vec<&str> = months.iter().map(|&m| season(m)).collect();
        let segments: Vec<&str> = hours.iter().map(|&h| time_segment(h)).collect();

        let mut result = df.clone();
        result.with_column(Series::new("season".into(), seasons))?;
        result.with_column(Series::new("time_segment".into(), segments))?;
        result.with_column(Series::new("day_of_week".into(), weekdays))?;
        Ok(result)
    }

    /// Add sine/cosine encodings of hour, month, day and weekday
    pub fn add_cyclical_features(&self, df: &DataFrame) -> Result<DataFrame> {
        let hours = column_i64(df, "hour")?;
        let months = column_i64(df, "month")?;
        let days = column_i64(df, "day")?;
        let weekdays: Vec<i64> = weekdays(df)?.into_iter().map(i64::from).collect();

        let mut result = df.clone();
        let encodings: [(&str, Vec<i64>, i64, f64); 4] = [
            ("hour", hours, 0, 24.0),
            ("month", months, 1, 12.0),
            ("day", days, 1, 31.0),
            ("dow", weekdays, 0, 7.0),
        ];
        for (prefix, values, offset, period) in encodings {
            let (sin, cos) = cyclical(&values, offset, period);
            result.with_column(Series::new(format!("{}_sin", prefix).into(), sin))?;
            result.with_column(Series::new(format!("{}_cos", prefix).into(), cos))?;
        }
        Ok(result)
    }

    /// Add wind-chill style feels-like temperature and temperature x humidity
    pub fn add_composite_features(&self, df: &DataFrame) -> Result<DataFrame> {
        let mut result = df.clone();
        let has = |name: &str| df.column(name).is_ok();

        if has("Temperature") && has("WindSpeed") {
            let temp = column_f64(df, "Temperature")?;
            let wind = column_f64(df, "WindSpeed")?;
            let feels: Vec<Option<f64>> = temp
                .iter()
                .zip(wind.iter())
                .map(|(t, v)| match (t, v) {
                    (Some(t), Some(v)) => Some(feels_like(*t, *v)),
                    _ => None,
                })
                .collect();
            result.with_column(Series::new("feels_like_temp".into(), feels))?;
        }

        if has("Temperature") && has("RelativeHumidity") {
            let temp = column_f64(df, "Temperature")?;
            let humidity = column_f64(df, "RelativeHumidity")?;
            let product: Vec<Option<f64>> = temp
                .iter()
                .zip(humidity.iter())
                .map(|(t, h)| Some((*t)? * (*h)?))
                .collect();
            result.with_column(Series::new("temp_humidity_interaction".into(), product))?;
        }

        Ok(result)
    }

    /// Add `<col>_change_{k}h` percentage changes over the configured lags
    pub fn add_change_rates(&self, df: &DataFrame) -> Result<DataFrame> {
        let mut result = df.clone();
        for name in &self.config.change_rate_columns {
            if df.column(name).is_err() {
                continue;
            }
            let values = column_f64(df, name)?;
            for &lag in &self.config.change_rate_lags {
                let rates = pct_change(&values, lag);
                result.with_column(Series::new(format!("{}_change_{}h", name, lag).into(), rates))?;
            }
        }
        Ok(result)
    }
}

fn season(month: i64) -> &'static str {
    match month {
        3..=5 => "Spring",
        6..=8 => "Summer",
        9..=11 => "Fall",
        _ => "Winter",
    }
}

fn time_segment(hour: i64) -> &'static str {
    match hour {
        0..=5 => "Dawn",
        6..=11 => "Morning",
        12..=17 => "Afternoon",
        18..=21 => "Evening",
        _ => "Night",
    }
}

/// Weekday index (0 = Monday) from the (year, month, day) columns
fn weekdays(df: &DataFrame) -> Result<Vec<i32>> {
    let years = column_i64(df, "year")?;
    let months = column_i64(df, "month")?;
    let days = column_i64(df, "day")?;

    years
        .iter()
        .zip(months.iter())
        .zip(days.iter())
        .map(|((&y, &m), &d)| {
            NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
                .map(|date| date.weekday().num_days_from_monday() as i32)
                .ok_or_else(|| ForecastError::DataError(format!("invalid date {}-{}-{}", y, m, d)))
        })
        .collect()
}

fn cyclical(values: &[i64], offset: i64, period: f64) -> (Vec<f64>, Vec<f64>) {
    values
        .iter()
        .map(|&v| {
            let angle = 2.0 * PI * (v - offset) as f64 / period;
            (angle.sin(), angle.cos())
        })
        .unzip()
}

fn feels_like(temp: f64, wind: f64) -> f64 {
    let v = wind.max(0.0).powf(0.16);
    13.12 + 0.6215 * temp - 11.37 * v + 0.3965 * temp * v
}

/// (x[i] - x[i-k]) / x[i-k], null when undefined
fn pct_change(values: &[Option<f64>], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i < lag {
                return None;
            }
            let current = values[i]?;
            let previous = values[i - lag]?;
            if previous == 0.0 {
                None
            } else {
                Some((current - previous) / previous)
            }
        })
        .collect()
}
