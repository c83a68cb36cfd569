//! Feature engineering configuration

use serde::{Deserialize, Serialize};

/// Timestamp decomposition fields, always kept and always first
pub const TIMESTAMP_COLUMNS: [&str; 4] = ["year", "month", "day", "hour"];

/// Configuration for feature selection, transformation and encoding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Regression target column
    pub target_column: String,

    /// Significance level for the Spearman and Kruskal-Wallis filters
    pub significance_level: f64,

    /// Pairwise |rho| above which one of two features is dropped
    pub redundancy_threshold: f64,

    /// Minimum group size for the Kruskal-Wallis test
    pub min_group_size: usize,

    /// Identifier and code columns that are always dropped
    pub excluded_columns: Vec<String>,

    /// Columns that can never be negative
    pub non_negative_columns: Vec<String>,

    /// Placeholder token for a missing categorical value
    pub missing_token: String,

    /// Replacement for the missing token
    pub missing_replacement: String,

    /// Maximum training cardinality routed to one-hot encoding.
    /// Columns with more categories are label encoded.
    pub max_onehot_categories: usize,

    /// Columns that get percentage-change features
    pub change_rate_columns: Vec<String>,

    /// Lookbacks (in hours) for the percentage-change features
    pub change_rate_lags: Vec<usize>,

    /// Whether to scale numeric features with the robust scaler
    pub scale_features: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            target_column: "Temperature".to_string(),
            significance_level: 0.05,
            redundancy_threshold: 0.95,
            min_group_size: 5,
            excluded_columns: to_strings(&[
                "WeatherCode",
                "StationID",
                "ObservationTime",
                "CurrentWeatherCode",
                "PastWeatherCode",
            ]),
            non_negative_columns: to_strings(&[
                "GustSpeed",
                "HourlyRainfall",
                "DailyRainfall",
                "CumulativeRainfall",
                "RainfallIntensity",
                "SnowDepth3Hr",
                "DailySnowDepth",
                "TotalSnowDepth",
                "LowestCloudHeight",
                "SunshineDuration",
                "SolarRadiation",
                "WaveHeight",
                "MaxWindForce",
            ]),
            missing_token: "-".to_string(),
            missing_replacement: "Other".to_string(),
            max_onehot_categories: 10,
            change_rate_columns: to_strings(&["Temperature", "WindSpeed", "RelativeHumidity"]),
            change_rate_lags: vec![1, 3, 6],
            scale_features: true,
        }
    }
}

impl FeatureConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the target column
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_column = target.into();
        self
    }

    /// Builder method to set the significance level
    pub fn with_significance_level(mut self, alpha: f64) -> Self {
        self.significance_level = alpha;
        self
    }

    /// Builder method to set the redundancy threshold
    pub fn with_redundancy_threshold(mut self, threshold: f64) -> Self {
        self.redundancy_threshold = threshold;
        self
    }

    /// Builder method to replace the fixed exclusion list
    pub fn with_excluded_columns(mut self, columns: &[&str]) -> Self {
        self.excluded_columns = to_strings(columns);
        self
    }

    /// Builder method to set the one-hot cardinality limit
    pub fn with_max_onehot_categories(mut self, max: usize) -> Self {
        self.max_onehot_categories = max;
        self
    }

    /// Builder method to enable or disable robust scaling
    pub fn with_scaling(mut self, enabled: bool) -> Self {
        self.scale_features = enabled;
        self
    }

    /// Columns exempt from every drop rule
    pub fn protected_columns(&self) -> Vec<String> {
        let mut cols = to_strings(&TIMESTAMP_COLUMNS);
        cols.push(self.target_column.clone());
        cols
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
