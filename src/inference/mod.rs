//! Serving
//!
//! Loads a promoted model artifact, prepares the latest observation window
//! with the frozen schema and scaler, and produces timestamped hourly
//! forecasts plus clothing advice.

mod artifact;
mod clothing;
mod engine;

pub use artifact::ModelArtifact;
pub use clothing::{recommend, Outfit, Recommendation, Sensitivity};
pub use engine::{last_timestamp, Forecast, Forecaster, PREDICTION_COLUMN};
