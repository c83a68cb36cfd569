//! Experiment tracking
//!
//! Every fitted candidate is registered as one immutable run record holding
//! its parameters, validation metrics and the path of its model artifact.
//! Records are append-only; promotion queries the store for the best run.

mod storage;

pub use storage::LocalExperimentStore;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One registered run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// `<name>_<yyyymmdd_HHMM>_<uuid8>`
    pub run_id: String,
    /// Candidate name
    pub name: String,
    /// Label shared by the runs of one pipeline invocation
    pub experiment: String,
    pub created_at: DateTime<Utc>,
    pub params: serde_json::Value,
    pub metrics: BTreeMap<String, f64>,
    pub artifact: Option<PathBuf>,
}

impl RunRecord {
    pub fn new(
        name: &str,
        experiment: &str,
        params: serde_json::Value,
        metrics: BTreeMap<String, f64>,
        artifact: Option<&Path>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            run_id: run_id(name, created_at),
            name: name.to_string(),
            experiment: experiment.to_string(),
            created_at,
            params,
            // JSON has no NaN
            metrics: metrics.into_iter().filter(|(_, v)| v.is_finite()).collect(),
            artifact: artifact.map(Path::to_path_buf),
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied().filter(|v| v.is_finite())
    }
}

/// Build a unique run id from a name and a timestamp
pub fn run_id(name: &str, at: DateTime<Utc>) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", name, at.format("%Y%m%d_%H%M"), &uuid[..8])
}

/// Restricts which runs a query considers
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Accepted run names; empty accepts any
    pub names: Vec<String>,
    pub experiment: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl RunFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept runs named `name`; repeated calls accept any of the names
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    pub fn with_experiment(mut self, experiment: impl Into<String>) -> Self {
        self.experiment = Some(experiment.into());
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, run: &RunRecord) -> bool {
        (self.names.is_empty() || self.names.contains(&run.name))
            && self.experiment.as_ref().map_or(true, |e| &run.experiment == e)
            && self.since.map_or(true, |s| run.created_at >= s)
    }
}

/// Append-only store of run records
pub trait ExperimentStore: Send + Sync {
    /// Persist a record; fails if its run id is already registered
    fn append(&self, record: &RunRecord) -> Result<()>;

    /// All records, oldest first
    fn runs(&self) -> Result<Vec<RunRecord>>;

    /// Experiment label stamped on new records
    fn experiment(&self) -> &str;

    /// Create and persist a record for a fitted model
    fn register_run(
        &self,
        name: &str,
        params: serde_json::Value,
        metrics: BTreeMap<String, f64>,
        artifact: Option<&Path>,
    ) -> Result<RunRecord> {
        let record = RunRecord::new(name, self.experiment(), params, metrics, artifact);
        self.append(&record)?;
        Ok(record)
    }

    /// Matching run with the smallest finite value of `metric`.
    ///
    /// Ties go to the earlier run.
    fn query_best(&self, metric: &str, filter: &RunFilter) -> Result<Option<RunRecord>> {
        Ok(self
            .runs()?
            .into_iter()
            .filter(|r| filter.matches(r))
            .filter_map(|r| r.metric(metric).map(|v| (v, r)))
            .min_by(|(a, ra), (b, rb)| {
                a.partial_cmp(b)
                    .unwrap_or(Ordering::Equal)
                    .then(ra.created_at.cmp(&rb.created_at))
                    .then(ra.run_id.cmp(&rb.run_id))
            })
            .map(|(_, r)| r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_format() {
        let at = DateTime::parse_from_rfc3339("2024-03-05T07:09:00Z").unwrap().with_timezone(&Utc);
        let id = run_id("random_forest", at);
        assert!(id.starts_with("random_forest_20240305_0709_"), "{}", id);
        assert_eq!(id.len(), "random_forest_20240305_0709_".len() + 8);
        assert_ne!(id, run_id("random_forest", at));
    }

    #[test]
    fn test_filter_matching() {
        let record = RunRecord::new("gru", "exp-1", serde_json::Value::Null, BTreeMap::new(), None);
        assert!(RunFilter::new().matches(&record));
        assert!(RunFilter::new().with_name("gru").with_experiment("exp-1").matches(&record));
        assert!(!RunFilter::new().with_experiment("exp-2").matches(&record));
        assert!(RunFilter::new().with_name("random_forest").with_name("gru").matches(&record));
        assert!(!RunFilter::new().with_name("random_forest").matches(&record));
        assert!(!RunFilter::new()
            .with_since(record.created_at + chrono::Duration::hours(1))
            .matches(&record));
    }
}
