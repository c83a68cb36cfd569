//! Local file system run store
//!
//! One pretty-printed JSON file per run under `<root>/runs/`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{ExperimentStore, RunRecord};
use crate::error::{ForecastError, Result};

/// Run store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalExperimentStore {
    base_dir: PathBuf,
    experiment: String,
}

impl LocalExperimentStore {
    /// Open (and create if needed) a store under `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>, experiment: impl Into<String>) -> Result<Self> {
        let store = Self {
            base_dir: base_dir.into(),
            experiment: experiment.into(),
        };
        fs::create_dir_all(store.runs_dir())?;
        Ok(store)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base_dir.join("runs")
    }

    fn run_file(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{}.json", run_id))
    }

    fn read_record(path: &Path) -> Result<RunRecord> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

impl ExperimentStore for LocalExperimentStore {
    fn append(&self, record: &RunRecord) -> Result<()> {
        let path = self.run_file(&record.run_id);
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ForecastError::TrackingError(format!(
                    "run '{}' is already registered",
                    record.run_id
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, record)?;
        writer.flush()?;
        debug!(run_id = %record.run_id, path = %path.display(), "Run registered");
        Ok(())
    }

    fn runs(&self) -> Result<Vec<RunRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.runs_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable run record"),
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.run_id.cmp(&b.run_id)));
        Ok(records)
    }

    fn experiment(&self) -> &str {
        &self.experiment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::RunFilter;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn metrics(rmse: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([("rmse".to_string(), rmse), ("mae".to_string(), rmse / 2.0)])
    }

    #[test]
    fn test_register_and_list_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalExperimentStore::new(dir.path(), "exp").unwrap();

        let a = store.register_run("random_forest", json!({"n_estimators": 10}), metrics(3.2), None).unwrap();
        let b = store
            .register_run("gru", json!({"hidden_size": 8}), metrics(1.1), Some(Path::new("/tmp/gru.json")))
            .unwrap();

        let runs = store.runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.contains(&a));
        assert!(runs.contains(&b));
        assert!(store.runs_dir().join(format!("{}.json", b.run_id)).exists());
    }

    #[test]
    fn test_duplicate_run_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalExperimentStore::new(dir.path(), "exp").unwrap();
        let record = RunRecord::new("extra_trees", "exp", json!({}), metrics(2.0), None);

        store.append(&record).unwrap();
        let before = fs::read_to_string(store.run_file(&record.run_id)).unwrap();
        assert!(matches!(store.append(&record), Err(ForecastError::TrackingError(_))));
        // the original record is untouched
        assert_eq!(fs::read_to_string(store.run_file(&record.run_id)).unwrap(), before);
    }

    #[test]
    fn test_query_best_picks_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalExperimentStore::new(dir.path(), "exp").unwrap();
        store.register_run("a", json!({}), metrics(3.2), None).unwrap();
        let best = store.register_run("b", json!({}), metrics(1.1), None).unwrap();
        store.register_run("c", json!({}), metrics(5.6), None).unwrap();
        store.register_run("nan", json!({}), metrics(f64::NAN), None).unwrap();

        let found = store.query_best("rmse", &RunFilter::new()).unwrap().unwrap();
        assert_eq!(found.run_id, best.run_id);

        let filtered = store.query_best("rmse", &RunFilter::new().with_name("c")).unwrap().unwrap();
        assert_eq!(filtered.name, "c");
        assert!(store.query_best("mape", &RunFilter::new()).unwrap().is_none());
        assert!(store
            .query_best("rmse", &RunFilter::new().with_experiment("other"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unreadable_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalExperimentStore::new(dir.path(), "exp").unwrap();
        fs::write(store.runs_dir().join("broken.json"), "{not json").unwrap();
        fs::write(store.runs_dir().join("notes.txt"), "ignored").unwrap();
        store.register_run("a", json!({}), metrics(1.0), None).unwrap();
        assert_eq!(store.runs().unwrap().len(), 1);
    }
}
