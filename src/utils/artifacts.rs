//! Date-partitioned artifact storage
//!
//! Every stage output is written under
//! `root/<logical>/year=%Y/month=%m/<logical>_%Y.%m.%d_%H%M.<ext>`.

use crate::error::{ForecastError, Result};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Persistence for intermediate frames and model files
pub trait ArtifactStore: Send + Sync {
    /// Fresh, non-colliding path for a new artifact of kind `logical`
    fn allocate(&self, logical: &str, extension: &str) -> Result<PathBuf>;

    /// Write a frame as parquet and return its path
    fn write_frame(&self, df: &DataFrame, logical: &str) -> Result<PathBuf> {
        let path = self.allocate(logical, "parquet")?;
        let mut df = df.clone();
        ParquetWriter::new(File::create(&path)?).finish(&mut df)?;
        debug!(logical, rows = df.height(), path = %path.display(), "Frame written");
        Ok(path)
    }

    fn read_frame(&self, path: &Path) -> Result<DataFrame> {
        if !path.exists() {
            return Err(ForecastError::DataError(format!(
                "artifact {} does not exist",
                path.display()
            )));
        }
        Ok(ParquetReader::new(File::open(path)?).finish()?)
    }
}

/// Artifact store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Partitioned path for an artifact created at `at`.
    ///
    /// A uuid suffix is added when the minute-resolution name already exists.
    pub fn allocate_at(&self, logical: &str, extension: &str, at: DateTime<Utc>) -> Result<PathBuf> {
        let dir = self
            .root
            .join(logical)
            .join(at.format("year=%Y").to_string())
            .join(at.format("month=%m").to_string());
        fs::create_dir_all(&dir)?;

        let stem = format!("{}_{}", logical, at.format("%Y.%m.%d_%H%M"));
        let path = dir.join(format!("{}.{}", stem, extension));
        if !path.exists() {
            return Ok(path);
        }
        let suffix = Uuid::new_v4().simple().to_string();
        Ok(dir.join(format!("{}_{}.{}", stem, &suffix[..8], extension)))
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn allocate(&self, logical: &str, extension: &str) -> Result<PathBuf> {
        self.allocate_at(logical, extension, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_uses_month_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let at = DateTime::parse_from_rfc3339("2024-03-05T07:45:00Z").unwrap().with_timezone(&Utc);

        let path = store.allocate_at("train", "parquet", at).unwrap();
        assert_eq!(
            path,
            dir.path().join("train/year=2024/month=03/train_2024.03.05_0745.parquet")
        );
    }

    #[test]
    fn test_colliding_names_get_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let at = DateTime::parse_from_rfc3339("2024-03-05T07:45:00Z").unwrap().with_timezone(&Utc);

        let first = store.allocate_at("latest", "parquet", at).unwrap();
        File::create(&first).unwrap();
        let second = store.allocate_at("latest", "parquet", at).unwrap();
        assert_ne!(first, second);
        assert_eq!(first.parent(), second.parent());
    }

    #[test]
    fn test_frame_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let df = df!("hour" => &[0i32, 1, 2], "Temperature" => &[1.5, 2.5, 3.5]).unwrap();

        let path = store.write_frame(&df, "validation").unwrap();
        assert!(path.starts_with(dir.path().join("validation")));
        let loaded = store.read_frame(&path).unwrap();
        assert!(loaded.equals(&df));
    }

    #[test]
    fn test_missing_artifact() {
        let store = LocalArtifactStore::new("/nonexistent");
        assert!(store.read_frame(Path::new("/nonexistent/x.parquet")).is_err());
    }
}
