//! Data loading from date-partitioned directories

use crate::error::{ForecastError, Result};
use chrono::{Datelike, Local, NaiveDate};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Inclusive range of calendar months to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start_year: i32,
    pub end: NaiveDate,
}

impl DateRange {
    /// January of `start_year` through the current month
    pub fn since_year(start_year: i32) -> Self {
        Self {
            start_year,
            end: Local::now().date_naive(),
        }
    }

    pub fn new(start_year: i32, end: NaiveDate) -> Self {
        Self { start_year, end }
    }

    /// Every (year, month) in the range, in order
    pub fn months(&self) -> Vec<(i32, u32)> {
        let mut months = Vec::new();
        for year in self.start_year..=self.end.year() {
            let last = if year == self.end.year() { self.end.month() } else { 12 };
            months.extend((1..=last).map(|m| (year, m)));
        }
        months
    }
}

/// Anything that yields the raw observation frame for a date range
pub trait DataSource: Send + Sync {
    fn load(&self, range: &DateRange) -> Result<DataFrame>;
}

/// Reads `root/year=YYYY/month=MM/**/*.{parquet,csv}`
#[derive(Debug, Clone)]
pub struct PartitionedSource {
    root: PathBuf,
}

impl PartitionedSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Data files for the months in `range`, sorted by path
    pub fn files(&self, range: &DateRange) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for (year, month) in range.months() {
            let year_dir = self.root.join(format!("year={}", year));
            for month_dir in [format!("month={:02}", month), format!("month={}", month)] {
                let dir = year_dir.join(&month_dir);
                if dir.is_dir() {
                    collect_data_files(&dir, &mut files)?;
                    break;
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

impl DataSource for PartitionedSource {
    fn load(&self, range: &DateRange) -> Result<DataFrame> {
        let files = self.files(range)?;
        if files.is_empty() {
            return Err(ForecastError::DataError(format!(
                "no parquet or csv files under {} for {}-01 to {}",
                self.root.display(),
                range.start_year,
                range.end.format("%Y-%m")
            )));
        }

        let frames: Vec<LazyFrame> = files
            .iter()
            .map(|path| {
                debug!(path = %path.display(), "Reading partition file");
                load_file(path).map(DataFrame::lazy)
            })
            .collect::<Result<_>>()?;

        // Partitions may carry different columns; missing ones become null
        let df = concat_lf_diagonal(
            frames,
            UnionArgs {
                to_supertypes: true,
                ..Default::default()
            },
        )?
        .collect()?;

        if df.height() == 0 {
            return Err(ForecastError::DataError(format!(
                "{} files under {} contained no rows",
                files.len(),
                self.root.display()
            )));
        }
        info!(files = files.len(), rows = df.height(), "Loaded observations");
        Ok(df)
    }
}

fn collect_data_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_data_files(&path, out)?;
        } else if matches!(extension(&path).as_deref(), Some("parquet") | Some("csv")) {
            out.push(path);
        }
    }
    Ok(())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Load one CSV or Parquet file
pub fn load_file(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)?;
    match extension(path).as_deref() {
        Some("parquet") => Ok(ParquetReader::new(file).finish()?),
        Some("csv") => Ok(CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(1000))
            .into_reader_with_file_handle(file)
            .finish()?),
        _ => Err(ForecastError::DataError(format!(
            "unsupported file type: {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(path: &Path, rows: &[(i32, u32, u32, u32, f64)]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = File::create(path).unwrap();
        writeln!(file, "year,month,day,hour,Temperature").unwrap();
        for (y, m, d, h, t) in rows {
            writeln!(file, "{},{},{},{},{}", y, m, d, h, t).unwrap();
        }
    }

    #[test]
    fn test_months_span_years() {
        let range = DateRange::new(2023, NaiveDate::from_ymd_opt(2024, 2, 10).unwrap());
        let months = range.months();
        assert_eq!(months.len(), 14);
        assert_eq!(months[0], (2023, 1));
        assert_eq!(*months.last().unwrap(), (2024, 2));
    }

    #[test]
    fn test_partitioned_source_reads_months_in_range() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_csv(&root.join("year=2024/month=01/a.csv"), &[(2024, 1, 1, 0, 1.5), (2024, 1, 1, 1, 2.5)]);
        write_csv(&root.join("year=2024/month=02/nested/b.csv"), &[(2024, 2, 1, 0, 3.5)]);
        write_csv(&root.join("year=2022/month=05/old.csv"), &[(2022, 5, 1, 0, 9.0)]);

        let source = PartitionedSource::new(root);
        let range = DateRange::new(2023, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        let df = source.load(&range).unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(source.files(&range).unwrap().len(), 2);
    }

    #[test]
    fn test_partitions_with_different_columns_are_unioned() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_csv(&root.join("year=2024/month=01/a.csv"), &[(2024, 1, 1, 0, 1.5), (2024, 1, 1, 1, 2.5)]);
        let newer = root.join("year=2024/month=02/b.csv");
        fs::create_dir_all(newer.parent().unwrap()).unwrap();
        let mut file = File::create(&newer).unwrap();
        writeln!(file, "year,month,day,hour,Temperature,WindSpeed").unwrap();
        writeln!(file, "2024,2,1,0,3.5,4.0").unwrap();

        let source = PartitionedSource::new(root);
        let range = DateRange::new(2024, NaiveDate::from_ymd_opt(2024, 2, 28).unwrap());
        let df = source.load(&range).unwrap();

        assert_eq!(df.height(), 3);
        let wind: Vec<Option<f64>> = df.column("WindSpeed").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(wind, vec![None, None, Some(4.0)]);
        assert_eq!(df.column("Temperature").unwrap().null_count(), 0);
    }

    #[test]
    fn test_no_files_is_a_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = PartitionedSource::new(dir.path());
        let range = DateRange::new(2024, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert!(matches!(source.load(&range), Err(ForecastError::DataError(_))));
    }

    #[test]
    fn test_empty_files_are_a_data_error() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(&dir.path().join("year=2024/month=01/empty.csv"), &[]);
        let source = PartitionedSource::new(dir.path());
        let range = DateRange::new(2024, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert!(source.load(&range).is_err());
    }
}
