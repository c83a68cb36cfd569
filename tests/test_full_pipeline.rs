//! End-to-end tests: raw observations to promoted model and forecast

use std::f64::consts::PI;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Timelike};
use polars::prelude::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use weather_forecast::error::ForecastError;
use weather_forecast::inference::{ModelArtifact, PREDICTION_COLUMN};
use weather_forecast::prelude::*;

// ============================================================================
// Helpers
// ============================================================================

/// Hourly rows from 2024-01-01 00:00 with a linear temperature
fn synthetic_observations(n: usize, seed: u64) -> DataFrame {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let times: Vec<_> = (0..n).map(|i| start + Duration::hours(i as i64)).collect();

    let wind: Vec<f64> = (0..n)
        .map(|i| 5.0 + 3.0 * (2.0 * PI * i as f64 / 24.0).sin() + rng.gen_range(-0.1..0.1))
        .collect();
    let humidity: Vec<f64> = (0..n)
        .map(|i| 60.0 + 20.0 * (2.0 * PI * i as f64 / 37.0).cos() + rng.gen_range(-0.5..0.5))
        .collect();
    let temperature: Vec<f64> = wind
        .iter()
        .zip(&humidity)
        .map(|(w, h)| 10.0 + 0.5 * w + 0.2 * h)
        .collect();
    let clouds: Vec<&str> = (0..n)
        .map(|_| ["Cu", "St", "-"][rng.gen_range(0..3)])
        .collect();

    df!(
        "year" => times.iter().map(|t| t.year()).collect::<Vec<i32>>(),
        "month" => times.iter().map(|t| t.month() as i32).collect::<Vec<i32>>(),
        "day" => times.iter().map(|t| t.day() as i32).collect::<Vec<i32>>(),
        "hour" => times.iter().map(|t| t.hour() as i32).collect::<Vec<i32>>(),
        "StationID" => vec![108i32; n],
        "Temperature" => temperature,
        "WindSpeed" => wind,
        "RelativeHumidity" => humidity,
        "CloudType" => clouds
    )
    .unwrap()
}

fn small_config(output_dir: &Path) -> PipelineConfig {
    PipelineConfig::new()
        .with_output_dir(output_dir)
        .with_window(WindowConfig::new(48, 24))
        .with_training(TrainingConfig::new().with_n_estimators(20).with_random_seed(3))
        .with_sequence(
            SequenceConfig::new()
                .with_hidden_size(8)
                .with_num_layers(1)
                .with_epochs(2)
                .with_batch_size(32)
                .with_random_seed(3),
        )
}

fn validation_baseline(path: &Path) -> f64 {
    let df = ParquetReader::new(File::open(path).unwrap()).finish().unwrap();
    let labels: Vec<f64> = df
        .column(SHIFTED_TARGET)
        .unwrap()
        .f64()
        .unwrap()
        .into_no_null_iter()
        .collect();
    let mean = labels.iter().sum::<f64>() / labels.len() as f64;
    (labels.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / labels.len() as f64).sqrt()
}

// ============================================================================
// Full pipeline
// ============================================================================

#[test]
fn test_pipeline_beats_mean_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = ForecastPipeline::new(small_config(dir.path())).unwrap();

    let report = pipeline.run_frame(synthetic_observations(1000, 11)).unwrap();

    assert!(!report.ranking.is_empty());
    assert!(report.ranking.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(report.feature_selection.drops("StationID"));

    let baseline = validation_baseline(&report.frames.validation);
    let (best_name, best_rmse) = &report.ranking[0];
    assert!(
        *best_rmse < baseline,
        "{} rmse {} not below baseline {}",
        best_name,
        best_rmse,
        baseline
    );
}

#[test]
fn test_pipeline_promotes_and_forecasts() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config(dir.path());
    let pipeline = ForecastPipeline::new(config).unwrap();

    let report = pipeline.run_frame(synthetic_observations(1000, 5)).unwrap();

    // Every fitted candidate is tracked; only the top-k keep an artifact
    assert_eq!(report.runs.len(), report.ranking.len());
    let names: Vec<&str> = report.runs.iter().map(|r| r.name.as_str()).collect();
    let ranked: Vec<&str> = report.ranking.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ranked);
    let kept_trees = report
        .runs
        .iter()
        .filter(|r| r.name != "gru" && r.artifact.is_some())
        .count();
    let fitted_trees = ranked.iter().filter(|n| **n != "gru").count();
    assert_eq!(kept_trees, fitted_trees.min(3));
    assert!(report.runs.iter().all(|r| r.experiment == report.experiment));

    // Only the horizon-length sequence model is served
    assert_eq!(report.promoted.name, "gru");
    assert!(report.runs.iter().any(|r| r.run_id == report.promoted.run_id));
    let best_gru = report
        .runs
        .iter()
        .filter(|r| r.name == "gru")
        .map(|r| r.metric("rmse").unwrap())
        .fold(f64::INFINITY, f64::min);
    assert_eq!(report.promoted.metric("rmse").unwrap(), best_gru);

    // The promoted artifact is self-contained
    let artifact = ModelArtifact::load(report.promoted.artifact.as_ref().unwrap()).unwrap();
    assert_eq!(artifact.seq_len, 48);
    assert_eq!(artifact.horizon, 24);
    assert!(artifact.schema.is_fitted());

    // One value per horizon hour
    assert_eq!(report.forecast.len(), 24);
    assert_eq!(report.recommendations.len(), 24);

    // The last observation is 2024-02-11 15:00 (row 999)
    let first = NaiveDate::from_ymd_opt(2024, 2, 11).unwrap().and_hms_opt(16, 0, 0).unwrap();
    assert_eq!(report.forecast.timestamps[0], first);
    assert_eq!(report.forecast.timestamps[23], first + Duration::hours(23));

    let frame = ParquetReader::new(File::open(&report.frames.inference).unwrap())
        .finish()
        .unwrap();
    assert_eq!(frame.height(), 24);
    assert!(frame.column(PREDICTION_COLUMN).is_ok());
    assert!(frame.column("day_of_week").is_ok());

    for path in [&report.frames.train, &report.frames.validation, &report.frames.latest] {
        assert!(path.exists(), "{} missing", path.display());
    }
}

#[test]
fn test_pipeline_reads_partitioned_csv() {
    let data_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let raw = synthetic_observations(800, 2);

    for month in [1i32, 2] {
        let mut part = raw
            .clone()
            .lazy()
            .filter(col("month").eq(lit(month)))
            .collect()
            .unwrap();
        let dir = data_dir.path().join(format!("year=2024/month={:02}", month));
        fs::create_dir_all(&dir).unwrap();
        let file = File::create(dir.join("observations.csv")).unwrap();
        CsvWriter::new(file).finish(&mut part).unwrap();
    }

    let config = small_config(out_dir.path())
        .with_data_dir(data_dir.path())
        .with_start_year(2024)
        .with_training(
            TrainingConfig::new()
                .with_candidates(vec![CandidateKind::RandomForest, CandidateKind::Gru])
                .with_n_estimators(10),
        );
    let report = ForecastPipeline::new(config).unwrap().run().unwrap();

    assert_eq!(report.ranking.len(), 2);
    assert_eq!(report.runs.len(), 2);
    assert_eq!(report.forecast.len(), 24);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_short_history_fails_in_split_stage() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = ForecastPipeline::new(small_config(dir.path())).unwrap();

    let err = pipeline.run_frame(synthetic_observations(60, 1)).unwrap_err();
    assert!(matches!(err, ForecastError::Stage { stage: "split", .. }), "{}", err);
}

#[test]
fn test_missing_target_fails_in_selection_stage() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = ForecastPipeline::new(small_config(dir.path())).unwrap();
    let raw = synthetic_observations(200, 1).drop("Temperature").unwrap();

    let err = pipeline.run_frame(raw).unwrap_err();
    assert!(err.to_string().starts_with("select_features stage failed"), "{}", err);
}

#[test]
fn test_training_failure_keeps_stage_frames() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(LocalArtifactStore::new(dir.path()));
    let tracker = Arc::new(LocalExperimentStore::new(dir.path(), "frames_survive").unwrap());
    // A GRU alone cannot fit with a window longer than the training block
    let config = small_config(dir.path())
        .with_window(WindowConfig::new(400, 300))
        .with_training(TrainingConfig::new().with_candidates(vec![CandidateKind::Gru]));
    let pipeline = ForecastPipeline::with_stores(config, artifacts, tracker);

    let err = pipeline.run_frame(synthetic_observations(1000, 4)).unwrap_err();
    assert!(matches!(err, ForecastError::Stage { stage: "train", .. }), "{}", err);
    for logical in ["train", "validation", "latest"] {
        assert!(dir.path().join(logical).is_dir(), "{} frame missing", logical);
    }
}

#[test]
fn test_sequence_failure_fails_promotion_after_tracking_trees() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(LocalArtifactStore::new(dir.path()));
    let tracker = Arc::new(LocalExperimentStore::new(dir.path(), "no_sequence").unwrap());
    // The training block is too short for one GRU window but fine for a forest
    let config = small_config(dir.path())
        .with_window(WindowConfig::new(400, 300))
        .with_training(
            TrainingConfig::new()
                .with_candidates(vec![CandidateKind::RandomForest, CandidateKind::Gru])
                .with_n_estimators(10),
        );
    let pipeline = ForecastPipeline::with_stores(config, artifacts, tracker.clone());

    let err = pipeline.run_frame(synthetic_observations(1000, 4)).unwrap_err();
    match err {
        ForecastError::Stage { stage: "promote", source } => {
            assert!(matches!(*source, ForecastError::TrackingError(_)), "{}", source)
        }
        other => panic!("expected a promote stage failure, got {}", other),
    }
    let runs = tracker.runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].name, "random_forest");
}

#[test]
fn test_empty_data_dir_fails_in_load_stage() {
    let data_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let config = small_config(out_dir.path())
        .with_data_dir(data_dir.path())
        .with_start_year(2024);

    let err = ForecastPipeline::new(config).unwrap().run().unwrap_err();
    assert!(matches!(err, ForecastError::Stage { stage: "load", .. }), "{}", err);
}
