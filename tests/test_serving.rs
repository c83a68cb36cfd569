//! Integration test: serving flow
//! Tests: fit schema + model → save artifact → load → forecast latest → advice

use chrono::{NaiveDate, NaiveDateTime, Utc};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use weather_forecast::error::ForecastError;
use weather_forecast::inference::{
    recommend, Forecaster, ModelArtifact, Outfit, Sensitivity, PREDICTION_COLUMN,
};
use weather_forecast::preprocessing::{Encoder, RobustScaler};
use weather_forecast::timeseries::{columns_to_array2, SequenceDataset, SHIFTED_TARGET};
use weather_forecast::training::{GruRegressor, RandomForest, SequenceConfig, TrainedModel};

fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
}

/// 30 hourly rows ending at 2024-01-31 23:00
fn recent_rows() -> DataFrame {
    let hours: Vec<i32> = (0..30).map(|i| (i + 18) % 24).collect();
    let days: Vec<i32> = (0..30).map(|i| if i < 6 { 30 } else { 31 }).collect();
    df!(
        "year" => vec![2024i32; 30],
        "month" => vec![1i32; 30],
        "day" => days,
        "hour" => hours,
        "Temperature" => (0..30).map(|i| 2.0 + i as f64 * 0.3).collect::<Vec<_>>(),
        "WindSpeed" => (0..30).map(|i| (i % 5) as f64).collect::<Vec<_>>(),
        "Sky" => (0..30).map(|i| if i % 2 == 0 { "Clear" } else { "Cloudy" }).collect::<Vec<_>>()
    )
    .unwrap()
}

fn tabular_artifact(df: &DataFrame) -> ModelArtifact {
    let mut scaler = RobustScaler::new();
    scaler.fit(df, &["WindSpeed".to_string()]).unwrap();
    let scaled = scaler.transform(df).unwrap();
    let schema = Encoder::default().fit(&scaled).unwrap();
    let encoded = schema.apply(&scaled).unwrap();
    let x = columns_to_array2(&encoded, schema.output_columns()).unwrap();
    let y = x.column(4).mapv(|t| t + 0.3);

    let mut forest = RandomForest::new(8).with_random_state(9);
    forest.fit(&x, &y).unwrap();
    ModelArtifact {
        model: TrainedModel::RandomForest(forest),
        schema,
        scaler: Some(scaler),
        target: "Temperature".to_string(),
        label: SHIFTED_TARGET.to_string(),
        seq_len: 12,
        horizon: 6,
        created_at: Utc::now(),
    }
}

#[test]
fn test_saved_artifact_forecasts_next_hour() {
    let dir = tempfile::tempdir().unwrap();
    let rows = recent_rows();
    let path = dir.path().join("model.json");
    tabular_artifact(&rows).save(&path).unwrap();

    let forecaster = Forecaster::load(&path).unwrap();
    let forecast = forecaster.forecast_latest(&rows).unwrap();

    assert_eq!(forecast.len(), 1);
    // 2024-01-31 23:00 rolls into February
    assert_eq!(forecast.timestamps, vec![at(2024, 2, 1, 0)]);
    assert!(forecast.values[0].is_finite());

    let frame = forecast.to_frame().unwrap();
    let month = frame.column("month").unwrap().i32().unwrap().get(0);
    assert_eq!(month, Some(2));
    let weekday = frame.column("day_of_week").unwrap().str().unwrap().get(0);
    assert_eq!(weekday, Some("Thursday"));
    assert!(frame.column(PREDICTION_COLUMN).is_ok());
}

#[test]
fn test_serving_tolerates_drifted_columns() {
    let rows = recent_rows();
    let forecaster = Forecaster::new(tabular_artifact(&rows));

    let mut drifted = rows.drop("WindSpeed").unwrap();
    drifted
        .with_column(Series::new("Sky".into(), vec!["Hail"; 30]))
        .unwrap();
    drifted
        .with_column(Series::new("Pressure".into(), vec![1013.0; 30]))
        .unwrap();

    let forecast = forecaster.forecast_latest(&drifted).unwrap();
    assert_eq!(forecast.len(), 1);
}

#[test]
fn test_sequence_artifact_needs_full_window() {
    let rows = recent_rows();
    let schema = Encoder::default().fit(&rows).unwrap();
    let x = columns_to_array2(&schema.apply(&rows).unwrap(), schema.output_columns()).unwrap();
    let y: Array1<f64> = x.column(4).to_owned();
    let train = SequenceDataset::from_arrays(x.clone(), y.clone(), 12, 6).unwrap();
    let empty = SequenceDataset::from_arrays(Array2::zeros((0, x.ncols())), Array1::zeros(0), 12, 6).unwrap();

    let mut gru = GruRegressor::new(
        SequenceConfig::new()
            .with_hidden_size(4)
            .with_num_layers(1)
            .with_epochs(2)
            .with_batch_size(4),
    );
    gru.fit(&train, &empty).unwrap();
    let forecaster = Forecaster::new(ModelArtifact {
        model: TrainedModel::Gru(gru),
        schema,
        scaler: None,
        target: "Temperature".to_string(),
        label: SHIFTED_TARGET.to_string(),
        seq_len: 12,
        horizon: 6,
        created_at: Utc::now(),
    });

    let forecast = forecaster.forecast_latest(&rows).unwrap();
    assert_eq!(forecast.len(), 6);
    assert_eq!(forecast.timestamps[0], at(2024, 2, 1, 0));
    assert_eq!(forecast.timestamps[5], at(2024, 2, 1, 5));

    let short = rows.tail(Some(5));
    assert!(matches!(
        forecaster.forecast_latest(&short),
        Err(ForecastError::ShapeError { .. })
    ));
}

#[test]
fn test_missing_artifact_is_data_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Forecaster::load(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ForecastError::DataError(_)));
}

#[test]
fn test_forecast_recommendations_apply_sensitivity() {
    let rows = recent_rows();
    let forecast = Forecaster::new(tabular_artifact(&rows))
        .forecast_latest(&rows)
        .unwrap();

    let normal = forecast.recommendations(Sensitivity::Normal);
    let cold = forecast.recommendations(Sensitivity::Cold);
    assert_eq!(normal[0].0, cold[0].0);
    assert!((normal[0].1.felt - cold[0].1.felt - 2.0).abs() < 1e-12);

    assert_eq!(recommend(13.5, Sensitivity::Hot).outfit, Outfit::LongSleevesJacket);
    assert_eq!(recommend(11.0, Sensitivity::Cold).outfit, Outfit::HeavyCoat);
}
