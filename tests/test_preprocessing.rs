//! Integration tests for feature engineering: selection, transforms, encoding

use polars::prelude::*;
use weather_forecast::error::ForecastError;
use weather_forecast::preprocessing::{
    DropReason, Encoder, FeatureConfig, FeatureSelector, FeatureTransformer, FittedSchema,
    RobustScaler, UNSEEN_CODE,
};

fn observations() -> DataFrame {
    let n = 48usize;
    let temp: Vec<f64> = (0..n).map(|i| 5.0 + (i % 24) as f64 * 0.5).collect();
    df!(
        "year" => vec![2024i32; n],
        "month" => vec![3i32; n],
        "day" => (0..n).map(|i| 1 + (i / 24) as i32).collect::<Vec<_>>(),
        "hour" => (0..n).map(|i| (i % 24) as i32).collect::<Vec<_>>(),
        "StationID" => (0..n).map(|i| i as i32).collect::<Vec<_>>(),
        "Temperature" => temp.clone(),
        "DewPoint" => temp.iter().map(|t| t - 3.0).collect::<Vec<_>>(),
        "WindSpeed" => (0..n).map(|i| (i % 7) as f64).collect::<Vec<_>>(),
        "HourlyRainfall" => (0..n).map(|i| if i % 5 == 0 { -1.0 } else { 0.2 }).collect::<Vec<_>>(),
        "Noise" => (0..n).map(|i| ((i * 37) % 11) as f64).collect::<Vec<_>>(),
        "Sky" => (0..n).map(|i| if i % 24 < 12 { "Clear" } else { "-" }).collect::<Vec<_>>()
    )
    .unwrap()
}

fn names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|c| c.to_string()).collect()
}

// ============================================================================
// Selection + transforms
// ============================================================================

#[test]
fn test_selection_is_deterministic_and_keeps_timestamps() {
    let config = FeatureConfig::default();
    let prepared = FeatureTransformer::new(config.clone()).prepare(&observations()).unwrap();
    let selector = FeatureSelector::new(config);

    let first = selector.select(&prepared, "Temperature").unwrap();
    let second = selector.select(&prepared, "Temperature").unwrap();
    assert_eq!(first.dropped, second.dropped);

    assert!(first.drops("StationID"));
    assert!(first
        .decisions
        .iter()
        .any(|d| d.column == "StationID" && d.reason == DropReason::Excluded));
    for kept in ["year", "month", "day", "hour", "Temperature"] {
        assert!(!first.drops(kept), "{} was dropped", kept);
    }

    let selected = selector.apply(&prepared, &first, "Temperature").unwrap();
    assert_eq!(&names(&selected)[..5], &["year", "month", "day", "hour", "Temperature"]);
}

#[test]
fn test_prepare_then_derive() {
    let transformer = FeatureTransformer::new(FeatureConfig::default());
    let prepared = transformer.prepare(&observations()).unwrap();

    let rain = prepared.column("HourlyRainfall").unwrap().f64().unwrap();
    assert!(rain.into_no_null_iter().all(|v| v >= 0.0));
    let sky = prepared.column("Sky").unwrap().str().unwrap();
    assert!(sky.into_no_null_iter().all(|v| v != "-"));

    let derived = transformer.derive(&prepared).unwrap();
    for column in ["season", "hour_sin", "hour_cos", "feels_like_temp", "Temperature_change_1h"] {
        assert!(derived.column(column).is_ok(), "{} missing", column);
    }
    assert_eq!(derived.height(), prepared.height());
}

// ============================================================================
// Encoding + scaling
// ============================================================================

#[test]
fn test_schema_survives_persistence_and_conforms_new_frames() {
    let dir = tempfile::tempdir().unwrap();
    let train = FeatureTransformer::new(FeatureConfig::default())
        .prepare(&observations())
        .unwrap();
    let schema = Encoder::from_config(&FeatureConfig::default()).fit(&train).unwrap();
    let path = dir.path().join("schema.json");
    schema.save(&path).unwrap();
    let loaded = FittedSchema::load(&path).unwrap();
    assert_eq!(loaded, schema);

    // Unseen category, a missing column and an extra column
    let mut serving = train.slice(0, 3).drop("WindSpeed").unwrap();
    serving
        .with_column(Series::new("Sky".into(), vec!["Hail", "Clear", "Fog"]))
        .unwrap();
    serving
        .with_column(Series::new("Visibility".into(), vec![10.0, 9.0, 8.0]))
        .unwrap();

    let out = loaded.apply(&serving).unwrap();
    assert_eq!(names(&out), loaded.output_columns().to_vec());
    let wind = out.column("WindSpeed").unwrap().f64().unwrap();
    assert!(wind.into_no_null_iter().all(|v| v == 0.0));
    assert!(out.column("Visibility").is_err());

    // Sky has two training levels, so it is one-hot encoded
    let clear = out.column("Sky_Clear").unwrap().f64().unwrap();
    assert_eq!(clear.into_no_null_iter().collect::<Vec<_>>(), vec![0.0, 1.0, 0.0]);

    match loaded.validate(&serving) {
        Err(ForecastError::SchemaError { missing, unexpected }) => {
            assert_eq!(missing, vec!["WindSpeed".to_string()]);
            assert_eq!(unexpected, vec!["Visibility".to_string()]);
        }
        other => panic!("expected schema error, got {:?}", other),
    }
}

#[test]
fn test_label_encoding_for_high_cardinality() {
    let df = df!(
        "hour" => &[0i32, 1, 2, 3],
        "Station" => &["a", "b", "c", "d"]
    )
    .unwrap();
    let schema = Encoder::new(2).fit(&df).unwrap();
    let unseen = df!("hour" => &[4i32], "Station" => &["z"]).unwrap();

    let out = schema.apply(&unseen).unwrap();
    let codes = out.column("Station").unwrap().f64().unwrap();
    assert_eq!(codes.get(0), Some(UNSEEN_CODE));
}

#[test]
fn test_scaler_then_encoder_uses_training_statistics() {
    let train = df!(
        "hour" => &[0i32, 1, 2, 3, 4],
        "WindSpeed" => &[1.0, 2.0, 3.0, 4.0, 5.0]
    )
    .unwrap();
    let mut scaler = RobustScaler::new();
    scaler.fit(&train, &["WindSpeed".to_string()]).unwrap();
    let schema = Encoder::default().fit(&scaler.transform(&train).unwrap()).unwrap();

    let later = df!("hour" => &[5i32], "WindSpeed" => &[7.0]).unwrap();
    let out = schema.apply(&scaler.transform(&later).unwrap()).unwrap();
    // median 3, IQR 2
    let wind = out.column("WindSpeed").unwrap().f64().unwrap();
    assert_eq!(wind.get(0), Some(2.0));
    assert_eq!(out.column("hour").unwrap().f64().unwrap().get(0), Some(5.0));
}
