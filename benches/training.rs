use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use weather_forecast::timeseries::SequenceDataset;
use weather_forecast::training::{
    CandidateKind, GruRegressor, ModelSelector, SequenceConfig, TrainingConfig, TrainingData,
};

fn create_training_data(n_rows: usize, n_features: usize, seq_len: usize, horizon: usize) -> TrainingData {
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let make = |rng: &mut ChaCha8Rng, n: usize| {
        let x = Array2::from_shape_fn((n, n_features), |_| rng.gen::<f64>() * 10.0);
        let y: Array1<f64> = x.rows().into_iter().map(|r| r.sum() + rng.gen::<f64>() * 0.1).collect();
        (x, y)
    };
    let (x_train, y_train) = make(&mut rng, n_rows);
    let (x_val, y_val) = make(&mut rng, seq_len + horizon);

    let seq_train = SequenceDataset::from_arrays(x_train.clone(), x_train.column(0).to_owned(), seq_len, horizon)
        .unwrap();
    let seq_val = SequenceDataset::from_arrays(x_val.clone(), x_val.column(0).to_owned(), seq_len, horizon)
        .unwrap();

    TrainingData {
        feature_columns: (0..n_features).map(|i| format!("feature_{}", i)).collect(),
        x_train,
        y_train,
        x_val,
        y_val,
        seq_train,
        seq_val,
    }
}

fn bench_candidates(c: &mut Criterion) {
    let mut group = c.benchmark_group("candidates");
    group.sample_size(10); // Fewer samples for training benchmarks

    let data = create_training_data(2000, 12, 48, 24);
    for kind in [
        CandidateKind::GradientBoosting,
        CandidateKind::RandomForest,
        CandidateKind::ExtraTrees,
        CandidateKind::HistGradientBoosting,
    ] {
        let selector = ModelSelector::new(
            TrainingConfig::new().with_candidates(vec![kind]).with_n_estimators(30),
            SequenceConfig::default(),
        );
        group.bench_with_input(BenchmarkId::new("fit", kind), &data, |b, data| {
            b.iter(|| selector.select(black_box(data)).unwrap())
        });
    }

    group.finish();
}

fn bench_gru_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("gru");
    group.sample_size(10);

    for seq_len in [24usize, 48, 96].iter() {
        let data = create_training_data(600, 12, *seq_len, 24);
        let config = SequenceConfig::new()
            .with_hidden_size(16)
            .with_num_layers(2)
            .with_epochs(1);

        group.bench_with_input(BenchmarkId::new("epoch", seq_len), &data, |b, data| {
            b.iter(|| {
                let mut gru = GruRegressor::new(config.clone());
                gru.fit(black_box(&data.seq_train), &data.seq_val).unwrap();
                gru
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_candidates, bench_gru_epoch);
criterion_main!(benches);
