//! End-to-end forecasting pipeline
//!
//! Runs the stages in order: load, prepare, feature selection, sort, derive,
//! label, split, persist frames, scale, encode, train, register, promote and
//! forecast. Every failure is labelled with the stage it came from. The
//! train, validation and latest frames are persisted before any model is
//! fitted.

mod config;

pub use config::{PipelineConfig, DEFAULT_HISTORY_YEARS};

use crate::error::{ForecastError, Result};
use crate::inference::{Forecast, Forecaster, ModelArtifact, Recommendation};
use crate::preprocessing::{
    numeric_columns, Encoder, FeatureSelector, FeatureTransformer, RobustScaler, SelectionReport,
    TIMESTAMP_COLUMNS,
};
use crate::timeseries::{add_shifted_target, sort_chronologically, split_windows, SHIFTED_TARGET};
use crate::tracking::{run_id, ExperimentStore, LocalExperimentStore, RunFilter, RunRecord};
use crate::training::{
    CandidateFailure, CandidateFit, CandidateKind, ModelSelector, SelectionOutcome, TrainingData,
};
use crate::utils::{ArtifactStore, DataSource, DateRange, LocalArtifactStore, PartitionedSource};
use chrono::{NaiveDateTime, Utc};
use polars::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Paths of the frames persisted by one run
#[derive(Debug, Clone)]
pub struct StageFrames {
    pub train: PathBuf,
    pub validation: PathBuf,
    pub latest: PathBuf,
    pub inference: PathBuf,
}

/// Everything a pipeline run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub experiment: String,
    pub feature_selection: SelectionReport,
    /// Candidate names with validation RMSE, best first
    pub ranking: Vec<(String, f64)>,
    pub failures: Vec<CandidateFailure>,
    /// One run per fitted candidate, best first
    pub runs: Vec<RunRecord>,
    pub promoted: RunRecord,
    pub forecast: Forecast,
    pub recommendations: Vec<(NaiveDateTime, Recommendation)>,
    pub frames: StageFrames,
    pub elapsed_secs: f64,
}

/// Sequential batch pipeline over pluggable stores
pub struct ForecastPipeline {
    config: PipelineConfig,
    artifacts: Arc<dyn ArtifactStore>,
    tracker: Arc<dyn ExperimentStore>,
}

impl ForecastPipeline {
    /// Pipeline writing everything under `config.output_dir`
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let experiment = run_id(&config.experiment, Utc::now());
        let artifacts = Arc::new(LocalArtifactStore::new(&config.output_dir));
        let tracker = Arc::new(LocalExperimentStore::new(&config.output_dir, experiment)?);
        Ok(Self::with_stores(config, artifacts, tracker))
    }

    pub fn with_stores(
        config: PipelineConfig,
        artifacts: Arc<dyn ArtifactStore>,
        tracker: Arc<dyn ExperimentStore>,
    ) -> Self {
        Self {
            config,
            artifacts,
            tracker,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load the configured raw partitions and run every stage
    pub fn run(&self) -> Result<PipelineReport> {
        let source = PartitionedSource::new(&self.config.data_dir);
        let raw = source
            .load(&DateRange::since_year(self.config.start_year))
            .map_err(|e| e.in_stage("load"))?;
        self.run_frame(raw)
    }

    /// Run every stage after loading on an already loaded raw frame
    pub fn run_frame(&self, raw: DataFrame) -> Result<PipelineReport> {
        let start = Instant::now();
        let cfg = &self.config;
        let target = cfg.features.target_column.as_str();
        let window = cfg.window;
        info!(
            experiment = self.tracker.experiment(),
            rows = raw.height(),
            columns = raw.width(),
            "Pipeline started"
        );

        let transformer = FeatureTransformer::new(cfg.features.clone());
        let prepared = transformer.prepare(&raw).map_err(|e| e.in_stage("prepare"))?;

        let selector = FeatureSelector::new(cfg.features.clone());
        let (selected, feature_selection) = selector
            .select(&prepared, target)
            .and_then(|report| Ok((selector.apply(&prepared, &report, target)?, report)))
            .map_err(|e| e.in_stage("select_features"))?;
        info!(
            dropped = feature_selection.dropped.len(),
            kept = selected.width(),
            "Feature selection done"
        );

        let sorted = sort_chronologically(&selected).map_err(|e| e.in_stage("sort"))?;
        let derived = transformer.derive(&sorted).map_err(|e| e.in_stage("derive"))?;
        let labelled =
            add_shifted_target(&derived, target, SHIFTED_TARGET).map_err(|e| e.in_stage("label"))?;
        let split = split_windows(&labelled, window.seq_len, window.horizon)
            .map_err(|e| e.in_stage("split"))?;
        // Serving starts from the newest observations, which have no label yet
        let latest = derived.tail(Some(window.seq_len));

        let persist = |df: &DataFrame, logical: &str| {
            self.artifacts
                .write_frame(df, logical)
                .map_err(|e| e.in_stage("persist_frames"))
        };
        let train_path = persist(&split.train, "train")?;
        let validation_path = persist(&split.validation, "validation")?;
        let latest_path = persist(&latest, "latest")?;

        let scaler = if cfg.features.scale_features {
            let columns = self.scaled_columns(&split.train);
            let mut scaler = RobustScaler::new();
            scaler
                .fit(&split.train, &columns)
                .map_err(|e| e.in_stage("scale"))?;
            Some(scaler)
        } else {
            None
        };
        let (train, validation) = match &scaler {
            Some(s) => (
                s.transform(&split.train).map_err(|e| e.in_stage("scale"))?,
                s.transform(&split.validation).map_err(|e| e.in_stage("scale"))?,
            ),
            None => (split.train.clone(), split.validation.clone()),
        };

        let schema = train
            .drop(SHIFTED_TARGET)
            .map_err(ForecastError::from)
            .and_then(|features| Encoder::from_config(&cfg.features).fit(&features))
            .map_err(|e| e.in_stage("encode"))?;
        let schema_path = self
            .artifacts
            .allocate("schema", "json")
            .and_then(|path| schema.save(&path).map(|_| path))
            .map_err(|e| e.in_stage("encode"))?;
        info!(features = schema.output_columns().len(), path = %schema_path.display(), "Schema frozen");

        let data = TrainingData::from_frames(&train, &validation, &schema, target, SHIFTED_TARGET, window)
            .map_err(|e| e.in_stage("encode"))?;

        let outcome = ModelSelector::new(cfg.training.clone(), cfg.sequence.clone())
            .select(&data)
            .map_err(|e| e.in_stage("train"))?;
        let ranking: Vec<(String, f64)> = outcome
            .ranked
            .iter()
            .map(|fit| (fit.kind.name().to_string(), fit.metrics.rmse))
            .collect();

        let runs = self
            .register(&outcome, |fit| ModelArtifact {
                model: fit.model.clone(),
                schema: schema.clone(),
                scaler: scaler.clone(),
                target: target.to_string(),
                label: SHIFTED_TARGET.to_string(),
                seq_len: window.seq_len,
                horizon: window.horizon,
                created_at: Utc::now(),
            })
            .map_err(|e| e.in_stage("register"))?;

        let (promoted, forecaster) = self.promote().map_err(|e| e.in_stage("promote"))?;
        let forecast = forecaster
            .forecast_latest(&latest)
            .map_err(|e| e.in_stage("forecast"))?;
        let inference_path = forecast
            .to_frame()
            .and_then(|frame| self.artifacts.write_frame(&frame, "inference"))
            .map_err(|e| e.in_stage("forecast"))?;
        let recommendations = forecast.recommendations(cfg.sensitivity);

        let elapsed_secs = start.elapsed().as_secs_f64();
        info!(
            promoted = %promoted.name,
            run_id = %promoted.run_id,
            steps = forecast.len(),
            elapsed_secs,
            "Pipeline finished"
        );

        Ok(PipelineReport {
            experiment: self.tracker.experiment().to_string(),
            feature_selection,
            ranking,
            failures: outcome.failures,
            runs,
            promoted,
            forecast,
            recommendations,
            frames: StageFrames {
                train: train_path,
                validation: validation_path,
                latest: latest_path,
                inference: inference_path,
            },
            elapsed_secs,
        })
    }

    /// Numeric feature columns the scaler is fitted on
    fn scaled_columns(&self, train: &DataFrame) -> Vec<String> {
        let target = self.config.features.target_column.as_str();
        numeric_columns(train)
            .into_iter()
            .filter(|c| c != target && c != SHIFTED_TARGET && !TIMESTAMP_COLUMNS.contains(&c.as_str()))
            .collect()
    }

    /// Register every fitted candidate; only the top-K of each family keep
    /// a model artifact
    fn register(
        &self,
        outcome: &SelectionOutcome,
        bundle: impl Fn(&CandidateFit) -> ModelArtifact,
    ) -> Result<Vec<RunRecord>> {
        let training = &self.config.training;
        let (mut tabular_seen, mut sequence_seen) = (0, 0);
        let mut runs = Vec::with_capacity(outcome.ranked.len());

        for fit in &outcome.ranked {
            let seen = if fit.kind.is_sequence() {
                &mut sequence_seen
            } else {
                &mut tabular_seen
            };
            *seen += 1;

            let path = if *seen <= training.top_k(fit.kind) {
                let path = self.artifacts.allocate(&format!("model_{}", fit.kind.name()), "json")?;
                bundle(fit).save(&path)?;
                Some(path)
            } else {
                debug!(model = %fit.kind, rmse = fit.metrics.rmse, "Below top-k, artifact not kept");
                None
            };
            let record = self.tracker.register_run(
                fit.kind.name(),
                fit.params.clone(),
                fit.metrics.to_map(),
                path.as_deref(),
            )?;
            info!(run_id = %record.run_id, rmse = fit.metrics.rmse, "Run registered");
            runs.push(record);
        }
        Ok(runs)
    }

    /// Load the best registered run of this experiment that forecasts the
    /// whole horizon.
    ///
    /// Tabular candidates are scored one hour ahead, so only sequence
    /// candidates compete for serving.
    fn promote(&self) -> Result<(RunRecord, Forecaster)> {
        let filter = CandidateKind::roster()
            .into_iter()
            .filter(CandidateKind::is_sequence)
            .fold(
                RunFilter::new().with_experiment(self.tracker.experiment()),
                |filter, kind| filter.with_name(kind.name()),
            );
        let best = self.tracker.query_best("rmse", &filter)?.ok_or_else(|| {
            ForecastError::TrackingError(format!(
                "no sequence model with a finite rmse was registered (accepted: {})",
                filter.names.join(", ")
            ))
        })?;
        let Some(path) = best.artifact.as_ref() else {
            warn!(run_id = %best.run_id, "Best run has no artifact");
            return Err(ForecastError::DataError(format!(
                "run {} has no model artifact",
                best.run_id
            )));
        };
        let forecaster = Forecaster::load(path)?;
        info!(run_id = %best.run_id, model = %best.name, "Model promoted");
        Ok((best, forecaster))
    }
}
