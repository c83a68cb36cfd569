//! Weather forecast CLI
//!
//! Command-line interface for the full pipeline, run inspection and
//! clothing advice.

use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

use crate::inference::{recommend, Sensitivity};
use crate::pipeline::{ForecastPipeline, PipelineConfig, PipelineReport};
use crate::tracking::{ExperimentStore, LocalExperimentStore, RunFilter};
use crate::training::rank_by_metric;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString { s.truecolor(100, 210, 120) }

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn kv(key: &str, val: &str) {
    println!("  {:<16} {}", muted(key), val.white());
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "weather-forecast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hourly temperature forecasting pipeline")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline: load, train, promote, forecast
    Run(RunArgs),

    /// List recorded runs ranked by a validation metric
    Runs {
        /// Pipeline output directory
        #[arg(short, long, default_value = "output", env = "WEATHER_OUTPUT_DIR")]
        output_dir: PathBuf,

        /// Only runs of this experiment
        #[arg(short, long)]
        experiment: Option<String>,

        /// Metric to rank by
        #[arg(short, long, default_value = "rmse")]
        metric: String,
    },

    /// Clothing advice for a temperature
    Recommend {
        /// Forecast temperature in °C
        #[arg(short, long, allow_hyphen_values = true)]
        temp: f64,

        #[arg(short, long, value_enum, default_value_t = Sensitivity::Normal)]
        sensitivity: Sensitivity,
    },
}

/// Overrides for `PipelineConfig`; unset flags keep the file or default value
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON pipeline configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Root of the year=YYYY/month=MM raw partitions
    #[arg(long, env = "WEATHER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Root for artifacts, models and run records
    #[arg(long, env = "WEATHER_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// First year of data to load (default: three years ago)
    #[arg(long)]
    pub start_year: Option<i32>,

    #[arg(long)]
    pub epochs: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Sequence model learning rate
    #[arg(long)]
    pub lr: Option<f64>,

    #[arg(long)]
    pub hidden_size: Option<usize>,

    #[arg(long)]
    pub num_layers: Option<usize>,

    #[arg(long)]
    pub dropout: Option<f64>,

    /// Early-stopping patience in epochs
    #[arg(long)]
    pub patience: Option<usize>,

    /// Input window length in hours
    #[arg(long)]
    pub seq_len: Option<usize>,

    /// Forecast horizon in hours
    #[arg(long)]
    pub horizon: Option<usize>,

    /// Tree-model runs that keep a model artifact
    #[arg(long)]
    pub top_k: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, value_enum)]
    pub sensitivity: Option<Sensitivity>,
}

impl RunArgs {
    /// Resolve the configuration: file (or defaults), then flags
    pub fn into_config(self) -> crate::error::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(year) = self.start_year {
            config.start_year = year;
        }
        if let Some(v) = self.epochs {
            config.sequence.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.sequence.batch_size = v;
        }
        if let Some(v) = self.lr {
            config.sequence.learning_rate = v;
        }
        if let Some(v) = self.hidden_size {
            config.sequence.hidden_size = v;
        }
        if let Some(v) = self.num_layers {
            config.sequence.num_layers = v;
        }
        if let Some(v) = self.dropout {
            config.sequence.dropout = v;
        }
        if let Some(v) = self.patience {
            config.sequence.patience = v;
        }
        if let Some(v) = self.seq_len {
            config.window.seq_len = v;
        }
        if let Some(v) = self.horizon {
            config.window.horizon = v;
        }
        if let Some(v) = self.top_k {
            config.training.top_k_trees = v;
        }
        if let Some(seed) = self.seed {
            config.training.random_seed = seed;
            config.sequence.random_seed = seed;
        }
        if let Some(s) = self.sensitivity {
            config.sensitivity = s;
        }

        config.validate()?;
        Ok(config)
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let config = args.into_config()?;
    section("Run");
    kv("Data", &config.data_dir.display().to_string());
    kv("Output", &config.output_dir.display().to_string());
    kv("Since", &config.start_year.to_string());
    kv(
        "Window",
        &format!("{}h in, {}h out", config.window.seq_len, config.window.horizon),
    );

    let pipeline = ForecastPipeline::new(config)?;
    let report = pipeline.run()?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &PipelineReport) {
    section("Models");
    println!("  {:<28} {:>10}", muted("Model"), muted("RMSE"));
    println!("  {}", dim(&"─".repeat(40)));
    for (name, rmse) in &report.ranking {
        let marker = if *name == report.promoted.name { accent("★") } else { " ".normal() };
        println!("  {:<28} {:>10.4} {}", name, rmse, marker);
    }
    for failure in &report.failures {
        println!("  {:<28} {}", failure.kind.name(), format!("failed: {}", failure.error).red());
    }

    section("Forecast");
    for (at, rec) in report.recommendations.iter().take(24) {
        println!(
            "  {}  {:>6.1}°C  {}",
            at.format("%a %m-%d %H:00"),
            rec.forecast,
            muted(rec.outfit.advice())
        );
    }
    if report.recommendations.len() > 24 {
        println!("  {}", dim(&format!("… {} more hours", report.recommendations.len() - 24)));
    }

    println!();
    step_ok(&format!("Promoted {}", report.promoted.run_id.cyan()));
    step_ok(&format!("Forecast written to {}", report.frames.inference.display()));
    println!("  {}", dim(&format!("finished in {:.1}s", report.elapsed_secs)));
    println!();
}

pub fn cmd_runs(output_dir: &PathBuf, experiment: Option<&str>, metric: &str) -> anyhow::Result<()> {
    let store = LocalExperimentStore::new(output_dir, experiment.unwrap_or_default())?;
    let filter = match experiment {
        Some(e) => RunFilter::new().with_experiment(e),
        None => RunFilter::new(),
    };
    let runs: Vec<_> = store.runs()?.into_iter().filter(|r| filter.matches(r)).collect();
    let ranked = rank_by_metric(runs, |r| r.metric(metric).unwrap_or(f64::NAN));

    section("Runs");
    if ranked.is_empty() {
        println!("  {}", "No runs recorded".yellow());
        println!();
        return Ok(());
    }
    println!("  {:<48} {:>10}  {}", muted("Run"), muted(metric), muted("Created"));
    println!("  {}", dim(&"─".repeat(78)));
    for run in &ranked {
        let score = run
            .metric(metric)
            .map_or_else(|| "-".to_string(), |v| format!("{:.4}", v));
        println!(
            "  {:<48} {:>10}  {}",
            run.run_id,
            score,
            dim(&run.created_at.format("%Y-%m-%d %H:%M").to_string())
        );
    }
    println!();
    Ok(())
}

pub fn cmd_recommend(temp: f64, sensitivity: Sensitivity) -> anyhow::Result<()> {
    let rec = recommend(temp, sensitivity);
    section("Recommendation");
    kv("Forecast", &format!("{:.1}°C", rec.forecast));
    kv("Feels like", &format!("{:.1}°C", rec.felt));
    kv("Wear", rec.outfit.advice());
    println!();
    Ok(())
}
