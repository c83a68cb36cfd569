//! Weather forecast - Main Entry Point

use clap::Parser;
use weather_forecast::cli::{cmd_recommend, cmd_run, cmd_runs, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_forecast=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => cmd_run(args)?,
        Commands::Runs {
            output_dir,
            experiment,
            metric,
        } => cmd_runs(&output_dir, experiment.as_deref(), &metric)?,
        Commands::Recommend { temp, sensitivity } => cmd_recommend(temp, sensitivity)?,
    }

    Ok(())
}
