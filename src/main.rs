mod classifier;
mod config;
mod data;
mod error;
mod pipeline;
mod report;

use clap::Parser;
use log::info;

use config::Args;

fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config();

    let default_level = if config.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    info!("Starting!");
    let summary = pipeline::run(&config)?;
    info!(
        "Done! {} second(s) classified, in-sample accuracy {:.2}. Results: {}, {}",
        summary.seconds,
        summary.accuracy,
        summary.prediction_path.display(),
        summary.metrics_path.display()
    );
    Ok(())
}
