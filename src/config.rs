use std::path::PathBuf;

use clap::Parser;

use crate::classifier::ClassifierConfig;
use crate::error::DqError;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Train a per-second data-quality classifier on gravitational-wave strain
/// and report in-sample prediction metrics.
#[derive(Parser, Debug)]
#[command(name = "dq-classifier", version)]
pub struct Args {
    /// Manifest listing one data file per line (`#` starts a comment).
    /// Example line: H-H1_GWOSC_O2_4KHZ_R1-1181155328-4096.parquet
    #[arg(long)]
    pub datafile: PathBuf,

    /// Sampling rate in Hz. Must be even and match the strain data.
    #[arg(long, default_value_t = 4096)]
    pub rate: usize,

    /// First second of data to use.
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    /// Last second of data to use (exclusive). Defaults to all available data.
    #[arg(long)]
    pub end: Option<usize>,

    /// Standardize each second of strain to zero mean and unit variance.
    #[arg(long)]
    pub standardize: bool,

    /// Log progress messages.
    #[arg(long)]
    pub verbose: bool,

    /// Directory holding the data files named in the manifest.
    #[arg(long, default_value = "Data")]
    pub data_dir: PathBuf,

    /// Directory receiving the prediction and metrics files.
    #[arg(long, default_value = "Results")]
    pub results_dir: PathBuf,

    /// Hidden layer sizes, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "100")]
    pub hidden: Vec<usize>,

    /// Maximum number of training epochs.
    #[arg(long, default_value_t = 200)]
    pub max_iter: usize,

    /// Seed for mini-batch shuffling.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl Args {
    pub fn into_config(self) -> PipelineConfig {
        let classifier = ClassifierConfig {
            hidden_layer_sizes: self.hidden,
            max_epochs: self.max_iter,
            seed: self.seed,
            ..ClassifierConfig::default()
        };
        PipelineConfig {
            manifest: self.datafile,
            sampling_rate: self.rate,
            start_time: self.start,
            end_time: self.end,
            standardize: self.standardize,
            verbose: self.verbose,
            data_dir: self.data_dir,
            results_dir: self.results_dir,
            classifier,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Every parameter of a run. Each stage receives it by reference.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub manifest: PathBuf,
    pub sampling_rate: usize,
    pub start_time: usize,
    pub end_time: Option<usize>,
    pub standardize: bool,
    pub verbose: bool,
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
    pub classifier: ClassifierConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), DqError> {
        if self.sampling_rate == 0 || self.sampling_rate % 2 != 0 {
            return Err(DqError::InvalidConfig(format!(
                "sampling rate must be a positive even integer, got {}",
                self.sampling_rate
            )));
        }
        if let Some(end) = self.end_time {
            if end <= self.start_time {
                return Err(DqError::InvalidConfig(format!(
                    "end time {end} must be greater than start time {}",
                    self.start_time
                )));
            }
        }
        if self.classifier.hidden_layer_sizes.iter().any(|&h| h == 0) {
            return Err(DqError::InvalidConfig(
                "hidden layer sizes must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Base name of the output files: the manifest's file stem.
    pub fn output_stem(&self) -> String {
        self.manifest
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("datafile")
            .to_string()
    }

    pub fn data_path(&self, identifier: &str) -> PathBuf {
        self.data_dir.join(identifier)
    }

    pub fn manifest_name(&self) -> String {
        self.manifest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.manifest.display().to_string())
    }
}
