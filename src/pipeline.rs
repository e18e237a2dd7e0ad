use std::path::PathBuf;

use anyhow::Result;
use log::info;

use crate::classifier::DqClassifier;
use crate::config::PipelineConfig;
use crate::data::{labeler, loader};
use crate::report;

// ---------------------------------------------------------------------------
// One run: load → label → fit → predict → report
// ---------------------------------------------------------------------------

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub seconds: usize,
    pub prediction_path: PathBuf,
    pub metrics_path: PathBuf,
    pub accuracy: f64,
}

/// Run the whole pipeline once. Any error aborts the run; an empty training
/// table aborts before a model is fitted.
pub fn run(config: &PipelineConfig) -> Result<RunSummary> {
    config.validate()?;

    let data = loader::load_manifest(config)?;
    let table = labeler::build_training_table(&data, config)?;

    info!("Building the training model...");
    let model = DqClassifier::fit(&table, &config.classifier)?;
    if let Some(loss) = model.loss_curve.last() {
        info!(
            "Fitted in {} epoch(s), final training loss {loss:.6}",
            model.loss_curve.len()
        );
    }

    info!("Predicting labels for {} second(s)...", table.len());
    let predictions = model.predict_table(&table)?;
    debug_assert_eq!(predictions.len(), table.len());

    let outcome = report::write_reports(config, &table, &predictions)?;

    Ok(RunSummary {
        seconds: table.len(),
        prediction_path: outcome.prediction_path,
        metrics_path: outcome.metrics_path,
        accuracy: outcome.accuracy,
    })
}
