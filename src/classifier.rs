//! Feed-forward data-quality classifier.
//!
//! A fully-connected ReLU network mapping one second of strain to two
//! logits (clean, flagged). Defaults follow a stock MLP classifier:
//!
//! ```text
//! Input (rate) → Linear(100) → ReLU → Linear(2) → argmax
//! ```
//!
//! Training is a single fit on the whole table: shuffled mini-batches, AdamW,
//! stopped when the epoch loss stops improving. There is no held-out split,
//! so predictions on the same table measure fit quality only.

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Linear, Module, Optimizer, VarBuilder, VarMap};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::data::model::{Prediction, PredictionTable, TrainingTable};
use crate::error::DqError;

/// Number of output classes (clean, flagged).
const NUM_CLASSES: usize = 2;

/// Upper bound of the automatic mini-batch size.
const MAX_AUTO_BATCH: usize = 200;

/// Classifier hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub hidden_layer_sizes: Vec<usize>,
    pub learning_rate: f64,
    /// L2 penalty, applied as AdamW weight decay.
    pub alpha: f64,
    /// `None` means `min(200, rows)`.
    pub batch_size: Option<usize>,
    pub max_epochs: usize,
    pub tol: f64,
    pub n_iter_no_change: usize,
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            hidden_layer_sizes: vec![100],
            learning_rate: 1e-3,
            alpha: 1e-4,
            batch_size: None,
            max_epochs: 200,
            tol: 1e-4,
            n_iter_no_change: 10,
            seed: 42,
        }
    }
}

impl ClassifierConfig {
    fn effective_batch_size(&self, rows: usize) -> usize {
        self.batch_size
            .unwrap_or_else(|| rows.min(MAX_AUTO_BATCH))
            .clamp(1, rows.max(1))
    }
}

/// A fitted network. Lives for one run; never persisted.
pub struct DqClassifier {
    layers: Vec<Linear>,
    input_dim: usize,
    device: Device,
    /// Mean training loss of each epoch.
    pub loss_curve: Vec<f64>,
}

impl DqClassifier {
    fn build(
        input_dim: usize,
        config: &ClassifierConfig,
        varmap: &VarMap,
        device: &Device,
    ) -> Result<Self, DqError> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);

        let mut dims = Vec::with_capacity(config.hidden_layer_sizes.len() + 2);
        dims.push(input_dim);
        dims.extend_from_slice(&config.hidden_layer_sizes);
        dims.push(NUM_CLASSES);

        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, pair)| candle_nn::linear(pair[0], pair[1], vb.pp(format!("fc{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self {
            layers,
            input_dim,
            device: device.clone(),
            loss_curve: Vec::new(),
        })
    }

    /// Fit a new classifier on every row of the table.
    pub fn fit(table: &TrainingTable, config: &ClassifierConfig) -> Result<Self, DqError> {
        if table.is_empty() {
            return Err(DqError::Model("cannot fit on an empty training table".into()));
        }
        let device = Device::Cpu;
        let rows = table.len();

        let inputs = features_tensor(&table.features(), table.width, &device)?;
        let labels: Vec<u32> = table.labels().into_iter().map(u32::from).collect();
        let labels = Tensor::new(labels.as_slice(), &device)?;

        let varmap = VarMap::new();
        let mut model = Self::build(table.width, config, &varmap, &device)?;
        let mut optimizer = candle_nn::AdamW::new(
            varmap.all_vars(),
            candle_nn::ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: config.alpha,
                ..Default::default()
            },
        )?;

        let batch_size = config.effective_batch_size(rows);
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut order: Vec<u32> = (0..rows as u32).collect();
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0usize;
        let mut converged = false;

        info!(
            "Fitting {:?} hidden layer(s) on {rows} second(s) of {} samples, batch {batch_size}",
            config.hidden_layer_sizes, table.width
        );

        for epoch in 0..config.max_epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for chunk in order.chunks(batch_size) {
                let idx = Tensor::new(chunk, &device)?;
                let batch_inputs = inputs.index_select(&idx, 0)?;
                let batch_labels = labels.index_select(&idx, 0)?;

                let logits = model.forward_logits(&batch_inputs)?;
                let loss = candle_nn::loss::cross_entropy(&logits, &batch_labels)?;
                optimizer.backward_step(&loss)?;

                epoch_loss += f64::from(loss.to_scalar::<f32>()?) * chunk.len() as f64;
            }

            let epoch_loss = epoch_loss / rows as f64;
            if !epoch_loss.is_finite() {
                return Err(DqError::Model(format!(
                    "training loss diverged at epoch {}",
                    epoch + 1
                )));
            }
            debug!("epoch {:3} | loss={epoch_loss:.6}", epoch + 1);
            model.loss_curve.push(epoch_loss);

            if epoch_loss > best_loss - config.tol {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            best_loss = best_loss.min(epoch_loss);

            if no_improvement > config.n_iter_no_change {
                info!(
                    "Training loss did not improve more than tol={} for {} consecutive epochs. Stopping at epoch {}.",
                    config.tol,
                    config.n_iter_no_change,
                    epoch + 1
                );
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "Maximum epochs ({}) reached and the optimization hasn't converged yet.",
                config.max_epochs
            );
        }

        Ok(model)
    }

    fn forward_logits(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut x = input.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if i < last {
                x = x.relu()?;
            }
        }
        Ok(x)
    }

    /// Predicted label (0 or 1) for each feature vector.
    pub fn predict(&self, features: &[&[f64]]) -> Result<Vec<u8>, DqError> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let inputs = features_tensor(features, self.input_dim, &self.device)?;
        let logits = self.forward_logits(&inputs)?;
        let classes: Vec<u32> = logits.argmax(D::Minus1)?.to_vec1()?;
        Ok(classes.into_iter().map(|c| c as u8).collect())
    }

    /// Predict every row of the table, keeping its times and order.
    pub fn predict_table(&self, table: &TrainingTable) -> Result<PredictionTable, DqError> {
        let labels = self.predict(&table.features())?;
        let rows = table
            .rows
            .iter()
            .zip(labels)
            .map(|(row, label)| Prediction {
                time: row.time,
                label,
            })
            .collect();
        Ok(PredictionTable { rows })
    }
}

/// Pack feature vectors into an `[n, width]` f32 tensor.
fn features_tensor(features: &[&[f64]], width: usize, device: &Device) -> Result<Tensor, DqError> {
    let mut flat = Vec::with_capacity(features.len() * width);
    for (i, row) in features.iter().enumerate() {
        if row.len() != width {
            return Err(DqError::Model(format!(
                "feature vector {i} has {} samples, expected {width}",
                row.len()
            )));
        }
        flat.extend(row.iter().map(|&v| v as f32));
    }
    Ok(Tensor::from_vec(flat, (features.len(), width), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::LabeledSecond;

    /// Flagged seconds sit around +1, clean ones around -1.
    fn separable_table(rows: usize, width: usize) -> TrainingTable {
        let mut table = TrainingTable::new(width);
        for time in 0..rows {
            let label = (time % 2) as u8;
            let centre = if label == 1 { 1.0 } else { -1.0 };
            let strain = (0..width)
                .map(|j| centre + 0.05 * ((time + j) % 5) as f64)
                .collect();
            table.rows.push(LabeledSecond {
                time: time * 3,
                strain,
                label,
            });
        }
        table
    }

    fn quick_config() -> ClassifierConfig {
        ClassifierConfig {
            hidden_layer_sizes: vec![16],
            learning_rate: 1e-2,
            max_epochs: 300,
            ..ClassifierConfig::default()
        }
    }

    #[test]
    fn default_config_matches_stock_mlp() {
        let cfg = ClassifierConfig::default();
        assert_eq!(cfg.hidden_layer_sizes, vec![100]);
        assert!((cfg.learning_rate - 1e-3).abs() < 1e-12);
        assert!((cfg.alpha - 1e-4).abs() < 1e-12);
        assert_eq!(cfg.max_epochs, 200);
        assert_eq!(cfg.n_iter_no_change, 10);
        assert_eq!(cfg.effective_batch_size(50), 50);
        assert_eq!(cfg.effective_batch_size(5000), 200);
    }

    #[test]
    fn fits_separable_data() {
        let table = separable_table(40, 8);
        let model = DqClassifier::fit(&table, &quick_config()).unwrap();
        let predicted = model.predict(&table.features()).unwrap();
        let correct = predicted
            .iter()
            .zip(table.labels())
            .filter(|(p, t)| **p == *t)
            .count();
        assert!(correct >= 38, "only {correct}/40 correct");
        assert!(!model.loss_curve.is_empty());
    }

    #[test]
    fn prediction_table_keeps_times_in_order() {
        let table = separable_table(12, 4);
        let cfg = ClassifierConfig {
            max_epochs: 5,
            ..quick_config()
        };
        let model = DqClassifier::fit(&table, &cfg).unwrap();
        let predictions = model.predict_table(&table).unwrap();
        assert_eq!(predictions.len(), table.len());
        let times: Vec<usize> = predictions.rows.iter().map(|p| p.time).collect();
        let expected: Vec<usize> = table.rows.iter().map(|r| r.time).collect();
        assert_eq!(times, expected);
        assert!(predictions.labels().iter().all(|&l| l <= 1));
    }

    #[test]
    fn single_class_table_still_fits() {
        let mut table = separable_table(10, 4);
        for row in &mut table.rows {
            row.label = 0;
        }
        let model = DqClassifier::fit(&table, &quick_config()).unwrap();
        assert_eq!(model.predict(&table.features()).unwrap(), vec![0; 10]);
    }

    #[test]
    fn wrong_width_is_rejected() {
        let table = separable_table(6, 4);
        let cfg = ClassifierConfig {
            max_epochs: 1,
            ..quick_config()
        };
        let model = DqClassifier::fit(&table, &cfg).unwrap();
        let short = [1.0, 2.0];
        assert!(matches!(
            model.predict(&[&short[..]]),
            Err(DqError::Model(_))
        ));
    }

    #[test]
    fn empty_table_is_rejected() {
        let table = TrainingTable::new(4);
        assert!(DqClassifier::fit(&table, &ClassifierConfig::default()).is_err());
    }
}
