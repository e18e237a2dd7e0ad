use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::data::model::{PredictionTable, TrainingTable};

// ---------------------------------------------------------------------------
// Classification report
// ---------------------------------------------------------------------------

/// Per-class scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Precision, recall and F1 for every class seen in either label set, plus
/// accuracy and the macro and support-weighted averages.
#[derive(Debug, Clone)]
pub struct ClassificationReport {
    pub classes: Vec<u8>,
    pub scores: Vec<ClassScores>,
    pub accuracy: f64,
    pub macro_avg: ClassScores,
    pub weighted_avg: ClassScores,
    /// One entry per ill-defined score that was reported as 0.
    pub zero_division: Vec<String>,
}

/// Sorted union of the labels present in `y_true` and `y_pred`.
fn classes_of(y_true: &[u8], y_pred: &[u8]) -> Vec<u8> {
    let mut classes: Vec<u8> = y_true.iter().chain(y_pred).copied().collect();
    classes.sort_unstable();
    classes.dedup();
    classes
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

impl ClassificationReport {
    pub fn compute(y_true: &[u8], y_pred: &[u8]) -> Self {
        assert_eq!(
            y_true.len(),
            y_pred.len(),
            "true and predicted labels must have same length"
        );

        let classes = classes_of(y_true, y_pred);
        let mut zero_division = Vec::new();
        let mut scores = Vec::with_capacity(classes.len());

        for &class in &classes {
            let mut tp = 0;
            let mut predicted = 0;
            let mut actual = 0;
            for (&t, &p) in y_true.iter().zip(y_pred) {
                if p == class {
                    predicted += 1;
                }
                if t == class {
                    actual += 1;
                    if p == class {
                        tp += 1;
                    }
                }
            }

            let precision = ratio(tp, predicted).unwrap_or_else(|| {
                zero_division.push(format!(
                    "Precision is ill-defined and being set to 0.0 for label {class} (no predicted samples)."
                ));
                0.0
            });
            let recall = ratio(tp, actual).unwrap_or_else(|| {
                zero_division.push(format!(
                    "Recall is ill-defined and being set to 0.0 for label {class} (no true samples)."
                ));
                0.0
            });
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            scores.push(ClassScores {
                precision,
                recall,
                f1,
                support: actual,
            });
        }

        let total = y_true.len();
        let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
        let accuracy = ratio(correct, total).unwrap_or(0.0);

        let uniform = vec![1.0; scores.len()];
        let supports: Vec<f64> = scores.iter().map(|s| s.support as f64).collect();
        let macro_avg = weighted_mean(&scores, &uniform, total);
        let weighted_avg = weighted_mean(&scores, &supports, total);

        Self {
            classes,
            scores,
            accuracy,
            macro_avg,
            weighted_avg,
            zero_division,
        }
    }
}

fn weighted_mean(scores: &[ClassScores], weights: &[f64], support: usize) -> ClassScores {
    let norm: f64 = weights.iter().sum();
    let mean = |field: fn(&ClassScores) -> f64| {
        if norm > 0.0 {
            scores.iter().zip(weights).map(|(s, w)| field(s) * w).sum::<f64>() / norm
        } else {
            0.0
        }
    };
    ClassScores {
        precision: mean(|s: &ClassScores| s.precision),
        recall: mean(|s: &ClassScores| s.recall),
        f1: mean(|s: &ClassScores| s.f1),
        support,
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const WIDTH: usize = 12; // "weighted avg"
        let width = self
            .classes
            .iter()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(0)
            .max(WIDTH);

        write!(f, "{:>width$} ", "")?;
        for header in ["precision", "recall", "f1-score", "support"] {
            write!(f, " {header:>9}")?;
        }
        writeln!(f, "\n")?;

        let row = |f: &mut fmt::Formatter<'_>, name: &str, s: &ClassScores| {
            writeln!(
                f,
                "{name:>width$}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
                s.precision, s.recall, s.f1, s.support
            )
        };

        for (class, scores) in self.classes.iter().zip(&self.scores) {
            row(f, &class.to_string(), scores)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$}  {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        row(f, "macro avg", &self.macro_avg)?;
        row(f, "weighted avg", &self.weighted_avg)
    }
}

// ---------------------------------------------------------------------------
// Confusion matrix
// ---------------------------------------------------------------------------

/// `counts[i][j]`: seconds of true class `classes[i]` predicted as `classes[j]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub classes: Vec<u8>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn compute(y_true: &[u8], y_pred: &[u8]) -> Self {
        let classes = classes_of(y_true, y_pred);
        let mut counts = vec![vec![0; classes.len()]; classes.len()];
        let index = |label: u8| classes.binary_search(&label).ok();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            if let (Some(i), Some(j)) = (index(t), index(p)) {
                counts[i][j] += 1;
            }
        }
        Self { classes, counts }
    }

    /// Tab-separated table with a header row of predicted classes and a
    /// leading column of true classes.
    fn write_tsv<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(out);

        let mut header = vec![String::new()];
        header.extend(self.classes.iter().map(u8::to_string));
        writer.write_record(&header)?;

        for (class, row) in self.classes.iter().zip(&self.counts) {
            let mut record = vec![class.to_string()];
            record.extend(row.iter().map(usize::to_string));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Output files
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PredictionRow {
    #[serde(rename = "Time")]
    time: usize,
    #[serde(rename = "Label")]
    label: u8,
}

/// Remove any previous file of the same name, then create it afresh.
fn create_fresh(path: &Path) -> Result<File> {
    if path.is_file() {
        std::fs::remove_file(path)
            .with_context(|| format!("removing previous {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    File::create(path).with_context(|| format!("creating {}", path.display()))
}

/// `# Predicted labels for <manifest>` followed by a `Time`/`Label` table.
pub fn write_predictions(path: &Path, manifest: &str, predictions: &PredictionTable) -> Result<()> {
    let mut file = create_fresh(path)?;
    writeln!(file, "# Predicted labels for {manifest}")?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(&mut file);
    for p in &predictions.rows {
        writer.serialize(PredictionRow {
            time: p.time,
            label: p.label,
        })?;
    }
    writer
        .flush()
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn write_metrics(
    path: &Path,
    manifest: &str,
    report: &ClassificationReport,
    matrix: &ConfusionMatrix,
) -> Result<()> {
    let mut file = create_fresh(path)?;
    write!(file, "# Predicted labels for {manifest}:\n\n")?;
    write!(file, "{report}")?;
    write!(file, "\n# Confusion matrix for {manifest}:\n\n")?;
    matrix
        .write_tsv(&mut file)
        .with_context(|| format!("writing {}", path.display()))
}

/// Where a run's outputs went and how well the fit did.
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub prediction_path: PathBuf,
    pub metrics_path: PathBuf,
    pub accuracy: f64,
}

/// Write both output files for one run.
pub fn write_reports(
    config: &PipelineConfig,
    training: &TrainingTable,
    predictions: &PredictionTable,
) -> Result<ReportOutcome> {
    let stem = config.output_stem();
    let manifest = config.manifest_name();

    let prediction_path = config.results_dir.join(format!("{stem}-prediction.txt"));
    write_predictions(&prediction_path, &manifest, predictions)?;
    info!("Predicted labels are saved in {}.", prediction_path.display());

    info!("Calculating the prediction metrics...");
    let y_true = training.labels();
    let y_pred = predictions.labels();
    let report = ClassificationReport::compute(&y_true, &y_pred);
    for message in &report.zero_division {
        warn!("{message}");
    }
    let matrix = ConfusionMatrix::compute(&y_true, &y_pred);

    let metrics_path = config.results_dir.join(format!("{stem}-metrics.txt"));
    write_metrics(&metrics_path, &manifest, &report, &matrix)?;
    info!("Prediction metrics are saved in {}.", metrics_path.display());

    Ok(ReportOutcome {
        prediction_path,
        metrics_path,
        accuracy: report.accuracy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Prediction;
    use tempfile::TempDir;

    #[test]
    fn mixed_predictions_score_per_class() {
        // class 1: 3 TP, 1 FP, 1 FN; class 0: 2 TP
        let y_true = [1, 1, 1, 0, 0, 0, 1];
        let y_pred = [1, 1, 1, 1, 0, 0, 0];
        let r = ClassificationReport::compute(&y_true, &y_pred);
        assert_eq!(r.classes, vec![0, 1]);
        let one = r.scores[1];
        assert!((one.precision - 0.75).abs() < 1e-9);
        assert!((one.recall - 0.75).abs() < 1e-9);
        assert_eq!(one.support, 4);
        let zero = r.scores[0];
        assert!((zero.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((zero.recall - 2.0 / 3.0).abs() < 1e-9);
        assert!((r.accuracy - 5.0 / 7.0).abs() < 1e-9);
        assert!((r.weighted_avg.recall - 5.0 / 7.0).abs() < 1e-9);
        assert!(r.zero_division.is_empty());
    }

    #[test]
    fn never_predicted_class_is_reported_not_raised() {
        let y_true = [0, 1, 1];
        let y_pred = [0, 0, 0];
        let r = ClassificationReport::compute(&y_true, &y_pred);
        assert_eq!(r.scores[1].precision, 0.0);
        assert_eq!(r.scores[1].f1, 0.0);
        assert_eq!(r.zero_division.len(), 1);
        assert!(r.zero_division[0].contains("Precision"));
    }

    #[test]
    fn report_text_layout() {
        let r = ClassificationReport::compute(&[0, 0, 1, 1], &[0, 1, 1, 1]);
        let text = r.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "              precision    recall  f1-score   support"
        );
        assert_eq!(lines[1], "");
        assert_eq!(
            lines[2],
            "           0       1.00      0.50      0.67         2"
        );
        assert_eq!(
            lines[3],
            "           1       0.67      1.00      0.80         2"
        );
        assert_eq!(lines[4], "");
        assert_eq!(
            lines[5],
            "    accuracy                           0.75         4"
        );
        assert_eq!(
            lines[6],
            "   macro avg       0.83      0.75      0.73         4"
        );
        assert_eq!(
            lines[7],
            "weighted avg       0.83      0.75      0.73         4"
        );
    }

    #[test]
    fn confusion_matrix_rows_are_true_classes() {
        let m = ConfusionMatrix::compute(&[0, 0, 1, 1, 1], &[0, 1, 1, 1, 0]);
        assert_eq!(m.classes, vec![0, 1]);
        assert_eq!(m.counts, vec![vec![1, 1], vec![1, 2]]);

        let mut out = Vec::new();
        m.write_tsv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\t0\t1\n0\t1\t1\n1\t1\t2\n");
    }

    #[test]
    fn prediction_file_layout_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Results/run-prediction.txt");
        let table = PredictionTable {
            rows: vec![
                Prediction { time: 0, label: 1 },
                Prediction { time: 2, label: 0 },
            ],
        };
        write_predictions(&path, "run.txt", &table).unwrap();
        write_predictions(&path, "run.txt", &table).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "# Predicted labels for run.txt\nTime\tLabel\n0\t1\n2\t0\n"
        );
    }
}
