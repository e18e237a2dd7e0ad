use log::{info, warn};

use super::model::{GwData, LabeledSecond, TrainingTable};
use crate::config::PipelineConfig;
use crate::error::DqError;

// ---------------------------------------------------------------------------
// Training table construction
// ---------------------------------------------------------------------------

/// End of the scan window: the requested end, clamped to the number of
/// labeled seconds. Clamping (or defaulting) is warned about, not an error.
pub fn resolve_end_time(requested: Option<usize>, available: usize) -> usize {
    match requested {
        Some(end) if end <= available => end,
        _ => {
            warn!("The end time of the training set is {available} second(s).");
            available
        }
    }
}

/// Cut the strain into one-second windows and pair each with its label.
///
/// Seconds whose first sample is undefined, or whose window runs past the
/// end of the strain, are skipped. When `standardize` is set every window is
/// z-scored with its own statistics.
pub fn build_training_table(
    data: &GwData,
    config: &PipelineConfig,
) -> Result<TrainingTable, DqError> {
    let rate = config.sampling_rate;
    let start = config.start_time;
    let end = resolve_end_time(config.end_time, data.dq.len());
    let requested = end.saturating_sub(start);

    info!("Building a {requested} second-long training data set...");

    let mut table = TrainingTable::new(rate);
    for time in start..end {
        let Some(window) = data.strain.get(time * rate..(time + 1) * rate) else {
            continue;
        };
        if window.first().map_or(true, |s| s.is_nan()) {
            continue;
        }
        let mut strain = window.to_vec();
        if config.standardize {
            standardize(&mut strain);
        }
        table.rows.push(LabeledSecond {
            time,
            strain,
            label: data.dq[time],
        });
    }

    if table.is_empty() {
        return Err(DqError::NoTrainableData);
    }
    if table.len() < requested {
        warn!(
            "Some data is not defined. The duration of the training data set is only {} second(s).",
            table.len()
        );
    }
    Ok(table)
}

/// In-place z-score: zero mean, unit population variance.
/// A constant window is only centered.
pub fn standardize(values: &mut [f64]) {
    if values.is_empty() {
        return;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let scale = if std > 0.0 { std } else { 1.0 };
    for v in values.iter_mut() {
        *v = (*v - mean) / scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::classifier::ClassifierConfig;

    fn config(rate: usize, start: usize, end: Option<usize>, standardize: bool) -> PipelineConfig {
        PipelineConfig {
            manifest: PathBuf::from("run.txt"),
            sampling_rate: rate,
            start_time: start,
            end_time: end,
            standardize,
            verbose: false,
            data_dir: PathBuf::from("Data"),
            results_dir: PathBuf::from("Results"),
            classifier: ClassifierConfig::default(),
        }
    }

    fn data(seconds: usize, rate: usize) -> GwData {
        GwData {
            strain: (0..seconds * rate).map(|i| i as f64).collect(),
            dq: (0..seconds).map(|i| (i % 2) as u8).collect(),
        }
    }

    #[test]
    fn one_row_per_second_with_label() {
        let table = build_training_table(&data(4, 4), &config(4, 0, None, false)).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.width, 4);
        assert_eq!(table.rows[2].time, 2);
        assert_eq!(table.rows[2].strain, vec![8.0, 9.0, 10.0, 11.0]);
        assert_eq!(table.labels(), vec![0, 1, 0, 1]);
        assert!(table.rows.iter().all(|r| r.strain.len() == 4));
    }

    #[test]
    fn nan_first_sample_drops_the_second() {
        let mut gw = data(4, 2);
        gw.strain[2] = f64::NAN;
        // NaN later in a window does not drop it
        gw.strain[5] = f64::NAN;
        let table = build_training_table(&gw, &config(2, 0, None, false)).unwrap();
        let times: Vec<usize> = table.rows.iter().map(|r| r.time).collect();
        assert_eq!(times, vec![0, 2, 3]);
    }

    #[test]
    fn start_and_end_bound_the_window() {
        let table = build_training_table(&data(6, 2), &config(2, 2, Some(5), false)).unwrap();
        let times: Vec<usize> = table.rows.iter().map(|r| r.time).collect();
        assert_eq!(times, vec![2, 3, 4]);
    }

    #[test]
    fn end_beyond_data_is_clamped() {
        assert_eq!(resolve_end_time(Some(100), 6), 6);
        assert_eq!(resolve_end_time(None, 6), 6);
        assert_eq!(resolve_end_time(Some(4), 6), 4);

        let table = build_training_table(&data(3, 2), &config(2, 0, Some(100), false)).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn short_strain_skips_incomplete_seconds() {
        let mut gw = data(3, 4);
        gw.strain.truncate(10);
        let table = build_training_table(&gw, &config(4, 0, None, false)).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn all_undefined_is_no_trainable_data() {
        let gw = GwData {
            strain: vec![f64::NAN; 8],
            dq: vec![0; 4],
        };
        let err = build_training_table(&gw, &config(2, 0, None, false)).unwrap_err();
        assert!(matches!(err, DqError::NoTrainableData));
    }

    #[test]
    fn standardize_gives_zero_mean_unit_variance() {
        let mut v = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        standardize(&mut v);
        let n = v.len() as f64;
        let mean = v.iter().sum::<f64>() / n;
        let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-12);
        // population std of the input is 2, mean 5
        assert!((v[0] + 1.5).abs() < 1e-12);
    }

    #[test]
    fn standardize_handles_strain_amplitudes() {
        let mut v: Vec<f64> = (0..8).map(|i| (i as f64 - 2.0) * 1e-21).collect();
        standardize(&mut v);
        let var = v.iter().map(|x| x * x).sum::<f64>() / v.len() as f64;
        assert!((var - 1.0).abs() < 1e-9);
    }

    #[test]
    fn standardize_constant_window_is_centered() {
        let mut v = vec![3.0; 5];
        standardize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn standardization_is_per_second() {
        let table = build_training_table(&data(2, 4), &config(4, 0, None, true)).unwrap();
        // both windows are arithmetic runs, so they standardize identically
        assert_eq!(table.rows[0].strain, table.rows[1].strain);
    }
}
