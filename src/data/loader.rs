use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, AsArray, Float32Array, Float64Array, Int32Array, Int64Array, LargeListArray,
    ListArray, StringArray, UInt32Array, UInt64Array,
};
use arrow::datatypes::DataType;
use log::{info, warn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{DataFile, DqBits, GwData};
use crate::config::PipelineConfig;
use crate::error::DqError;

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Read the data-file identifiers listed in a manifest.
///
/// Text after `#` is a comment and blank lines are skipped. Lines with
/// several comma-separated fields contribute their first field only.
pub fn read_manifest(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    Ok(parse_manifest(&text))
}

fn parse_manifest(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .map(|line| line.split(',').next().unwrap_or("").trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load every file named in the manifest and concatenate strain and derived
/// labels in manifest order. The first unreadable file aborts the run.
pub fn load_manifest(config: &PipelineConfig) -> Result<GwData> {
    let identifiers = read_manifest(&config.manifest)?;
    let mut data = GwData::default();

    for id in &identifiers {
        info!(
            "Reading the data file {id} sampled at {} Hz",
            config.sampling_rate
        );
        let path = config.data_path(id);
        let file = load_file(&path).with_context(|| format!("loading {}", path.display()))?;

        let bits = DqBits::from_shortnames(&file.dq_shortnames).map_err(|missing| {
            DqError::MalformedDataFile {
                file: id.clone(),
                reason: format!("quality bit '{missing}' not found in DQ short names"),
            }
        })?;

        let expected = file.dq_mask.len() * config.sampling_rate;
        if file.strain.len() != expected {
            warn!(
                "{id}: {} strain samples but {} bitmask entries at {} Hz (expected {expected} samples); \
                 labels are indexed one bitmask entry per second",
                file.strain.len(),
                file.dq_mask.len(),
                config.sampling_rate,
            );
        }

        data.append(&file, bits);
    }

    Ok(data)
}

/// Load a single data file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – list columns `strain`, `dq_mask` and optional `dq_shortnames`
/// * `.json`    – GWOSC layout `{ "strain": [...], "quality": { "simple": {...} } }`
/// * `.csv`     – columns `strain`, `dq_mask`, `dq_shortnames` holding
///   semicolon-separated values
pub fn load_file(path: &Path) -> Result<DataFile> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Mirrors the GWOSC HDF5 hierarchy:
///
/// ```json
/// {
///   "strain": [1.2e-19, null, ...],
///   "quality": {
///     "simple": {
///       "DQShortnames": ["DATA", "CBC_CAT1", "CBC_CAT2", "CBC_CAT3"],
///       "DQmask": [15, 1, 0, ...]
///     }
///   }
/// }
/// ```
fn load_json(path: &Path) -> Result<DataFile> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let strain = root
        .get("strain")
        .and_then(|v| v.as_array())
        .context("missing 'strain' array")?
        .iter()
        .enumerate()
        .map(|(j, v)| match v {
            JsonValue::Null => Ok(f64::NAN),
            other => other
                .as_f64()
                .with_context(|| format!("strain[{j}]: not a number")),
        })
        .collect::<Result<Vec<f64>>>()?;

    let simple = root
        .pointer("/quality/simple")
        .context("missing 'quality/simple' group")?;

    let dq_mask = simple
        .get("DQmask")
        .and_then(|v| v.as_array())
        .context("missing 'DQmask' array")?
        .iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_u64()
                .with_context(|| format!("DQmask[{j}]: not an unsigned integer"))
        })
        .collect::<Result<Vec<u64>>>()?;

    let dq_shortnames = match simple.get("DQShortnames") {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(v) => v
            .as_array()
            .context("'DQShortnames' is not an array")?
            .iter()
            .map(|n| n.as_str().map(str::to_string).context("DQ short name is not a string"))
            .collect::<Result<Vec<String>>>()?,
    };

    Ok(DataFile {
        strain,
        dq_shortnames,
        dq_mask,
    })
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout:  header row with column names.
/// `strain`, `dq_mask` and (optionally) `dq_shortnames` contain
/// semicolon-separated values; each row is one segment and rows are appended
/// in order:
///   `"1.2e-19;nan;1.1e-19","15;1","DATA;CBC_CAT1;CBC_CAT2;CBC_CAT3"`
fn load_csv(path: &Path) -> Result<DataFile> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let strain_idx = headers
        .iter()
        .position(|h| h == "strain")
        .context("CSV missing 'strain' column")?;
    let mask_idx = headers
        .iter()
        .position(|h| h == "dq_mask")
        .context("CSV missing 'dq_mask' column")?;
    let names_idx = headers.iter().position(|h| h == "dq_shortnames");

    let mut file = DataFile::default();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let strain = parse_semicolon_floats(record.get(strain_idx).unwrap_or(""), row_no)?;
        let mask = parse_semicolon_masks(record.get(mask_idx).unwrap_or(""), row_no)?;
        file.strain.extend(strain);
        file.dq_mask.extend(mask);

        if let Some(idx) = names_idx {
            let names = split_semicolons(record.get(idx).unwrap_or(""));
            merge_shortnames(&mut file.dq_shortnames, names, row_no)?;
        }
    }

    Ok(file)
}

fn split_semicolons(s: &str) -> impl Iterator<Item = &str> {
    s.split(';').map(str::trim)
}

/// Empty and `nan` tokens are undefined samples.
fn parse_semicolon_floats(s: &str, row: usize) -> Result<Vec<f64>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            let tok = tok.trim();
            if tok.is_empty() || tok.eq_ignore_ascii_case("nan") {
                return Ok(f64::NAN);
            }
            tok.parse::<f64>()
                .with_context(|| format!("Row {row}, strain[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

fn parse_semicolon_masks(s: &str, row: usize) -> Result<Vec<u64>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<u64>()
                .with_context(|| format!("Row {row}, dq_mask[{j}]: '{tok}' is not a bitmask"))
        })
        .collect()
}

/// Segments may repeat the short-name list; they must agree.
fn merge_shortnames<'a>(
    current: &mut Vec<String>,
    names: impl Iterator<Item = &'a str>,
    row: usize,
) -> Result<()> {
    let names: Vec<String> = names.filter(|n| !n.is_empty()).map(str::to_string).collect();
    if names.is_empty() {
        return Ok(());
    }
    if current.is_empty() {
        *current = names;
    } else if *current != names {
        bail!("Row {row}: DQ short names differ from earlier rows");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file holding strain segments.
///
/// Expected schema, one row per segment:
/// - `strain`: List<Float64> or List<Float32> – null elements read as NaN
/// - `dq_mask`: List<Int32 | Int64 | UInt32 | UInt64> – raw bitmask words
/// - `dq_shortnames` (optional): List<Utf8> – bit names in bit order
fn load_parquet(path: &Path) -> Result<DataFile> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut data = DataFile::default();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        let strain_idx = schema
            .index_of("strain")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'strain' column"))?;
        let mask_idx = schema
            .index_of("dq_mask")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'dq_mask' column"))?;
        let names_idx = schema.index_of("dq_shortnames").ok();

        let strain_col = batch.column(strain_idx);
        let mask_col = batch.column(mask_idx);

        for row in 0..batch.num_rows() {
            let strain = extract_f64_list(strain_col, row)
                .with_context(|| format!("Row {row}: failed to read 'strain'"))?;
            let mask = extract_u64_list(mask_col, row)
                .with_context(|| format!("Row {row}: failed to read 'dq_mask'"))?;
            data.strain.extend(strain);
            data.dq_mask.extend(mask);

            if let Some(idx) = names_idx {
                let col = batch.column(idx);
                if !col.is_null(row) {
                    let names = extract_string_list(col, row)
                        .with_context(|| format!("Row {row}: failed to read 'dq_shortnames'"))?;
                    merge_shortnames(
                        &mut data.dq_shortnames,
                        names.iter().map(String::as_str),
                        row,
                    )?;
                }
            }
        }
    }

    Ok(data)
}

// -- Parquet / Arrow helpers --

/// The inner values of a List or LargeList column at the given row.
fn list_values(col: &Arc<dyn Array>, row: usize) -> Result<Arc<dyn Array>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            Ok(list_arr.value(row))
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            Ok(list_arr.value(row))
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    }
}

fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    let values = list_values(col, row)?;

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values.data_type()
        )
    }
}

fn extract_u64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<u64>> {
    let values = list_values(col, row)?;
    if values.null_count() > 0 {
        bail!("null bitmask entry");
    }

    let any = values.as_any();
    let words: Vec<u64> = if let Some(arr) = any.downcast_ref::<UInt32Array>() {
        arr.values().iter().map(|&v| u64::from(v)).collect()
    } else if let Some(arr) = any.downcast_ref::<UInt64Array>() {
        arr.values().to_vec()
    } else if let Some(arr) = any.downcast_ref::<Int32Array>() {
        arr.values()
            .iter()
            .map(|&v| u64::try_from(v).context("negative bitmask entry"))
            .collect::<Result<_>>()?
    } else if let Some(arr) = any.downcast_ref::<Int64Array>() {
        arr.values()
            .iter()
            .map(|&v| u64::try_from(v).context("negative bitmask entry"))
            .collect::<Result<_>>()?
    } else {
        bail!(
            "List inner type is {:?}, expected an integer type",
            values.data_type()
        )
    };
    Ok(words)
}

fn extract_string_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<String>> {
    let values = list_values(col, row)?;
    match values.data_type() {
        DataType::Utf8 => {
            let s = values
                .as_any()
                .downcast_ref::<StringArray>()
                .context("expected StringArray")?;
            Ok(s.iter().map(|v| v.unwrap_or("").to_string()).collect())
        }
        DataType::LargeUtf8 => {
            let s = values.as_string::<i64>();
            Ok(s.iter().map(|v| v.unwrap_or("").to_string()).collect())
        }
        other => bail!("List inner type is {other:?}, expected Utf8"),
    }
}
