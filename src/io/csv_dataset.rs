//! Delimited-text dataset reader.
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use csv::StringRecord;
use ndarray::Array2;

use crate::data_handling::{Dataset, Response};

/// Configuration for reading a dataset from a CSV or TSV file.
#[derive(Debug, Clone)]
pub struct DatasetReaderConfig {
    /// Column holding the response.
    pub response_column: String,
    /// Optional column with structural identifiers (e.g. SMILES).
    pub structure_column: Option<String>,
    /// String attributes kept alongside the features, e.g. fold control
    /// columns.
    pub meta_columns: Vec<String>,
    /// Feature columns to load (in order). When `None`, every other column
    /// is a feature.
    pub feature_columns: Option<Vec<String>>,
    /// Columns to ignore when auto-selecting features.
    pub ignore_columns: Vec<String>,
    /// Force a classification response. When `None`, a response with any
    /// non-numeric value is categorical.
    pub classification: Option<bool>,
    /// Field delimiter. When `None`, `.tsv` and `.txt` files are tab
    /// separated and everything else comma separated.
    pub delimiter: Option<u8>,
}

impl Default for DatasetReaderConfig {
    fn default() -> Self {
        Self {
            response_column: "Activity".to_string(),
            structure_column: None,
            meta_columns: Vec::new(),
            feature_columns: None,
            ignore_columns: vec!["ID".to_string(), "Name".to_string()],
            classification: None,
            delimiter: None,
        }
    }
}

fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|header| header.eq_ignore_ascii_case(name))
}

fn require_column(headers: &StringRecord, name: &str) -> Result<usize> {
    find_column(headers, name).ok_or_else(|| anyhow!("Missing column '{}'", name))
}

fn infer_delimiter(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("txt") => b'\t',
        _ => b',',
    }
}

fn resolve_feature_indices(
    headers: &StringRecord,
    config: &DatasetReaderConfig,
    reserved: &[usize],
) -> Result<Vec<usize>> {
    if let Some(names) = &config.feature_columns {
        return names.iter().map(|name| require_column(headers, name)).collect();
    }
    let ignore: HashSet<String> = config
        .ignore_columns
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .collect();
    Ok(headers
        .iter()
        .enumerate()
        .filter(|(idx, header)| {
            !reserved.contains(idx) && !ignore.contains(&header.to_ascii_lowercase())
        })
        .map(|(idx, _)| idx)
        .collect())
}

/// Read a dataset from a delimited file.
pub fn read_dataset<P: AsRef<Path>>(path: P, config: &DatasetReaderConfig) -> Result<Dataset> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter.unwrap_or_else(|| infer_delimiter(path)))
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open dataset: {}", path.display()))?;

    let headers = reader
        .headers()
        .context("Failed to read dataset header row")?
        .clone();

    let response_idx = require_column(&headers, &config.response_column)?;
    let structure_idx = config
        .structure_column
        .as_deref()
        .map(|name| require_column(&headers, name))
        .transpose()?;
    let meta_indices = config
        .meta_columns
        .iter()
        .map(|name| require_column(&headers, name))
        .collect::<Result<Vec<_>>>()?;

    let mut reserved = vec![response_idx];
    reserved.extend(structure_idx);
    reserved.extend(&meta_indices);
    let feature_indices = resolve_feature_indices(&headers, config, &reserved)?;

    let records = reader
        .records()
        .enumerate()
        .map(|(row_idx, r)| r.with_context(|| format!("Failed to read row {}", row_idx + 1)))
        .collect::<Result<Vec<StringRecord>>>()?;
    if records.is_empty() {
        return Err(anyhow!("Dataset {} has no rows", path.display()));
    }

    let cell = |record: &StringRecord, idx: usize, row_idx: usize| -> Result<String> {
        record
            .get(idx)
            .map(|v| v.trim().to_string())
            .ok_or_else(|| anyhow!("Missing value in column {} at row {}", idx + 1, row_idx + 1))
    };

    let raw_response = records
        .iter()
        .enumerate()
        .map(|(row_idx, record)| cell(record, response_idx, row_idx))
        .collect::<Result<Vec<String>>>()?;
    let classification = config
        .classification
        .unwrap_or_else(|| raw_response.iter().any(|v| v.parse::<f64>().is_err()));

    let response = if classification {
        let labels: Vec<String> = raw_response
            .iter()
            .cloned()
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();
        let values = raw_response
            .iter()
            .map(|v| labels.iter().position(|l| l == v).unwrap_or_default())
            .collect();
        Response::Classes { labels, values }
    } else {
        Response::Continuous(
            raw_response
                .iter()
                .enumerate()
                .map(|(row_idx, v)| {
                    v.parse::<f64>()
                        .with_context(|| format!("Invalid response '{}' at row {}", v, row_idx + 1))
                })
                .collect::<Result<Vec<f64>>>()?,
        )
    };

    let mut features = Vec::with_capacity(records.len() * feature_indices.len());
    for (row_idx, record) in records.iter().enumerate() {
        for &idx in &feature_indices {
            let value = cell(record, idx, row_idx)?;
            let parsed = value.parse::<f64>().with_context(|| {
                format!(
                    "Invalid feature '{}' at row {}",
                    headers.get(idx).unwrap_or(""),
                    row_idx + 1
                )
            })?;
            features.push(parsed);
        }
    }
    let x = Array2::from_shape_vec((records.len(), feature_indices.len()), features)
        .context("Failed to build feature matrix")?;
    let feature_names = feature_indices
        .iter()
        .map(|&idx| headers.get(idx).unwrap_or("").to_string())
        .collect();

    let column = |idx: usize| -> Result<Vec<String>> {
        records
            .iter()
            .enumerate()
            .map(|(row_idx, record)| cell(record, idx, row_idx))
            .collect()
    };

    let mut dataset = Dataset::new(x, feature_names, response)?;
    for (name, &idx) in config.meta_columns.iter().zip(&meta_indices) {
        dataset = dataset.with_meta(name, column(idx)?)?;
    }
    if let (Some(name), Some(idx)) = (&config.structure_column, structure_idx) {
        dataset = dataset.with_structure_attribute(name, column(idx)?)?;
    }
    log::debug!(
        "Read {} examples with {} features from {}",
        dataset.len(),
        dataset.n_features(),
        path.display()
    );
    Ok(dataset)
}
