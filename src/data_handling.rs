//! Tabular dataset used throughout the engine.
//!
//! A `Dataset` holds a numeric feature matrix, one response per row and any
//! number of string attributes (`meta`) that are never used as features: fold
//! control columns and the optional structural identifier (e.g. SMILES).
use std::collections::BTreeMap;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    Classification,
    Regression,
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseType::Classification => write!(f, "Classification"),
            ResponseType::Regression => write!(f, "Regression"),
        }
    }
}

/// Response column. Class values index into `labels`, whose order is fixed
/// for the whole run so confusion matrices line up across folds.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Classes { labels: Vec<String>, values: Vec<usize> },
    Continuous(Vec<f64>),
}

impl Response {
    pub fn len(&self) -> usize {
        match self {
            Response::Classes { values, .. } => values.len(),
            Response::Continuous(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn response_type(&self) -> ResponseType {
        match self {
            Response::Classes { .. } => ResponseType::Classification,
            Response::Continuous(_) => ResponseType::Regression,
        }
    }

    fn select(&self, indices: &[usize]) -> Response {
        match self {
            Response::Classes { labels, values } => Response::Classes {
                labels: labels.clone(),
                values: indices.iter().map(|&i| values[i]).collect(),
            },
            Response::Continuous(values) => {
                Response::Continuous(indices.iter().map(|&i| values[i]).collect())
            }
        }
    }
}

/// Which columns a learner gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureView {
    /// Numeric descriptors only; the structure attribute is dropped.
    Descriptors,
    /// The structure attribute is the sole input; descriptors are dropped.
    StructureOnly,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: Array2<f64>,
    pub feature_names: Vec<String>,
    pub response: Response,
    /// Row-aligned string attributes that are not features.
    pub meta: BTreeMap<String, Vec<String>>,
    /// Name of the `meta` column holding structural identifiers, if any.
    pub structure_attribute: Option<String>,
}

impl Dataset {
    pub fn new(x: Array2<f64>, feature_names: Vec<String>, response: Response) -> Result<Self> {
        if x.nrows() != response.len() {
            return Err(EngineError::config(format!(
                "Feature matrix has {} rows but the response has {} values",
                x.nrows(),
                response.len()
            )));
        }
        if x.ncols() != feature_names.len() {
            return Err(EngineError::config(format!(
                "Feature matrix has {} columns but {} feature names were given",
                x.ncols(),
                feature_names.len()
            )));
        }
        if let Response::Classes { labels, values } = &response {
            if labels.is_empty() {
                return Err(EngineError::config("Classification response without class labels"));
            }
            if let Some(bad) = values.iter().find(|&&v| v >= labels.len()) {
                return Err(EngineError::config(format!(
                    "Class index {} out of range for {} labels",
                    bad,
                    labels.len()
                )));
            }
        }
        Ok(Dataset {
            x,
            feature_names,
            response,
            meta: BTreeMap::new(),
            structure_attribute: None,
        })
    }

    /// Attach a row-aligned string attribute.
    pub fn with_meta(mut self, name: &str, values: Vec<String>) -> Result<Self> {
        if values.len() != self.len() {
            return Err(EngineError::config(format!(
                "Attribute '{}' has {} values for {} examples",
                name,
                values.len(),
                self.len()
            )));
        }
        self.meta.insert(name.to_string(), values);
        Ok(self)
    }

    /// Attach the structural identifier column.
    pub fn with_structure_attribute(self, name: &str, values: Vec<String>) -> Result<Self> {
        let mut data = self.with_meta(name, values)?;
        data.structure_attribute = Some(name.to_string());
        Ok(data)
    }

    pub fn len(&self) -> usize {
        self.response.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn response_type(&self) -> ResponseType {
        self.response.response_type()
    }

    pub fn class_labels(&self) -> Option<&[String]> {
        match &self.response {
            Response::Classes { labels, .. } => Some(labels),
            Response::Continuous(_) => None,
        }
    }

    pub fn class_values(&self) -> Option<&[usize]> {
        match &self.response {
            Response::Classes { values, .. } => Some(values),
            Response::Continuous(_) => None,
        }
    }

    pub fn continuous_values(&self) -> Option<&[f64]> {
        match &self.response {
            Response::Continuous(values) => Some(values),
            Response::Classes { .. } => None,
        }
    }

    /// Number of examples per class label, in label order.
    pub fn class_counts(&self) -> Option<Vec<usize>> {
        match &self.response {
            Response::Classes { labels, values } => {
                let mut counts = vec![0usize; labels.len()];
                for &v in values {
                    counts[v] += 1;
                }
                Some(counts)
            }
            Response::Continuous(_) => None,
        }
    }

    pub fn meta_values(&self, name: &str) -> Option<&[String]> {
        self.meta.get(name).map(|v| v.as_slice())
    }

    pub fn structure_values(&self) -> Option<&[String]> {
        self.structure_attribute
            .as_deref()
            .and_then(|name| self.meta_values(name))
    }

    /// Remove a non-feature attribute, returning its values.
    pub fn remove_meta(&mut self, name: &str) -> Option<Vec<String>> {
        if self.structure_attribute.as_deref() == Some(name) {
            self.structure_attribute = None;
        }
        self.meta.remove(name)
    }

    /// New dataset holding only the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Dataset {
        Dataset {
            x: self.x.select(Axis(0), indices),
            feature_names: self.feature_names.clone(),
            response: self.response.select(indices),
            meta: self
                .meta
                .iter()
                .map(|(name, values)| {
                    (name.clone(), indices.iter().map(|&i| values[i].clone()).collect())
                })
                .collect(),
            structure_attribute: self.structure_attribute.clone(),
        }
    }

    /// Rows whose mask entry is `true`.
    pub fn filter(&self, mask: &[bool]) -> Dataset {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| if m { Some(i) } else { None })
            .collect();
        self.select_rows(&indices)
    }

    /// Column selection applied identically to the train and test partitions
    /// of a fold. Without a structure attribute the dataset is returned as is.
    pub fn view(&self, view: FeatureView) -> Dataset {
        let Some(structure) = self.structure_attribute.clone() else {
            return self.clone();
        };
        match view {
            FeatureView::Descriptors => {
                let mut data = self.clone();
                data.remove_meta(&structure);
                data
            }
            FeatureView::StructureOnly => {
                let mut meta = BTreeMap::new();
                if let Some(values) = self.meta.get(&structure) {
                    meta.insert(structure.clone(), values.clone());
                }
                Dataset {
                    x: Array2::zeros((self.len(), 0)),
                    feature_names: Vec::new(),
                    response: self.response.clone(),
                    meta,
                    structure_attribute: Some(structure),
                }
            }
        }
    }

    pub fn log_input_data_summary(&self) {
        log::info!("----- Input Data Summary -----");
        log::info!(
            "{} examples, {} feature columns, response type {}",
            self.len(),
            self.n_features(),
            self.response_type()
        );
        if let (Some(labels), Some(counts)) = (self.class_labels(), self.class_counts()) {
            for (label, count) in labels.iter().zip(counts) {
                log::info!("  class '{}': {} examples", label, count);
            }
        }
        if let Some(structure) = &self.structure_attribute {
            log::info!("Structure attribute: {}", structure);
        }
        log::info!("-------------------------------");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Dataset {
        let x = Array2::from_shape_vec((4, 2), vec![0., 1., 2., 3., 4., 5., 6., 7.]).unwrap();
        let response = Response::Classes {
            labels: vec!["a".into(), "b".into()],
            values: vec![0, 1, 1, 0],
        };
        Dataset::new(x, vec!["f1".into(), "f2".into()], response)
            .unwrap()
            .with_structure_attribute(
                "SMILES",
                vec!["C".into(), "CC".into(), "CCC".into(), "CCCC".into()],
            )
            .unwrap()
    }

    #[test]
    fn select_rows_keeps_meta_aligned() {
        let data = toy();
        let sub = data.select_rows(&[3, 1]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.x[(0, 0)], 6.0);
        assert_eq!(sub.class_values().unwrap(), &[0, 1]);
        assert_eq!(sub.structure_values().unwrap(), &["CCCC".to_string(), "CC".to_string()]);
    }

    #[test]
    fn descriptor_view_drops_structure() {
        let view = toy().view(FeatureView::Descriptors);
        assert!(view.structure_attribute.is_none());
        assert!(view.meta.is_empty());
        assert_eq!(view.n_features(), 2);
    }

    #[test]
    fn structure_view_keeps_only_structure() {
        let view = toy().view(FeatureView::StructureOnly);
        assert_eq!(view.n_features(), 0);
        assert_eq!(view.structure_values().unwrap().len(), 4);
        assert_eq!(view.len(), 4);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let x = Array2::<f64>::zeros((3, 1));
        let result = Dataset::new(x, vec!["f".into()], Response::Continuous(vec![1.0]));
        assert!(result.is_err());
    }

    #[test]
    fn class_counts_follow_label_order() {
        assert_eq!(toy().class_counts().unwrap(), vec![2, 2]);
    }
}
