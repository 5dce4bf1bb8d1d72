use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data_handling::{Dataset, FeatureView};
use crate::error::{EngineError, Result};

/// One response value per example, in the order of the dataset rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    /// Indices into the dataset's class labels.
    Classes(Vec<usize>),
    Values(Vec<f64>),
}

impl Predictions {
    pub fn len(&self) -> usize {
        match self {
            Predictions::Classes(v) => v.len(),
            Predictions::Values(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fitted model.
pub trait Model: Send + Sync {
    fn predict(&self, data: &Dataset) -> Result<Predictions>;

    /// Number of examples the model was trained on.
    fn n_train(&self) -> usize;
}

/// A hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Some(*v as usize),
            ParamValue::Float(v) if *v >= 0.0 && v.fract() == 0.0 => Some(*v as usize),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
        }
    }
}

pub type ParamSet = BTreeMap<String, ParamValue>;

/// A tunable parameter and the values a search may try for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub candidates: Vec<ParamValue>,
}

impl ParamSpec {
    pub fn new(name: &str, candidates: Vec<ParamValue>) -> Self {
        Self {
            name: name.to_string(),
            candidates,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnerKind {
    /// Tuned by the external optimizer; eligible for consensus.
    Standard,
    /// Tunes itself and never joins a consensus. Structure-native learners
    /// see only the structure attribute.
    Specialized { structure_native: bool },
}

/// Outcome of a learner's own hyperparameter search.
pub struct SelfTuned {
    pub score: f64,
    /// A model already fitted on the full training partition, when the
    /// search produced one.
    pub model: Option<Box<dyn Model>>,
}

/// Capability interface every learner implements.
pub trait Learner: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> LearnerKind {
        LearnerKind::Standard
    }

    fn is_specialized(&self) -> bool {
        matches!(self.kind(), LearnerKind::Specialized { .. })
    }

    fn feature_view(&self) -> FeatureView {
        match self.kind() {
            LearnerKind::Specialized {
                structure_native: true,
            } => FeatureView::StructureOnly,
            _ => FeatureView::Descriptors,
        }
    }

    /// Fit a model with the current hyperparameters.
    fn fit(&self, train: &Dataset) -> Result<Box<dyn Model>>;

    /// Current hyperparameters.
    fn params(&self) -> ParamSet {
        ParamSet::new()
    }

    /// Default search space; also the set of names a parameter list may use.
    fn param_grid(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// A copy of this learner with `params` overriding the current values.
    fn with_params(&self, params: &ParamSet) -> Result<Box<dyn Learner>>;

    /// Self-optimisation, only meaningful for specialized learners.
    fn optimize(&self, _train: &Dataset, _inner_folds: usize) -> Result<SelfTuned> {
        Err(EngineError::config(format!(
            "Learner {} cannot optimize its own hyperparameters",
            self.name()
        )))
    }
}

/// Reject parameter names the learner does not know.
pub fn check_param_names(learner: &dyn Learner, names: &[String]) -> Result<()> {
    let known: Vec<String> = learner.param_grid().into_iter().map(|p| p.name).collect();
    for name in names {
        if !known.iter().any(|k| k == name) {
            return Err(EngineError::config(format!(
                "Parameter {} does not exist for the learner {}",
                name,
                learner.name()
            )));
        }
    }
    Ok(())
}
