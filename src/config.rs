use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data_handling::ResponseType;
use crate::models::learner_trait::ParamSet;

/// Central configuration for one engine run.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of outer (test) folds.
    pub outer_folds: usize,
    /// Number of inner folds used by hyperparameter search.
    pub inner_folds: usize,
    /// Parameters to tune in single-learner mode.
    pub param_list: Option<Vec<String>>,
    /// Parameters applied to every candidate and never tuned.
    pub fixed_params: ParamSet,
    pub backend: ExecutionBackend,
    pub fold_control: Option<FoldControl>,
    pub sampler: SamplerStrategy,
    pub stability: StabilityThresholds,
    /// Learner moved to the front of the run order when present.
    pub priority_learner: Option<String>,
    /// Evaluate the outer folds of a learner on the rayon pool.
    pub parallel_folds: bool,
    pub verbosity: u8,
    pub log_file: Option<PathBuf>,
    pub results_file: Option<PathBuf>,
    /// Learners built by the command line front-end.
    pub learners: Vec<LearnerEntry>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            outer_folds: 5,
            inner_folds: 5,
            param_list: None,
            fixed_params: ParamSet::new(),
            backend: ExecutionBackend::Local,
            fold_control: None,
            sampler: SamplerStrategy::default(),
            stability: StabilityThresholds::default(),
            priority_learner: Some("PLS".to_string()),
            parallel_folds: false,
            verbosity: 0,
            log_file: None,
            results_file: None,
            learners: Vec::new(),
        }
    }
}

/// Where hyperparameter searches are executed.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionBackend {
    #[default]
    #[serde(rename = "NoSGE")]
    Local,
    #[serde(rename = "batch.q")]
    BatchQueue,
    #[serde(rename = "quick.q")]
    QuickQueue,
}

impl FromStr for ExecutionBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NoSGE" | "local" => Ok(ExecutionBackend::Local),
            "batch.q" => Ok(ExecutionBackend::BatchQueue),
            "quick.q" => Ok(ExecutionBackend::QuickQueue),
            _ => Err(format!("Invalid queue type: {}", s)),
        }
    }
}

/// Control over which examples may be used as test examples.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FoldControl {
    /// Only examples whose attribute value is listed may be tested on;
    /// every other example always stays in training.
    Group {
        attribute: String,
        values: Vec<String>,
    },
    /// The attribute already holds integer fold labels (0 = always train).
    Predefined { attribute: String },
}

impl FoldControl {
    pub fn attribute(&self) -> &str {
        match self {
            FoldControl::Group { attribute, .. } => attribute,
            FoldControl::Predefined { attribute } => attribute,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SamplerStrategy {
    /// Seeded assignment, stratified by class when the response is categorical.
    Stratified { seed: u64 },
}

impl Default for SamplerStrategy {
    fn default() -> Self {
        SamplerStrategy::Stratified { seed: 0 }
    }
}

/// Thresholds on the fold-to-fold dispersion below which a learner is stable.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StabilityThresholds {
    pub class_high_n: f64,
    pub class_low_n: f64,
    pub reg_high_n: f64,
    pub reg_low_n: f64,
    /// The high-N thresholds apply when the mean test-fold size exceeds this.
    pub high_n_min_test_size: f64,
}

impl Default for StabilityThresholds {
    fn default() -> Self {
        Self {
            class_high_n: 0.06,
            class_low_n: 0.10,
            reg_high_n: 0.20,
            reg_low_n: 0.40,
            high_n_min_test_size: 50.0,
        }
    }
}

impl StabilityThresholds {
    pub fn threshold(&self, response_type: ResponseType, mean_test_size: f64) -> f64 {
        let high_n = mean_test_size > self.high_n_min_test_size;
        match (response_type, high_n) {
            (ResponseType::Classification, true) => self.class_high_n,
            (ResponseType::Classification, false) => self.class_low_n,
            (ResponseType::Regression, true) => self.reg_high_n,
            (ResponseType::Regression, false) => self.reg_low_n,
        }
    }
}

/// A named learner for the command line front-end.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LearnerEntry {
    pub name: String,

    #[serde(flatten)]
    pub learner: LearnerConfig,
}

/// Built-in learners and their hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum LearnerConfig {
    Majority,
    Ridge {
        alpha: f64,
    },
    Knn {
        k: usize,
        #[serde(default)]
        structure_native: bool,
    },
    GBDT {
        learning_rate: f32,
        max_depth: u32,
        num_boost_round: u32,
        training_optimization_level: u8,
    },
}

impl Default for LearnerConfig {
    fn default() -> Self {
        LearnerConfig::Ridge { alpha: 1.0 }
    }
}

impl FromStr for LearnerConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "majority" => Ok(LearnerConfig::Majority),
            "ridge" | "pls" => Ok(LearnerConfig::Ridge { alpha: 1.0 }),
            "knn" => Ok(LearnerConfig::Knn {
                k: 5,
                structure_native: false,
            }),
            "gbdt" => Ok(LearnerConfig::GBDT {
                learning_rate: 0.1,
                max_depth: 6,
                num_boost_round: 50,
                training_optimization_level: 2,
            }),
            _ => Err(format!(
                "Unknown learner type: {}. Expected one of majority, ridge, knn, gbdt",
                s
            )),
        }
    }
}

/// Load an engine configuration from a JSON file.
pub fn load_engine_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
    let config: EngineConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
    Ok(config)
}
