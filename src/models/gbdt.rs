use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use ndarray::Array2;

use crate::data_handling::{Dataset, Response};
use crate::error::{EngineError, Result};
use crate::models::learner_trait::{Learner, Model, ParamSet, ParamSpec, ParamValue, Predictions};

/// Gradient Boosting Decision Tree (GBDT) learner.
///
/// Binary classification trains one booster on ±1 labels; with more classes
/// one booster per class is trained and the highest decision value wins.
#[derive(Debug, Clone)]
pub struct GbdtLearner {
    name: String,
    learning_rate: f32,
    max_depth: u32,
    num_boost_round: u32,
    training_optimization_level: u8,
}

impl GbdtLearner {
    pub fn new(
        name: &str,
        learning_rate: f32,
        max_depth: u32,
        num_boost_round: u32,
        training_optimization_level: u8,
    ) -> Self {
        GbdtLearner {
            name: name.to_string(),
            learning_rate,
            max_depth,
            num_boost_round,
            training_optimization_level,
        }
    }

    fn config(&self, feature_size: usize, loss: &str) -> Config {
        let mut config = Config::new();
        config.set_feature_size(feature_size);
        config.set_shrinkage(self.learning_rate);
        config.set_max_depth(self.max_depth);
        config.set_iterations(self.num_boost_round as usize);
        config.set_debug(false);
        config.set_training_optimization_level(self.training_optimization_level);
        config.set_loss(loss);
        config
    }

    fn boost(&self, x: &Array2<f64>, targets: &[f32], loss: &str) -> GBDT {
        let mut gbdt = GBDT::new(&self.config(x.ncols(), loss));
        let mut train_x = to_data_vec(x, Some(targets));
        gbdt.fit(&mut train_x);
        gbdt
    }
}

enum Boosters {
    /// Positive class is label index 1.
    Binary(GBDT),
    OneVsRest(Vec<GBDT>),
    Regressor(GBDT),
}

pub struct GbdtModel {
    boosters: Boosters,
    feature_size: usize,
    n_train: usize,
}

fn to_data_vec(x: &Array2<f64>, targets: Option<&[f32]>) -> DataVec {
    let mut data = DataVec::new();
    for (i, row) in x.rows().into_iter().enumerate() {
        let features: Vec<f32> = row.iter().map(|&v| v as f32).collect();
        let label = targets.map_or(0.0, |t| t[i]);
        data.push(Data::new_training_data(features, 1.0, label, None));
    }
    data
}

impl Learner for GbdtLearner {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&self, train: &Dataset) -> Result<Box<dyn Model>> {
        if train.is_empty() {
            return Err(EngineError::evaluation("Cannot fit on an empty training set"));
        }
        if train.n_features() == 0 {
            return Err(EngineError::evaluation("GBDT requires at least one feature column"));
        }
        let boosters = match &train.response {
            Response::Classes { labels, values } => {
                let one_vs = |class: usize| -> Vec<f32> {
                    values.iter().map(|&v| if v == class { 1.0 } else { -1.0 }).collect()
                };
                if labels.len() <= 2 {
                    Boosters::Binary(self.boost(&train.x, &one_vs(1), "LogLikelyhood"))
                } else {
                    Boosters::OneVsRest(
                        (0..labels.len())
                            .map(|c| self.boost(&train.x, &one_vs(c), "LogLikelyhood"))
                            .collect(),
                    )
                }
            }
            Response::Continuous(values) => {
                let targets: Vec<f32> = values.iter().map(|&v| v as f32).collect();
                Boosters::Regressor(self.boost(&train.x, &targets, "SquaredError"))
            }
        };
        Ok(Box::new(GbdtModel {
            boosters,
            feature_size: train.n_features(),
            n_train: train.len(),
        }))
    }

    fn params(&self) -> ParamSet {
        ParamSet::from([
            ("learning_rate".to_string(), ParamValue::Float(self.learning_rate as f64)),
            ("max_depth".to_string(), ParamValue::Int(self.max_depth as i64)),
            ("num_boost_round".to_string(), ParamValue::Int(self.num_boost_round as i64)),
        ])
    }

    fn param_grid(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new(
                "learning_rate",
                vec![ParamValue::Float(0.05), ParamValue::Float(0.1), ParamValue::Float(0.3)],
            ),
            ParamSpec::new("max_depth", [3, 6].map(ParamValue::Int).to_vec()),
            ParamSpec::new("num_boost_round", [20, 50, 100].map(ParamValue::Int).to_vec()),
        ]
    }

    fn with_params(&self, params: &ParamSet) -> Result<Box<dyn Learner>> {
        let mut learner = self.clone();
        for (name, value) in params {
            let invalid = || EngineError::config(format!("Invalid value for {}: {}", name, value));
            match name.as_str() {
                "learning_rate" => {
                    learner.learning_rate =
                        value.as_f64().filter(|v| *v > 0.0).ok_or_else(invalid)? as f32
                }
                "max_depth" => {
                    learner.max_depth = value.as_usize().filter(|v| *v > 0).ok_or_else(invalid)? as u32
                }
                "num_boost_round" => {
                    learner.num_boost_round =
                        value.as_usize().filter(|v| *v > 0).ok_or_else(invalid)? as u32
                }
                _ => {}
            }
        }
        Ok(Box::new(learner))
    }
}

impl Model for GbdtModel {
    fn predict(&self, data: &Dataset) -> Result<Predictions> {
        if data.n_features() != self.feature_size {
            return Err(EngineError::evaluation(format!(
                "Model expects {} features, got {}",
                self.feature_size,
                data.n_features()
            )));
        }
        let test_x = to_data_vec(&data.x, None);
        Ok(match &self.boosters {
            Boosters::Binary(gbdt) => Predictions::Classes(
                gbdt.decision_function(&test_x)
                    .into_iter()
                    .map(|d| (d > 0.0) as usize)
                    .collect(),
            ),
            Boosters::OneVsRest(boosters) => {
                let scores: Vec<Vec<f32>> =
                    boosters.iter().map(|g| g.decision_function(&test_x)).collect();
                Predictions::Classes(
                    (0..data.len())
                        .map(|row| {
                            (0..scores.len()).fold(0usize, |best, c| {
                                if scores[c][row] > scores[best][row] {
                                    c
                                } else {
                                    best
                                }
                            })
                        })
                        .collect(),
                )
            }
            Boosters::Regressor(gbdt) => Predictions::Values(
                gbdt.predict(&test_x).into_iter().map(|v| v as f64).collect(),
            ),
        })
    }

    fn n_train(&self) -> usize {
        self.n_train
    }
}
