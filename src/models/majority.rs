use crate::data_handling::{Dataset, Response};
use crate::error::{EngineError, Result};
use crate::models::learner_trait::{Learner, Model, ParamSet, Predictions};

/// Predicts the most frequent class, or the mean response.
#[derive(Debug, Clone)]
pub struct MajorityLearner {
    name: String,
}

impl MajorityLearner {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

enum Constant {
    Class(usize),
    Value(f64),
}

pub struct MajorityModel {
    constant: Constant,
    n_train: usize,
}

impl Learner for MajorityLearner {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&self, train: &Dataset) -> Result<Box<dyn Model>> {
        if train.is_empty() {
            return Err(EngineError::evaluation("Cannot fit on an empty training set"));
        }
        let constant = match &train.response {
            Response::Classes { .. } => {
                let counts = train.class_counts().unwrap_or_default();
                // first label wins ties
                let best = counts
                    .iter()
                    .enumerate()
                    .fold((0usize, 0usize), |best, (class, &count)| {
                        if count > best.1 {
                            (class, count)
                        } else {
                            best
                        }
                    });
                Constant::Class(best.0)
            }
            Response::Continuous(values) => {
                Constant::Value(values.iter().sum::<f64>() / values.len() as f64)
            }
        };
        Ok(Box::new(MajorityModel {
            constant,
            n_train: train.len(),
        }))
    }

    fn with_params(&self, _params: &ParamSet) -> Result<Box<dyn Learner>> {
        Ok(Box::new(self.clone()))
    }
}

impl Model for MajorityModel {
    fn predict(&self, data: &Dataset) -> Result<Predictions> {
        Ok(match self.constant {
            Constant::Class(c) => Predictions::Classes(vec![c; data.len()]),
            Constant::Value(v) => Predictions::Values(vec![v; data.len()]),
        })
    }

    fn n_train(&self) -> usize {
        self.n_train
    }
}
