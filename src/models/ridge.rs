//! Linear least squares with an L2 penalty.
//!
//! Features are standardized on the training partition. Classification fits
//! one ±1 target per class and predicts the class with the highest score.
use ndarray::{Array1, Array2, Axis};

use crate::data_handling::{Dataset, Response};
use crate::error::{EngineError, Result};
use crate::models::learner_trait::{Learner, Model, ParamSet, ParamSpec, ParamValue, Predictions};
use crate::preprocessing::{fit_scaler, Scaler};

#[derive(Debug, Clone)]
pub struct RidgeLearner {
    name: String,
    alpha: f64,
}

impl RidgeLearner {
    pub fn new(name: &str, alpha: f64) -> Self {
        Self {
            name: name.to_string(),
            alpha,
        }
    }
}

pub struct RidgeModel {
    scaler: Scaler,
    /// One column of weights per output.
    weights: Array2<f64>,
    intercepts: Array1<f64>,
    classification: bool,
    n_train: usize,
}

impl Learner for RidgeLearner {
    fn name(&self) -> &str {
        &self.name
    }

    fn fit(&self, train: &Dataset) -> Result<Box<dyn Model>> {
        if train.is_empty() {
            return Err(EngineError::evaluation("Cannot fit on an empty training set"));
        }
        let (targets, classification) = match &train.response {
            Response::Classes { labels, values } => {
                let mut t = Array2::from_elem((values.len(), labels.len()), -1.0);
                for (row, &class) in values.iter().enumerate() {
                    t[(row, class)] = 1.0;
                }
                (t, true)
            }
            Response::Continuous(values) => (
                Array2::from_shape_vec((values.len(), 1), values.clone())
                    .map_err(|e| EngineError::evaluation(e.to_string()))?,
                false,
            ),
        };

        let scaler = fit_scaler(&train.x);
        let z = scaler.transform(&train.x);
        let intercepts = targets
            .mean_axis(Axis(0))
            .ok_or_else(|| EngineError::evaluation("Empty target matrix"))?;
        let centered = &targets - &intercepts;

        let mut gram = z.t().dot(&z);
        for i in 0..gram.nrows() {
            gram[(i, i)] += self.alpha;
        }
        let rhs = z.t().dot(&centered);
        let weights = solve_cholesky(gram, rhs).ok_or_else(|| {
            EngineError::evaluation(format!(
                "Ridge system is not positive definite (alpha = {})",
                self.alpha
            ))
        })?;

        Ok(Box::new(RidgeModel {
            scaler,
            weights,
            intercepts,
            classification,
            n_train: train.len(),
        }))
    }

    fn params(&self) -> ParamSet {
        ParamSet::from([("alpha".to_string(), ParamValue::Float(self.alpha))])
    }

    fn param_grid(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new(
            "alpha",
            [0.01, 0.1, 1.0, 10.0, 100.0].into_iter().map(ParamValue::Float).collect(),
        )]
    }

    fn with_params(&self, params: &ParamSet) -> Result<Box<dyn Learner>> {
        let mut learner = self.clone();
        if let Some(value) = params.get("alpha") {
            learner.alpha = value
                .as_f64()
                .filter(|a| *a >= 0.0)
                .ok_or_else(|| EngineError::config(format!("Invalid alpha: {}", value)))?;
        }
        Ok(Box::new(learner))
    }
}

impl Model for RidgeModel {
    fn predict(&self, data: &Dataset) -> Result<Predictions> {
        if data.n_features() != self.scaler.mean.len() {
            return Err(EngineError::evaluation(format!(
                "Model expects {} features, got {}",
                self.scaler.mean.len(),
                data.n_features()
            )));
        }
        let scores = self.scaler.transform(&data.x).dot(&self.weights) + &self.intercepts;
        if self.classification {
            let classes = scores
                .rows()
                .into_iter()
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .fold((0usize, f64::NEG_INFINITY), |best, (c, &s)| {
                            if s > best.1 {
                                (c, s)
                            } else {
                                best
                            }
                        })
                        .0
                })
                .collect();
            Ok(Predictions::Classes(classes))
        } else {
            Ok(Predictions::Values(scores.column(0).to_vec()))
        }
    }

    fn n_train(&self) -> usize {
        self.n_train
    }
}

/// Solve `a * x = b` for symmetric positive definite `a`.
fn solve_cholesky(a: Array2<f64>, b: Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[(i, j)];
            for k in 0..j {
                sum -= l[(i, k)] * l[(j, k)];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[(i, i)] = sum.sqrt();
            } else {
                l[(i, j)] = sum / l[(j, j)];
            }
        }
    }

    let mut x = b;
    for col in 0..x.ncols() {
        // forward: L y = b
        for i in 0..n {
            let mut sum = x[(i, col)];
            for k in 0..i {
                sum -= l[(i, k)] * x[(k, col)];
            }
            x[(i, col)] = sum / l[(i, i)];
        }
        // backward: L^T x = y
        for i in (0..n).rev() {
            let mut sum = x[(i, col)];
            for k in (i + 1)..n {
                sum -= l[(k, i)] * x[(k, col)];
            }
            x[(i, col)] = sum / l[(i, i)];
        }
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> Dataset {
        let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x + 1.0).collect();
        Dataset::new(
            Array2::from_shape_vec((n, 1), xs).unwrap(),
            vec!["x".into()],
            Response::Continuous(ys),
        )
        .unwrap()
    }

    #[test]
    fn recovers_linear_relation() {
        let data = line(30);
        let model = RidgeLearner::new("PLS", 1e-8).fit(&data).unwrap();
        let Predictions::Values(pred) = model.predict(&data).unwrap() else {
            panic!("expected values");
        };
        for (p, o) in pred.iter().zip(data.continuous_values().unwrap()) {
            assert!((p - o).abs() < 1e-5);
        }
    }

    #[test]
    fn separates_two_classes() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let values: Vec<usize> = (0..20).map(|i| (i >= 10) as usize).collect();
        let data = Dataset::new(
            Array2::from_shape_vec((20, 1), xs).unwrap(),
            vec!["x".into()],
            Response::Classes {
                labels: vec!["low".into(), "high".into()],
                values: values.clone(),
            },
        )
        .unwrap();
        let model = RidgeLearner::new("PLS", 0.1).fit(&data).unwrap();
        assert_eq!(model.predict(&data).unwrap(), Predictions::Classes(values));
    }

    #[test]
    fn with_params_overrides_alpha() {
        let learner = RidgeLearner::new("PLS", 1.0);
        let tuned = learner
            .with_params(&ParamSet::from([("alpha".to_string(), ParamValue::Float(10.0))]))
            .unwrap();
        assert_eq!(tuned.params()["alpha"], ParamValue::Float(10.0));
        let bad = ParamSet::from([("alpha".to_string(), ParamValue::Text("big".into()))]);
        assert!(learner.with_params(&bad).is_err());
    }

    #[test]
    fn cholesky_solves_small_system() {
        let a = Array2::from_shape_vec((2, 2), vec![4.0, 2.0, 2.0, 3.0]).unwrap();
        let b = Array2::from_shape_vec((2, 1), vec![2.0, 1.0]).unwrap();
        let x = solve_cholesky(a, b).unwrap();
        assert!((x[(0, 0)] - 0.5).abs() < 1e-12);
        assert!(x[(1, 0)].abs() < 1e-12);
    }
}
