//! Evaluating fitted models on held-out partitions.
use serde::{Deserialize, Serialize};

use crate::data_handling::{Dataset, Response};
use crate::error::{EngineError, Result};
use crate::folds::Sampler;
use crate::metrics::{classification_accuracy, confusion_matrix, r_squared, rmse, ConfusionMatrix};
use crate::models::learner_trait::{Learner, Model, Predictions};

/// Metric pair recorded for one outer fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FoldMetric {
    Classification { ca: f64, cm: ConfusionMatrix },
    Regression { rmse: Option<f64>, q2: Option<f64> },
}

/// Result of scoring one model on one test partition.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldEvaluation {
    pub metric: FoldMetric,
    /// (observed, predicted) pairs, filled for regression only.
    pub exp_pred: Vec<(f64, f64)>,
}

/// Score `model` on `test`.
pub fn evaluate_model(model: &dyn Model, test: &Dataset) -> Result<FoldEvaluation> {
    let predictions = model.predict(test)?;
    score_predictions(test, &predictions)
}

pub fn score_predictions(test: &Dataset, predictions: &Predictions) -> Result<FoldEvaluation> {
    if predictions.len() != test.len() {
        return Err(EngineError::evaluation(format!(
            "Model returned {} predictions for {} examples",
            predictions.len(),
            test.len()
        )));
    }
    match (&test.response, predictions) {
        (Response::Classes { labels, values }, Predictions::Classes(predicted)) => {
            if let Some(bad) = predicted.iter().find(|&&p| p >= labels.len()) {
                return Err(EngineError::evaluation(format!(
                    "Predicted class index {} out of range for {} labels",
                    bad,
                    labels.len()
                )));
            }
            Ok(FoldEvaluation {
                metric: FoldMetric::Classification {
                    ca: classification_accuracy(values, predicted),
                    cm: confusion_matrix(values, predicted, labels.len()),
                },
                exp_pred: Vec::new(),
            })
        }
        (Response::Continuous(observed), Predictions::Values(predicted)) => {
            let exp_pred: Vec<(f64, f64)> =
                observed.iter().copied().zip(predicted.iter().copied()).collect();
            Ok(FoldEvaluation {
                metric: FoldMetric::Regression {
                    rmse: rmse(&exp_pred),
                    q2: r_squared(&exp_pred),
                },
                exp_pred,
            })
        }
        _ => Err(EngineError::evaluation(format!(
            "Model predictions do not match the {} response",
            test.response_type()
        ))),
    }
}

/// Plain k-fold cross-validation of `learner` on `data`.
///
/// Predictions of all folds are pooled; the score is the classification
/// accuracy or the R² of the pooled predictions.
pub fn cross_validate(
    learner: &dyn Learner,
    data: &Dataset,
    n_folds: usize,
    sampler: &dyn Sampler,
    stream: u64,
) -> Result<f64> {
    let assignment = sampler.sample(data, n_folds, stream)?;
    let mut correct = 0usize;
    let mut total = 0usize;
    let mut exp_pred: Vec<(f64, f64)> = Vec::with_capacity(data.len());

    for fold in assignment.folds() {
        let (train, test) = assignment.split(data, fold);
        let model = learner.fit(&train)?;
        let evaluation = evaluate_model(model.as_ref(), &test)?;
        match evaluation.metric {
            FoldMetric::Classification { cm, .. } => {
                correct += (0..cm.len()).map(|i| cm[i][i] as usize).sum::<usize>();
                total += test.len();
            }
            FoldMetric::Regression { .. } => exp_pred.extend(evaluation.exp_pred),
        }
    }

    match &data.response {
        Response::Classes { .. } => {
            if total == 0 {
                return Err(EngineError::evaluation("Cross-validation produced no predictions"));
            }
            Ok(correct as f64 / total as f64)
        }
        Response::Continuous(_) => r_squared(&exp_pred).ok_or_else(|| {
            EngineError::evaluation("R2 is undefined for a response without variance")
        }),
    }
}
