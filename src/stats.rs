//! Aggregation of per-fold results into one report per learner, and the
//! stability test applied to it.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::config::StabilityThresholds;
use crate::data_handling::ResponseType;
use crate::evaluation::FoldMetric;
use crate::metrics::{mcc, r_squared, rmse, ConfusionMatrix};

/// What one outer fold of one learner produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldRecord {
    pub fold: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub metric: FoldMetric,
    /// Optimization weight later used by the consensus.
    pub weight: Option<f64>,
}

/// Per-fold breakdown kept in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldStat {
    pub fold: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub ca: Option<f64>,
    pub mcc: Option<f64>,
    pub cm: Option<ConfusionMatrix>,
    pub rmse: Option<f64>,
    pub q2: Option<f64>,
    pub opt_weight: Option<f64>,
}

/// Aggregate over all outer folds of one learner (or of the consensus).
///
/// A report with every field unset is the placeholder of a learner that
/// failed before producing results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatReport {
    pub response_type: Option<ResponseType>,
    pub labels: Option<Vec<String>>,
    pub ca: Option<f64>,
    pub cm: Option<ConfusionMatrix>,
    pub mcc: Option<f64>,
    pub q2: Option<f64>,
    pub rmse: Option<f64>,
    pub stability_value: Option<f64>,
    pub stable: bool,
    /// Reserved for downstream model selection.
    pub selected: bool,
    pub user_alert: Option<String>,
    pub fold_stat: Option<Vec<FoldStat>>,
    /// Seconds spent on the learner.
    pub running_time: Option<f64>,
    /// Member reports, set on the consensus only.
    pub individual_statistics: Option<BTreeMap<String, StatReport>>,
}

impl StatReport {
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_placeholder(&self) -> bool {
        self.response_type.is_none() && self.fold_stat.is_none()
    }

    /// Headline metric: CA for classification, Q² for regression.
    pub fn headline(&self) -> Option<f64> {
        match self.response_type? {
            ResponseType::Classification => self.ca,
            ResponseType::Regression => self.q2,
        }
    }
}

pub struct AggregateInput<'a> {
    pub response_type: ResponseType,
    pub labels: Option<&'a [String]>,
    pub folds: &'a [FoldRecord],
    /// Pooled (observed, predicted) pairs of all folds; regression only.
    pub exp_pred: &'a [(f64, f64)],
    pub n_outer_folds: usize,
    pub thresholds: &'a StabilityThresholds,
}

/// Combine per-fold results into a [`StatReport`].
///
/// # Arguments
///
/// * `input` - Per-fold records, pooled regression pairs and the run settings.
///
/// # Returns
///
/// The aggregated report. Missing or inconsistent input yields the
/// placeholder report instead of an error.
pub fn create_stat_report(input: &AggregateInput<'_>) -> StatReport {
    if input.folds.is_empty() || input.folds.len() != input.n_outer_folds {
        log::warn!(
            "Cannot aggregate {} fold results for {} outer folds",
            input.folds.len(),
            input.n_outer_folds
        );
        return StatReport::placeholder();
    }

    let mut report = match input.response_type {
        ResponseType::Classification => aggregate_classification(input),
        ResponseType::Regression => aggregate_regression(input),
    }
    .unwrap_or_else(|| {
        log::warn!("Fold results do not match the {} response", input.response_type);
        StatReport::placeholder()
    });
    if report.is_placeholder() {
        return report;
    }

    let per_fold: Vec<Option<f64>> = report
        .fold_stat
        .iter()
        .flatten()
        .map(|f| match input.response_type {
            ResponseType::Classification => f.ca,
            ResponseType::Regression => f.q2,
        })
        .collect();
    let mean_test_size =
        input.folds.iter().map(|f| f.n_test as f64).sum::<f64>() / input.folds.len() as f64;
    report.stability_value = stability_value(&per_fold);
    report.stable = is_stable(
        report.stability_value,
        input.thresholds.threshold(input.response_type, mean_test_size),
    );
    report
}

fn fold_stat(record: &FoldRecord) -> FoldStat {
    let mut stat = FoldStat {
        fold: record.fold,
        n_train: record.n_train,
        n_test: record.n_test,
        ca: None,
        mcc: None,
        cm: None,
        rmse: None,
        q2: None,
        opt_weight: record.weight,
    };
    match &record.metric {
        FoldMetric::Classification { ca, cm } => {
            stat.ca = Some(*ca);
            stat.mcc = mcc(cm);
            stat.cm = Some(cm.clone());
        }
        FoldMetric::Regression { rmse, q2 } => {
            stat.rmse = *rmse;
            stat.q2 = *q2;
        }
    }
    stat
}

fn aggregate_classification(input: &AggregateInput<'_>) -> Option<StatReport> {
    let labels = input.labels?;
    let k = labels.len();
    let mut ca_sum = 0.0;
    let mut cm: ConfusionMatrix = vec![vec![0; k]; k];
    for record in input.folds {
        let FoldMetric::Classification { ca, cm: fold_cm } = &record.metric else {
            return None;
        };
        if fold_cm.len() != k || fold_cm.iter().any(|row| row.len() != k) {
            return None;
        }
        ca_sum += ca;
        for (row, fold_row) in cm.iter_mut().zip(fold_cm) {
            for (cell, v) in row.iter_mut().zip(fold_row) {
                *cell += v;
            }
        }
    }
    Some(StatReport {
        response_type: Some(ResponseType::Classification),
        labels: Some(labels.to_vec()),
        ca: Some(ca_sum / input.folds.len() as f64),
        mcc: mcc(&cm),
        cm: Some(cm),
        fold_stat: Some(input.folds.iter().map(fold_stat).collect()),
        ..StatReport::default()
    })
}

fn aggregate_regression(input: &AggregateInput<'_>) -> Option<StatReport> {
    if input.exp_pred.is_empty()
        || input
            .folds
            .iter()
            .any(|r| !matches!(r.metric, FoldMetric::Regression { .. }))
    {
        return None;
    }
    Some(StatReport {
        response_type: Some(ResponseType::Regression),
        q2: r_squared(input.exp_pred),
        rmse: rmse(input.exp_pred),
        fold_stat: Some(input.folds.iter().map(fold_stat).collect()),
        ..StatReport::default()
    })
}

/// Coefficient of variation of the per-fold metric.
///
/// `None` with fewer than two folds, an undefined fold metric or a zero mean.
pub fn stability_value(per_fold: &[Option<f64>]) -> Option<f64> {
    let values: Vec<f64> = per_fold.iter().copied().collect::<Option<Vec<f64>>>()?;
    if values.len() < 2 || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mean = values.iter().mean();
    if mean == 0.0 {
        return None;
    }
    let value = values.iter().std_dev() / mean.abs();
    value.is_finite().then_some(value)
}

pub fn is_stable(stability_value: Option<f64>, threshold: f64) -> bool {
    stability_value.map_or(false, |v| v < threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_record(fold: usize, ca: f64, cm: ConfusionMatrix) -> FoldRecord {
        let n_test = cm.iter().flatten().sum::<u64>() as usize;
        FoldRecord {
            fold,
            n_train: 80,
            n_test,
            metric: FoldMetric::Classification { ca, cm },
            weight: Some(0.5),
        }
    }

    #[test]
    fn classification_sums_matrices_and_averages_ca() {
        let labels = vec!["a".to_string(), "b".to_string()];
        let folds = vec![
            class_record(1, 0.75, vec![vec![2, 1], vec![0, 1]]),
            class_record(2, 0.5, vec![vec![1, 1], vec![1, 1]]),
        ];
        let thresholds = StabilityThresholds::default();
        let report = create_stat_report(&AggregateInput {
            response_type: ResponseType::Classification,
            labels: Some(&labels),
            folds: &folds,
            exp_pred: &[],
            n_outer_folds: 2,
            thresholds: &thresholds,
        });
        assert_eq!(report.cm, Some(vec![vec![3, 2], vec![1, 2]]));
        assert!((report.ca.unwrap() - 0.625).abs() < 1e-12);
        assert_eq!(report.fold_stat.as_ref().unwrap().len(), 2);
        assert_eq!(report.labels, Some(labels));
        // CV of (0.75, 0.5) is far above 0.10
        assert!(!report.stable);
    }

    #[test]
    fn regression_uses_pooled_pairs() {
        let folds = vec![
            FoldRecord {
                fold: 1,
                n_train: 2,
                n_test: 2,
                metric: FoldMetric::Regression {
                    rmse: Some(0.0),
                    q2: Some(1.0),
                },
                weight: None,
            },
            FoldRecord {
                fold: 2,
                n_train: 2,
                n_test: 2,
                metric: FoldMetric::Regression {
                    rmse: Some(1.0),
                    q2: Some(-1.0),
                },
                weight: None,
            },
        ];
        let pairs = [(1.0, 1.0), (2.0, 2.0), (3.0, 4.0), (4.0, 3.0)];
        let thresholds = StabilityThresholds::default();
        let report = create_stat_report(&AggregateInput {
            response_type: ResponseType::Regression,
            labels: None,
            folds: &folds,
            exp_pred: &pairs,
            n_outer_folds: 2,
            thresholds: &thresholds,
        });
        assert_eq!(report.q2, r_squared(&pairs));
        assert_eq!(report.rmse, rmse(&pairs));
        assert!((report.q2.unwrap() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn missing_folds_give_placeholder() {
        let thresholds = StabilityThresholds::default();
        let report = create_stat_report(&AggregateInput {
            response_type: ResponseType::Regression,
            labels: None,
            folds: &[],
            exp_pred: &[],
            n_outer_folds: 5,
            thresholds: &thresholds,
        });
        assert!(report.is_placeholder());
        assert!(!report.stable);
        assert_eq!(report, StatReport::placeholder());
    }

    #[test]
    fn stability_edge_cases() {
        assert_eq!(stability_value(&[Some(0.6)]), None);
        assert_eq!(stability_value(&[Some(0.6), None]), None);
        assert_eq!(stability_value(&[Some(0.0), Some(0.0)]), None);
        assert_eq!(stability_value(&[Some(0.6), Some(0.6), Some(0.6)]), Some(0.0));
        assert!(!is_stable(None, 0.1));
        assert!(is_stable(Some(0.0), 0.1));
        assert!(!is_stable(Some(0.1), 0.1));
    }

    #[test]
    fn placeholder_serializes_nulls() {
        let json = serde_json::to_value(StatReport::placeholder()).unwrap();
        assert!(json["ca"].is_null());
        assert_eq!(json["stable"], serde_json::Value::Bool(false));
    }
}
