//! Training and evaluation of one learner on one outer fold.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{ExecutionBackend, StabilityThresholds};
use crate::data_handling::{Dataset, ResponseType};
use crate::error::{EngineError, Result};
use crate::evaluation::{cross_validate, evaluate_model, FoldEvaluation};
use crate::folds::{FoldAssignment, Sampler};
use crate::models::learner_trait::{Learner, Model, ParamSet};
use crate::optimizer::{HyperparameterOptimizer, TuningRequest};
use crate::stats::{create_stat_report, AggregateInput, FoldRecord, StatReport};
use crate::validation::{check_train_data, is_trainable, MIN_TRAIN_EXAMPLES};

/// Inner folds of a specialized learner's own search.
pub const SELF_OPTIMIZE_FOLDS: usize = 5;
/// Folds of the cross-validation that stands in for a tuned weight.
pub const WEIGHT_CV_FOLDS: usize = 5;

/// Shared, read-only inputs of every fold of a run.
pub struct FoldContext<'a> {
    pub data: &'a Dataset,
    pub assignment: &'a FoldAssignment,
    pub inner_folds: usize,
    pub param_names: &'a [String],
    pub fixed_params: &'a ParamSet,
    pub backend: ExecutionBackend,
    pub sampler: &'a dyn Sampler,
    pub optimizer: &'a dyn HyperparameterOptimizer,
}

/// Everything one (learner, fold) pair produced.
pub struct FoldOutcome {
    pub fold: usize,
    pub model: Arc<dyn Model>,
    pub weight: Option<f64>,
    pub alert: Option<String>,
    pub n_train: usize,
    pub n_test: usize,
    pub evaluation: FoldEvaluation,
}

/// Whether inner-fold optimization should be skipped for `train`.
///
/// Regression skips when the inner training sets would hold fewer than
/// [`MIN_TRAIN_EXAMPLES`] examples. Both response types then draw one inner
/// split and skip when its training part fails the soft check.
/// Classification has no size pre-check and relies on the soft check alone.
pub fn skip_optimization(
    train: &Dataset,
    inner_folds: usize,
    sampler: &dyn Sampler,
    stream: u64,
) -> bool {
    if train.response_type() == ResponseType::Regression {
        let inner_size = train.len() as f64 * (1.0 - 1.0 / inner_folds as f64);
        if inner_size < MIN_TRAIN_EXAMPLES as f64 {
            return true;
        }
    }
    match sampler.sample(train, inner_folds, stream) {
        Ok(inner) => {
            let keep: Vec<bool> = inner.labels().iter().map(|&l| l != 1).collect();
            !is_trainable(&train.filter(&keep))
        }
        Err(e) => {
            log::debug!("Inner split failed: {}", e);
            true
        }
    }
}

fn skip_alert(fold: usize) -> String {
    format!("Fold {}: Too few compounds to optimize model hyper-parameters", fold)
}

/// Train `learner` on every example outside `fold` and evaluate it on `fold`.
pub fn train_fold(learner: &dyn Learner, fold: usize, ctx: &FoldContext<'_>) -> Result<FoldOutcome> {
    let name = learner.name();
    let (train, test) = ctx.assignment.split(ctx.data, fold);
    let view = learner.feature_view();
    let (train, test) = (train.view(view), test.view(view));
    check_train_data(&train)?;

    let response_type = train.response_type();
    let stream = fold as u64;
    let mut alert = None;

    let (model, weight): (Box<dyn Model>, f64) =
        if skip_optimization(&train, ctx.inner_folds, ctx.sampler, stream) {
            log::info!("{} fold {}: too few examples to optimize, using defaults", name, fold);
            alert = Some(skip_alert(fold));
            let weight = cross_validate(learner, &train, WEIGHT_CV_FOLDS, ctx.sampler, stream)?;
            (learner.fit(&train)?, weight)
        } else if learner.is_specialized() {
            log::debug!("{} fold {}: self-optimizing", name, fold);
            let tuned = learner.optimize(&train, SELF_OPTIMIZE_FOLDS)?;
            let model = match (response_type, tuned.model) {
                (ResponseType::Classification, Some(model)) => model,
                _ => learner.fit(&train)?,
            };
            (model, tuned.score)
        } else {
            log::debug!("{} fold {}: optimizing {:?}", name, fold, ctx.param_names);
            let tuned = ctx.optimizer.tune(&TuningRequest {
                learner,
                train: &train,
                param_names: ctx.param_names,
                inner_folds: ctx.inner_folds,
                fixed_params: ctx.fixed_params,
                backend: ctx.backend,
                stream,
            })?;
            let weight = match response_type {
                ResponseType::Classification => tuned.score.ok_or_else(|| EngineError::TuningFailure {
                    learner: name.to_string(),
                    reason: "optimizer returned no accuracy".to_string(),
                })?,
                ResponseType::Regression => cross_validate(
                    tuned.learner.as_ref(),
                    &train,
                    WEIGHT_CV_FOLDS,
                    ctx.sampler,
                    stream,
                )?,
            };
            (tuned.learner.fit(&train)?, weight)
        };

    let evaluation = evaluate_model(model.as_ref(), &test)?;
    log::debug!("{} fold {}: {:?}", name, fold, evaluation.metric);
    Ok(FoldOutcome {
        fold,
        model: Arc::from(model),
        weight: Some(weight),
        alert,
        n_train: train.len(),
        n_test: test.len(),
        evaluation,
    })
}

/// Per-learner results assembled once all of its folds are in.
pub struct LearnerRun {
    pub report: StatReport,
    pub models: BTreeMap<usize, Arc<dyn Model>>,
    pub weights: BTreeMap<usize, f64>,
}

/// Collects fold outcomes of one learner, in any order.
pub struct LearnerRunBuilder {
    response_type: ResponseType,
    labels: Option<Vec<String>>,
    outcomes: Vec<FoldOutcome>,
    started: Instant,
}

impl LearnerRunBuilder {
    pub fn new(data: &Dataset) -> Self {
        Self {
            response_type: data.response_type(),
            labels: data.class_labels().map(|l| l.to_vec()),
            outcomes: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn push(&mut self, outcome: FoldOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn finish(mut self, n_outer_folds: usize, thresholds: &StabilityThresholds) -> LearnerRun {
        self.outcomes.sort_by_key(|o| o.fold);

        let records: Vec<FoldRecord> = self
            .outcomes
            .iter()
            .map(|o| FoldRecord {
                fold: o.fold,
                n_train: o.n_train,
                n_test: o.n_test,
                metric: o.evaluation.metric.clone(),
                weight: o.weight,
            })
            .collect();
        let exp_pred: Vec<(f64, f64)> = self
            .outcomes
            .iter()
            .flat_map(|o| o.evaluation.exp_pred.iter().copied())
            .collect();

        let mut report = create_stat_report(&AggregateInput {
            response_type: self.response_type,
            labels: self.labels.as_deref(),
            folds: &records,
            exp_pred: &exp_pred,
            n_outer_folds,
            thresholds,
        });
        let alerts: Vec<&str> = self.outcomes.iter().filter_map(|o| o.alert.as_deref()).collect();
        if !alerts.is_empty() {
            report.user_alert = Some(alerts.join("\n"));
        }
        report.running_time = Some(self.started.elapsed().as_secs_f64());

        let weights = self
            .outcomes
            .iter()
            .filter_map(|o| o.weight.map(|w| (o.fold, w)))
            .collect();
        let models = self.outcomes.into_iter().map(|o| (o.fold, o.model)).collect();
        LearnerRun {
            report,
            models,
            weights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::Response;
    use crate::folds::StratifiedSampler;
    use crate::models::majority::MajorityLearner;
    use crate::optimizer::GridSearchOptimizer;
    use ndarray::Array2;

    fn classes(n_a: usize, n_b: usize) -> Dataset {
        let values: Vec<usize> = (0..n_a + n_b).map(|i| (i >= n_a) as usize).collect();
        Dataset::new(
            Array2::zeros((n_a + n_b, 1)),
            vec!["f".into()],
            Response::Classes {
                labels: vec!["a".into(), "b".into()],
                values,
            },
        )
        .unwrap()
    }

    fn regression(n: usize) -> Dataset {
        Dataset::new(
            Array2::from_shape_vec((n, 1), (0..n).map(|i| i as f64).collect()).unwrap(),
            vec!["x".into()],
            Response::Continuous((0..n).map(|i| i as f64).collect()),
        )
        .unwrap()
    }

    #[test]
    fn regression_skips_below_inner_size() {
        let sampler = StratifiedSampler::new(0);
        // 24 * (1 - 1/5) = 19.2 < 20
        assert!(skip_optimization(&regression(24), 5, &sampler, 1));
        // 30 * 0.8 = 24, inner train 24 >= 20
        assert!(!skip_optimization(&regression(30), 5, &sampler, 1));
    }

    /// Holds out only the first example in inner fold 1.
    struct FirstExampleOut;

    impl Sampler for FirstExampleOut {
        fn sample(&self, data: &Dataset, n_folds: usize, _stream: u64) -> Result<FoldAssignment> {
            Ok(FoldAssignment::new(
                (0..data.len())
                    .map(|i| if i == 0 { 1 } else { i % (n_folds - 1) + 2 })
                    .collect(),
            ))
        }
    }

    #[test]
    fn classification_has_no_size_precheck() {
        // 24 * (1 - 1/5) < 20 skips regression, while classification only
        // looks at the drawn inner training part (23 examples, 11 + 12).
        assert!(skip_optimization(&regression(24), 5, &FirstExampleOut, 1));
        assert!(!skip_optimization(&classes(12, 12), 5, &FirstExampleOut, 1));
    }

    #[test]
    fn soft_check_decides_for_classification() {
        let sampler = StratifiedSampler::new(0);
        assert!(!skip_optimization(&classes(30, 30), 5, &sampler, 1));
        // the rare class drops below 10 in the inner training part
        assert!(skip_optimization(&classes(40, 11), 5, &sampler, 1));
    }

    #[test]
    fn fold_outcome_records_sizes_and_weight() {
        let data = classes(60, 40);
        let sampler = StratifiedSampler::new(0);
        let assignment = sampler.sample(&data, 5, 0).unwrap();
        let optimizer = GridSearchOptimizer::default();
        let fixed = ParamSet::new();
        let ctx = FoldContext {
            data: &data,
            assignment: &assignment,
            inner_folds: 5,
            param_names: &[],
            fixed_params: &fixed,
            backend: ExecutionBackend::Local,
            sampler: &sampler,
            optimizer: &optimizer,
        };
        let outcome = train_fold(&MajorityLearner::new("Majority"), 1, &ctx).unwrap();
        assert_eq!(outcome.n_test, 20);
        assert_eq!(outcome.n_train, 80);
        assert!((outcome.weight.unwrap() - 0.6).abs() < 1e-12);
        assert!(outcome.alert.is_none());
    }

    #[test]
    fn skipped_fold_carries_alert_and_cv_weight() {
        // fold 3 trains on 38 + 10; the inner split leaves fewer than 10 "b"
        let data = classes(47, 13);
        let sampler = StratifiedSampler::new(0);
        let assignment = sampler.sample(&data, 5, 0).unwrap();
        let optimizer = GridSearchOptimizer::default();
        let fixed = ParamSet::new();
        let ctx = FoldContext {
            data: &data,
            assignment: &assignment,
            inner_folds: 5,
            param_names: &[],
            fixed_params: &fixed,
            backend: ExecutionBackend::Local,
            sampler: &sampler,
            optimizer: &optimizer,
        };
        let (train, _) = assignment.split(&data, 3);
        assert!(skip_optimization(&train, 5, &sampler, 3));

        let outcome = train_fold(&MajorityLearner::new("Majority"), 3, &ctx).unwrap();
        assert_eq!(
            outcome.alert.as_deref(),
            Some("Fold 3: Too few compounds to optimize model hyper-parameters")
        );
        let expected = cross_validate(&MajorityLearner::new("Majority"), &train, 5, &sampler, 3).unwrap();
        assert!((outcome.weight.unwrap() - expected).abs() < 1e-12);
        assert!((expected - 38.0 / 48.0).abs() < 1e-12);
        assert_eq!(outcome.n_train, 48);
        assert_eq!(outcome.model.n_train(), 48);
    }

    #[test]
    fn too_small_training_set_is_rejected() {
        let data = classes(12, 8);
        let sampler = StratifiedSampler::new(0);
        let assignment = sampler.sample(&data, 5, 0).unwrap();
        let optimizer = GridSearchOptimizer::default();
        let fixed = ParamSet::new();
        let ctx = FoldContext {
            data: &data,
            assignment: &assignment,
            inner_folds: 5,
            param_names: &[],
            fixed_params: &fixed,
            backend: ExecutionBackend::Local,
            sampler: &sampler,
            optimizer: &optimizer,
        };
        let result = train_fold(&MajorityLearner::new("Majority"), 1, &ctx);
        assert!(matches!(result, Err(EngineError::DataSufficiency { .. })));
    }
}
