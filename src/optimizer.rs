//! Hyperparameter optimizer collaborator.
//!
//! The engine hands a learner and a training partition to a
//! [`HyperparameterOptimizer`] and blocks until it returns a tuned learner.
//! Where the search runs is the optimizer's business; the built-in
//! [`GridSearchOptimizer`] only runs locally.
use crate::config::ExecutionBackend;
use crate::data_handling::Dataset;
use crate::error::{EngineError, Result};
use crate::evaluation::cross_validate;
use crate::folds::{Sampler, StratifiedSampler};
use crate::models::learner_trait::{Learner, ParamSet, ParamSpec};

/// Everything an optimizer needs to tune one learner on one outer fold.
pub struct TuningRequest<'a> {
    pub learner: &'a dyn Learner,
    pub train: &'a Dataset,
    /// Names of the parameters to tune.
    pub param_names: &'a [String],
    pub inner_folds: usize,
    /// Applied to every candidate and never tuned.
    pub fixed_params: &'a ParamSet,
    pub backend: ExecutionBackend,
    /// Random stream for the inner splits.
    pub stream: u64,
}

pub struct TunedLearner {
    pub learner: Box<dyn Learner>,
    /// Inner cross-validated score of the chosen parameters (CA or R²).
    pub score: Option<f64>,
    pub params: ParamSet,
}

pub trait HyperparameterOptimizer: Send + Sync {
    fn supports(&self, backend: ExecutionBackend) -> bool;

    /// Tune `request.learner`. An error means the learner could not be
    /// optimized and is fatal for that learner.
    fn tune(&self, request: &TuningRequest<'_>) -> Result<TunedLearner>;
}

/// Exhaustive search over the learner's declared grid, restricted to the
/// requested names, scored by inner k-fold cross-validation.
pub struct GridSearchOptimizer {
    sampler: Box<dyn Sampler>,
}

impl GridSearchOptimizer {
    pub fn new(sampler: Box<dyn Sampler>) -> Self {
        Self { sampler }
    }

    fn candidates(&self, request: &TuningRequest<'_>) -> Result<Vec<ParamSet>> {
        let grid = request.learner.param_grid();
        let mut specs: Vec<&ParamSpec> = Vec::new();
        for name in request.param_names {
            if request.fixed_params.contains_key(name) {
                continue;
            }
            let spec = grid.iter().find(|s| &s.name == name).ok_or_else(|| {
                EngineError::TuningFailure {
                    learner: request.learner.name().to_string(),
                    reason: format!("parameter {} is not tunable", name),
                }
            })?;
            specs.push(spec);
        }

        let mut sets = vec![request.fixed_params.clone()];
        for spec in specs {
            sets = sets
                .iter()
                .flat_map(|set| {
                    spec.candidates.iter().map(move |value| {
                        let mut next = set.clone();
                        next.insert(spec.name.clone(), value.clone());
                        next
                    })
                })
                .collect();
        }
        Ok(sets)
    }
}

impl Default for GridSearchOptimizer {
    fn default() -> Self {
        Self::new(Box::new(StratifiedSampler::new(0)))
    }
}

impl HyperparameterOptimizer for GridSearchOptimizer {
    fn supports(&self, backend: ExecutionBackend) -> bool {
        backend == ExecutionBackend::Local
    }

    fn tune(&self, request: &TuningRequest<'_>) -> Result<TunedLearner> {
        if !self.supports(request.backend) {
            return Err(EngineError::config(format!(
                "Grid search cannot run on the {:?} backend",
                request.backend
            )));
        }
        let name = request.learner.name();
        let candidates = self.candidates(request)?;
        log::debug!("{}: evaluating {} parameter sets", name, candidates.len());

        let mut best: Option<(f64, ParamSet, Box<dyn Learner>)> = None;
        for params in candidates {
            let learner = match request.learner.with_params(&params) {
                Ok(l) => l,
                Err(e) => {
                    log::debug!("{}: skipping {:?}: {}", name, params, e);
                    continue;
                }
            };
            let score = match cross_validate(
                learner.as_ref(),
                request.train,
                request.inner_folds,
                self.sampler.as_ref(),
                request.stream,
            ) {
                Ok(s) if s.is_finite() => s,
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("{}: {:?} failed: {}", name, params, e);
                    continue;
                }
            };
            log::trace!("{}: {:?} scored {:.4}", name, params, score);
            if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                best = Some((score, params, learner));
            }
        }

        let (score, params, learner) = best.ok_or_else(|| EngineError::TuningFailure {
            learner: name.to_string(),
            reason: "no parameter set could be evaluated".to_string(),
        })?;
        log::debug!("{}: best parameters {:?} (score {:.4})", name, params, score);
        Ok(TunedLearner {
            learner,
            score: Some(score),
            params,
        })
    }
}
