//! Nested cross-validation engine.
//!
//! Runs every learner over every outer fold, isolates learner failures,
//! snapshots results after each learner and finally builds the consensus of
//! the stable learners.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::consensus::{select_pool, ConsensusSpec, PoolCandidate, VotingRule, CONSENSUS_NAME};
use crate::data_handling::{Dataset, FeatureView};
use crate::error::{EngineError, Result};
use crate::evaluation::evaluate_model;
use crate::folds::{build_sampler, partition, Partition, Sampler};
use crate::models::learner_trait::{check_param_names, Learner, Model};
use crate::optimizer::{GridSearchOptimizer, HyperparameterOptimizer};
use crate::persist::{JsonResultPersister, ResultPersister};
use crate::run_log::RunLog;
use crate::stats::StatReport;
use crate::trainer::{train_fold, FoldContext, FoldOutcome, LearnerRun, LearnerRunBuilder};
use crate::validation::check_train_data;

/// The learners of a run: one learner tuned over the configured parameter
/// list, or several named learners tuned over their default grids.
#[derive(Clone)]
pub enum LearnerSet {
    Single(Arc<dyn Learner>),
    Multi(Vec<(String, Arc<dyn Learner>)>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineOutcome {
    Single(StatReport),
    Multi(BTreeMap<String, StatReport>),
}

pub type ProgressCallback<'a> = &'a (dyn Fn(u8) -> bool + Sync);
pub type FoldModelCallback<'a> = &'a (dyn Fn(&str, usize, &dyn Model) + Sync);

enum Halt {
    Cancelled,
    Failed(EngineError),
}

impl From<EngineError> for Halt {
    fn from(e: EngineError) -> Self {
        Halt::Failed(e)
    }
}

/// Serializes progress reports so percentages stay monotonic under rayon.
struct Progress<'a> {
    callback: Option<ProgressCallback<'a>>,
    total: usize,
    done: Mutex<usize>,
    cancelled: AtomicBool,
}

impl<'a> Progress<'a> {
    fn new(callback: Option<ProgressCallback<'a>>, total: usize) -> Self {
        Self {
            callback,
            total: total.max(1),
            done: Mutex::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    fn step(&self) -> std::result::Result<(), Halt> {
        let mut done = self.done.lock().unwrap_or_else(|e| e.into_inner());
        // nothing is reported once a callback asked to stop
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Halt::Cancelled);
        }
        *done += 1;
        let percent = (100 * *done / self.total).min(100) as u8;
        if let Some(callback) = self.callback {
            if !callback(percent) {
                self.cancelled.store(true, Ordering::SeqCst);
                return Err(Halt::Cancelled);
            }
        }
        Ok(())
    }
}

pub struct UnbiasedAccuracyEngine {
    config: EngineConfig,
    data: Dataset,
    learners: LearnerSet,
    sampler: Box<dyn Sampler>,
    optimizer: Box<dyn HyperparameterOptimizer>,
    persister: Box<dyn ResultPersister>,
    run_log: RunLog,
}

impl UnbiasedAccuracyEngine {
    pub fn new(config: EngineConfig, data: Dataset, learners: LearnerSet) -> Self {
        let sampler = build_sampler(&config.sampler);
        let optimizer = Box::new(GridSearchOptimizer::new(build_sampler(&config.sampler)));
        let persister = Box::new(JsonResultPersister::new(config.results_file.clone()));
        let run_log = RunLog::new(config.log_file.clone());
        Self {
            config,
            data,
            learners,
            sampler,
            optimizer,
            persister,
            run_log,
        }
    }

    pub fn with_sampler(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_optimizer(mut self, optimizer: Box<dyn HyperparameterOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_persister(mut self, persister: Box<dyn ResultPersister>) -> Self {
        self.persister = persister;
        self
    }

    pub fn run(&self) -> Result<Option<EngineOutcome>> {
        self.run_with_callbacks(None, None)
    }

    /// Run the whole estimation.
    ///
    /// Returns `Ok(None)` when the progress callback cancelled the run, and an
    /// error only for problems detected before any learner is trained.
    pub fn run_with_callbacks(
        &self,
        progress: Option<ProgressCallback<'_>>,
        fold_model: Option<FoldModelCallback<'_>>,
    ) -> Result<Option<EngineOutcome>> {
        let learners = self.ordered_learners();
        self.check_inputs(&learners)?;
        self.data.log_input_data_summary();

        let partition = partition(
            &self.data,
            self.config.outer_folds,
            self.config.fold_control.as_ref(),
            self.sampler.as_ref(),
        )?;
        let folds = partition.assignment.folds();
        self.check_fold_training_sets(&partition, &folds)?;
        self.run_log.line(&format!(
            "Starting nested cross-validation: {} learners, {} outer folds",
            learners.len(),
            folds.len()
        ));

        let tracker = Progress::new(progress, learners.len() * folds.len());
        let mut results: BTreeMap<String, StatReport> = BTreeMap::new();
        let mut runs: BTreeMap<String, LearnerRun> = BTreeMap::new();

        for (name, learner) in &learners {
            self.run_log.line(&format!("Calculating statistics for learner {}", name));
            match self.run_learner(name, learner.as_ref(), &partition, &folds, &tracker, fold_model) {
                Ok(run) => {
                    self.run_log.line(&format!("{}: {}", name, summary(&run.report)));
                    results.insert(name.clone(), run.report.clone());
                    runs.insert(name.clone(), run);
                }
                Err(Halt::Cancelled) => {
                    self.run_log.line("Run cancelled by the progress callback");
                    return Ok(None);
                }
                Err(Halt::Failed(e)) => {
                    log::error!("{} failed with {}: {}", name, e.kind(), e);
                    log::debug!("{:?}", e);
                    self.run_log
                        .line(&format!("{} failed with {}: {}", name, e.kind(), e));
                    results.insert(name.clone(), StatReport::placeholder());
                }
            }
            if self.config.verbosity > 0 {
                if let Some(report) = results.get(name) {
                    match serde_json::to_string_pretty(report) {
                        Ok(json) => log::info!("{} statistics:\n{}", name, json),
                        Err(e) => log::warn!("Could not serialize statistics of {}: {}", name, e),
                    }
                }
            }
            self.checkpoint(&results);
        }

        if results.len() == 1 {
            if results.values().all(StatReport::is_placeholder) {
                log::warn!("No statistics available");
            }
            let report = results.into_values().next().unwrap_or_default();
            return Ok(Some(EngineOutcome::Single(report)));
        }

        let candidates: Vec<PoolCandidate<'_>> = learners
            .iter()
            .map(|(name, learner)| PoolCandidate {
                name,
                stable: results.get(name).map_or(false, |r| r.stable),
                specialized: learner.is_specialized(),
            })
            .collect();
        let pool: Vec<String> = select_pool(&candidates)
            .into_iter()
            .filter(|name| runs.contains_key(name))
            .collect();

        if pool.len() >= 2 {
            self.run_log
                .line(&format!("Building consensus of {}", pool.join(", ")));
            let report = match self.run_consensus(&pool, &runs, &results, &partition, &folds) {
                Ok(report) => report,
                Err(e) => {
                    log::error!("Consensus failed with {}: {}", e.kind(), e);
                    StatReport::placeholder()
                }
            };
            self.run_log
                .line(&format!("{}: {}", CONSENSUS_NAME, summary(&report)));
            results.insert(CONSENSUS_NAME.to_string(), report);
            self.checkpoint(&results);
        } else {
            log::info!("Consensus skipped: {} eligible learners", pool.len());
        }

        if results.values().all(StatReport::is_placeholder) {
            log::warn!("No statistics available");
        }
        Ok(Some(EngineOutcome::Multi(results)))
    }

    /// Insertion order with the priority learner moved first.
    fn ordered_learners(&self) -> Vec<(String, Arc<dyn Learner>)> {
        let mut learners = match &self.learners {
            LearnerSet::Single(learner) => vec![(learner.name().to_string(), learner.clone())],
            LearnerSet::Multi(list) => list.clone(),
        };
        if let Some(priority) = &self.config.priority_learner {
            if let Some(pos) = learners.iter().position(|(name, _)| name == priority) {
                let first = learners.remove(pos);
                learners.insert(0, first);
            }
        }
        learners
    }

    fn param_names(&self, learner: &dyn Learner) -> Vec<String> {
        match &self.learners {
            LearnerSet::Single(_) => self.config.param_list.clone().unwrap_or_default(),
            LearnerSet::Multi(_) => learner.param_grid().into_iter().map(|p| p.name).collect(),
        }
    }

    fn check_inputs(&self, learners: &[(String, Arc<dyn Learner>)]) -> Result<()> {
        if learners.is_empty() {
            return Err(EngineError::config("No learners were supplied"));
        }
        if self.config.outer_folds < 2 || self.config.inner_folds < 2 {
            return Err(EngineError::config(format!(
                "Fold counts must be at least 2 (outer {}, inner {})",
                self.config.outer_folds, self.config.inner_folds
            )));
        }
        if self.data.is_empty() {
            return Err(EngineError::config("The dataset is empty"));
        }
        if self.data.len() / self.config.outer_folds < 1 {
            return Err(EngineError::config(format!(
                "Too few examples ({}) for {} outer folds",
                self.data.len(),
                self.config.outer_folds
            )));
        }
        if !self.optimizer.supports(self.config.backend) {
            return Err(EngineError::config(format!(
                "Invalid queue type: {:?}",
                self.config.backend
            )));
        }
        match &self.learners {
            LearnerSet::Single(learner) => {
                let names = self.config.param_list.as_deref().unwrap_or_default();
                if names.is_empty() {
                    return Err(EngineError::config(
                        "A single learner needs a non-empty list of parameters to optimize",
                    ));
                }
                check_param_names(learner.as_ref(), names)?;
            }
            LearnerSet::Multi(list) => {
                if self.config.param_list.is_some() {
                    log::warn!("param_list is ignored when several learners are given");
                }
                for (i, (name, _)) in list.iter().enumerate() {
                    if name == CONSENSUS_NAME {
                        return Err(EngineError::config(format!(
                            "{} is reserved for the consensus model",
                            CONSENSUS_NAME
                        )));
                    }
                    if list[..i].iter().any(|(other, _)| other == name) {
                        return Err(EngineError::config(format!("Duplicate learner name {}", name)));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_fold_training_sets(&self, partition: &Partition, folds: &[usize]) -> Result<()> {
        for &fold in folds {
            let train_idx = partition.assignment.train_indices(fold);
            check_train_data(&partition.data.select_rows(&train_idx))?;
        }
        Ok(())
    }

    fn run_learner(
        &self,
        name: &str,
        learner: &dyn Learner,
        partition: &Partition,
        folds: &[usize],
        tracker: &Progress<'_>,
        fold_model: Option<FoldModelCallback<'_>>,
    ) -> std::result::Result<LearnerRun, Halt> {
        let param_names = self.param_names(learner);
        let ctx = FoldContext {
            data: &partition.data,
            assignment: &partition.assignment,
            inner_folds: self.config.inner_folds,
            param_names: &param_names,
            fixed_params: &self.config.fixed_params,
            backend: self.config.backend,
            sampler: self.sampler.as_ref(),
            optimizer: self.optimizer.as_ref(),
        };
        let run_fold = |fold: usize| -> std::result::Result<FoldOutcome, Halt> {
            let outcome = train_fold(learner, fold, &ctx)?;
            if let Some(callback) = fold_model {
                callback(name, fold, outcome.model.as_ref());
            }
            tracker.step()?;
            Ok(outcome)
        };

        let outcomes: Vec<FoldOutcome> = if self.config.parallel_folds {
            folds
                .par_iter()
                .map(|&fold| run_fold(fold))
                .collect::<std::result::Result<Vec<_>, Halt>>()?
        } else {
            folds
                .iter()
                .map(|&fold| run_fold(fold))
                .collect::<std::result::Result<Vec<_>, Halt>>()?
        };

        let mut builder = LearnerRunBuilder::new(&partition.data);
        for outcome in outcomes {
            builder.push(outcome);
        }
        Ok(builder.finish(folds.len(), &self.config.stability))
    }

    fn run_consensus(
        &self,
        pool: &[String],
        runs: &BTreeMap<String, LearnerRun>,
        results: &BTreeMap<String, StatReport>,
        partition: &Partition,
        folds: &[usize],
    ) -> Result<StatReport> {
        let data = &partition.data;
        let rule = VotingRule::for_response(
            data.response_type(),
            data.class_labels().map_or(0, |l| l.len()),
        );
        let mut builder = LearnerRunBuilder::new(data);
        for &fold in folds {
            let mut weights = BTreeMap::new();
            let mut models: BTreeMap<String, Arc<dyn Model>> = BTreeMap::new();
            for name in pool {
                let run = runs
                    .get(name)
                    .ok_or_else(|| EngineError::evaluation(format!("No results of {}", name)))?;
                let weight = run.weights.get(&fold).copied().ok_or_else(|| {
                    EngineError::evaluation(format!("No weight of {} for fold {}", name, fold))
                })?;
                if let Some(model) = run.models.get(&fold) {
                    models.insert(name.clone(), model.clone());
                }
                weights.insert(name.clone(), weight);
            }

            let (train, test) = partition.assignment.split(data, fold);
            let test = test.view(FeatureView::Descriptors);
            let spec = ConsensusSpec { fold, weights, rule };
            let model = spec.into_model(&models, train.len())?;
            let evaluation = evaluate_model(&model, &test)?;
            builder.push(FoldOutcome {
                fold,
                model: Arc::new(model),
                weight: None,
                alert: None,
                n_train: train.len(),
                n_test: test.len(),
                evaluation,
            });
        }

        let mut report = builder.finish(folds.len(), &self.config.stability).report;
        report.individual_statistics = Some(
            pool.iter()
                .filter_map(|name| results.get(name).map(|r| (name.clone(), r.clone())))
                .collect(),
        );
        Ok(report)
    }

    fn checkpoint(&self, results: &BTreeMap<String, StatReport>) {
        let started = Instant::now();
        match self.persister.save(results) {
            Ok(()) => log::trace!("Checkpoint written in {:?}", started.elapsed()),
            Err(e) => log::error!("Could not save intermediate results: {}", e),
        }
    }
}

fn summary(report: &StatReport) -> String {
    if report.is_placeholder() {
        return "no statistics".to_string();
    }
    let fmt = |v: Option<f64>| v.map_or("NA".to_string(), |v| format!("{:.4}", v));
    match (report.ca, report.q2) {
        (Some(_), _) => format!(
            "CA {} MCC {} stability {} stable {}",
            fmt(report.ca),
            fmt(report.mcc),
            fmt(report.stability_value),
            report.stable
        ),
        _ => format!(
            "Q2 {} RMSE {} stability {} stable {}",
            fmt(report.q2),
            fmt(report.rmse),
            fmt(report.stability_value),
            report.stable
        ),
    }
}
