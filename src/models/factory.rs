use std::sync::Arc;

use crate::config::{LearnerConfig, LearnerEntry};
use crate::models::gbdt::GbdtLearner;
use crate::models::knn::KnnLearner;
use crate::models::learner_trait::Learner;
use crate::models::majority::MajorityLearner;
use crate::models::ridge::RidgeLearner;

/// Build a shared learner from a configured entry.
pub fn build_learner(entry: &LearnerEntry) -> Arc<dyn Learner> {
    let name = entry.name.as_str();
    match &entry.learner {
        LearnerConfig::Majority => Arc::new(MajorityLearner::new(name)),
        LearnerConfig::Ridge { alpha } => Arc::new(RidgeLearner::new(name, *alpha)),
        LearnerConfig::Knn {
            k,
            structure_native,
        } => Arc::new(KnnLearner::new(name, *k, *structure_native)),
        LearnerConfig::GBDT {
            learning_rate,
            max_depth,
            num_boost_round,
            training_optimization_level,
        } => Arc::new(GbdtLearner::new(
            name,
            *learning_rate,
            *max_depth,
            *num_boost_round,
            *training_optimization_level,
        )),
    }
}
