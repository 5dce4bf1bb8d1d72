//! Consensus of the stable, non-specialized learners.
//!
//! Per outer fold the members' fold models are combined with their
//! optimization weights of that fold: a weighted vote for classification, a
//! weighted average for regression.
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data_handling::{Dataset, ResponseType};
use crate::error::{EngineError, Result};
use crate::models::learner_trait::{Model, Predictions};

/// Reserved result key of the consensus report.
pub const CONSENSUS_NAME: &str = "Consensus";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingRule {
    WeightedVote { n_classes: usize },
    WeightedAverage,
}

impl VotingRule {
    pub fn for_response(response_type: ResponseType, n_classes: usize) -> Self {
        match response_type {
            ResponseType::Classification => VotingRule::WeightedVote { n_classes },
            ResponseType::Regression => VotingRule::WeightedAverage,
        }
    }
}

/// A learner as seen by pool selection.
#[derive(Debug, Clone, Copy)]
pub struct PoolCandidate<'a> {
    pub name: &'a str,
    pub stable: bool,
    pub specialized: bool,
}

/// Members eligible for the consensus, in candidate order.
///
/// Stable learners form the pool; with fewer than two of them every learner
/// does. Specialized learners are then removed. The caller skips the
/// consensus when fewer than two names remain.
pub fn select_pool(candidates: &[PoolCandidate<'_>]) -> Vec<String> {
    let stable: Vec<&PoolCandidate<'_>> = candidates.iter().filter(|c| c.stable).collect();
    let pool: Vec<&PoolCandidate<'_>> = if stable.len() < 2 {
        candidates.iter().collect()
    } else {
        stable
    };
    pool.into_iter()
        .filter(|c| !c.specialized)
        .map(|c| c.name.to_string())
        .collect()
}

/// Weighted vote over class indices.
///
/// The score of a class is the summed weight of the members predicting it
/// divided by their count (at least one). The highest score wins; on a tie
/// the later class in label order wins.
pub fn weighted_vote(votes: &[(usize, f64)], n_classes: usize) -> usize {
    let mut sums = vec![0.0f64; n_classes];
    let mut counts = vec![0usize; n_classes];
    for &(class, weight) in votes {
        if class < n_classes {
            sums[class] += weight;
            counts[class] += 1;
        }
    }
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for class in 0..n_classes {
        let score = sums[class] / counts[class].max(1) as f64;
        if score >= best_score {
            best = class;
            best_score = score;
        }
    }
    best
}

/// Average of `(value, weight)` pairs normalized by the weight sum; the plain
/// mean when the weights sum to zero.
pub fn weighted_average(values: &[(f64, f64)]) -> f64 {
    let weight_sum: f64 = values.iter().map(|(_, w)| w).sum();
    if weight_sum == 0.0 {
        return values.iter().map(|(v, _)| v).sum::<f64>() / values.len().max(1) as f64;
    }
    values.iter().map(|(v, w)| v * w).sum::<f64>() / weight_sum
}

/// Member weights of one outer fold and the rule combining them.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusSpec {
    pub fold: usize,
    pub weights: BTreeMap<String, f64>,
    pub rule: VotingRule,
}

impl ConsensusSpec {
    /// Bind the weights to the members' fold models.
    pub fn into_model(
        self,
        models: &BTreeMap<String, Arc<dyn Model>>,
        n_train: usize,
    ) -> Result<ConsensusModel> {
        let members = self
            .weights
            .into_iter()
            .map(|(name, weight)| {
                let model = models.get(&name).cloned().ok_or_else(|| {
                    EngineError::evaluation(format!(
                        "No model of {} for fold {}",
                        name, self.fold
                    ))
                })?;
                Ok((name, model, weight))
            })
            .collect::<Result<Vec<_>>>()?;
        if members.len() < 2 {
            return Err(EngineError::evaluation(format!(
                "A consensus needs at least two members, got {}",
                members.len()
            )));
        }
        Ok(ConsensusModel {
            members,
            rule: self.rule,
            n_train,
        })
    }
}

pub struct ConsensusModel {
    members: Vec<(String, Arc<dyn Model>, f64)>,
    rule: VotingRule,
    n_train: usize,
}

impl Model for ConsensusModel {
    fn predict(&self, data: &Dataset) -> Result<Predictions> {
        let predictions = self
            .members
            .iter()
            .map(|(name, model, weight)| {
                let p = model.predict(data)?;
                if p.len() != data.len() {
                    return Err(EngineError::evaluation(format!(
                        "Member {} returned {} predictions for {} examples",
                        name,
                        p.len(),
                        data.len()
                    )));
                }
                Ok((p, *weight))
            })
            .collect::<Result<Vec<_>>>()?;

        match self.rule {
            VotingRule::WeightedVote { n_classes } => {
                let mut out = Vec::with_capacity(data.len());
                for row in 0..data.len() {
                    let votes = predictions
                        .iter()
                        .map(|(p, w)| match p {
                            Predictions::Classes(c) => Ok((c[row], *w)),
                            Predictions::Values(_) => {
                                Err(EngineError::evaluation("Member returned values in a class vote"))
                            }
                        })
                        .collect::<Result<Vec<_>>>()?;
                    out.push(weighted_vote(&votes, n_classes));
                }
                Ok(Predictions::Classes(out))
            }
            VotingRule::WeightedAverage => {
                let mut out = Vec::with_capacity(data.len());
                for row in 0..data.len() {
                    let values = predictions
                        .iter()
                        .map(|(p, w)| match p {
                            Predictions::Values(v) => Ok((v[row], *w)),
                            Predictions::Classes(_) => {
                                Err(EngineError::evaluation("Member returned classes in an average"))
                            }
                        })
                        .collect::<Result<Vec<_>>>()?;
                    out.push(weighted_average(&values));
                }
                Ok(Predictions::Values(out))
            }
        }
    }

    fn n_train(&self) -> usize {
        self.n_train
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::Response;
    use ndarray::Array2;

    struct Fixed(Predictions);

    impl Model for Fixed {
        fn predict(&self, _data: &Dataset) -> Result<Predictions> {
            Ok(self.0.clone())
        }

        fn n_train(&self) -> usize {
            10
        }
    }

    fn candidate(name: &str, stable: bool, specialized: bool) -> PoolCandidate<'_> {
        PoolCandidate {
            name,
            stable,
            specialized,
        }
    }

    #[test]
    fn pool_keeps_stable_learners() {
        let pool = select_pool(&[
            candidate("A", true, false),
            candidate("B", false, false),
            candidate("C", true, false),
        ]);
        assert_eq!(pool, vec!["A", "C"]);
    }

    #[test]
    fn pool_falls_back_to_all_learners() {
        let one = select_pool(&[
            candidate("A", true, false),
            candidate("B", false, false),
            candidate("C", false, false),
        ]);
        assert_eq!(one, vec!["A", "B", "C"]);
        let none = select_pool(&[
            candidate("A", false, false),
            candidate("B", false, false),
            candidate("C", false, false),
        ]);
        assert_eq!(none, vec!["A", "B", "C"]);
    }

    #[test]
    fn pool_drops_specialized_learners() {
        let pool = select_pool(&[
            candidate("A", true, false),
            candidate("kNN", true, true),
            candidate("C", false, false),
        ]);
        assert_eq!(pool, vec!["A"]);
    }

    #[test]
    fn vote_tie_goes_to_second_label() {
        assert_eq!(weighted_vote(&[(0, 0.8), (1, 0.8)], 2), 1);
        assert_eq!(weighted_vote(&[(0, 0.9), (1, 0.8)], 2), 0);
        // normalized by member count: mean weight 0.5 vs 0.7
        assert_eq!(weighted_vote(&[(0, 0.5), (0, 0.5), (1, 0.7)], 2), 1);
    }

    #[test]
    fn average_is_weight_normalized() {
        assert!((weighted_average(&[(1.0, 1.0), (3.0, 3.0)]) - 2.5).abs() < 1e-12);
        assert!((weighted_average(&[(1.0, 0.0), (3.0, 0.0)]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn consensus_model_combines_members() {
        let data = Dataset::new(
            Array2::zeros((2, 1)),
            vec!["f".into()],
            Response::Continuous(vec![0.0, 0.0]),
        )
        .unwrap();
        let models: BTreeMap<String, Arc<dyn Model>> = BTreeMap::from([
            ("A".to_string(), Arc::new(Fixed(Predictions::Values(vec![1.0, 2.0]))) as Arc<dyn Model>),
            ("B".to_string(), Arc::new(Fixed(Predictions::Values(vec![3.0, 4.0]))) as Arc<dyn Model>),
        ]);
        let spec = ConsensusSpec {
            fold: 1,
            weights: BTreeMap::from([("A".to_string(), 1.0), ("B".to_string(), 1.0)]),
            rule: VotingRule::WeightedAverage,
        };
        let model = spec.into_model(&models, 40).unwrap();
        assert_eq!(model.predict(&data).unwrap(), Predictions::Values(vec![2.0, 3.0]));
        assert_eq!(model.n_train(), 40);
    }

    #[test]
    fn missing_member_model_errors() {
        let spec = ConsensusSpec {
            fold: 2,
            weights: BTreeMap::from([("A".to_string(), 1.0), ("B".to_string(), 1.0)]),
            rule: VotingRule::WeightedAverage,
        };
        assert!(spec.into_model(&BTreeMap::new(), 10).is_err());
    }
}
