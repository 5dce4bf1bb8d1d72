//! k-nearest-neighbour learner that tunes `k` on its own.
//!
//! On descriptors the distance is Euclidean over standardized columns. The
//! structure-native variant compares structural identifiers by the Jaccard
//! distance of their character bigrams and ignores descriptors entirely.
use std::collections::BTreeSet;

use ndarray::Array2;

use crate::data_handling::{Dataset, Response};
use crate::error::{EngineError, Result};
use crate::evaluation::cross_validate;
use crate::folds::StratifiedSampler;
use crate::models::learner_trait::{
    Learner, LearnerKind, Model, ParamSet, ParamSpec, ParamValue, Predictions, SelfTuned,
};
use crate::preprocessing::{fit_scaler, Scaler};

const K_CANDIDATES: [usize; 5] = [1, 3, 5, 7, 9];

#[derive(Debug, Clone)]
pub struct KnnLearner {
    name: String,
    k: usize,
    structure_native: bool,
    seed: u64,
}

impl KnnLearner {
    pub fn new(name: &str, k: usize, structure_native: bool) -> Self {
        Self {
            name: name.to_string(),
            k: k.max(1),
            structure_native,
            seed: 0,
        }
    }

    /// Seed of the inner splits used by `optimize`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

enum Points {
    Descriptors { scaler: Scaler, x: Array2<f64> },
    Structures(Vec<BTreeSet<(char, char)>>),
}

pub struct KnnModel {
    k: usize,
    points: Points,
    response: Response,
}

fn bigrams(s: &str) -> BTreeSet<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

fn jaccard_distance(a: &BTreeSet<(char, char)>, b: &BTreeSet<(char, char)>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    1.0 - a.intersection(b).count() as f64 / union as f64
}

fn structures(data: &Dataset) -> Result<Vec<BTreeSet<(char, char)>>> {
    let values = data.structure_values().ok_or_else(|| {
        EngineError::config("Structure-native learner requires a structure attribute")
    })?;
    Ok(values.iter().map(|s| bigrams(s)).collect())
}

impl Learner for KnnLearner {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> LearnerKind {
        LearnerKind::Specialized {
            structure_native: self.structure_native,
        }
    }

    fn fit(&self, train: &Dataset) -> Result<Box<dyn Model>> {
        if train.is_empty() {
            return Err(EngineError::evaluation("Cannot fit on an empty training set"));
        }
        let points = if self.structure_native {
            Points::Structures(structures(train)?)
        } else {
            let scaler = fit_scaler(&train.x);
            let x = scaler.transform(&train.x);
            Points::Descriptors { scaler, x }
        };
        Ok(Box::new(KnnModel {
            k: self.k.min(train.len()),
            points,
            response: train.response.clone(),
        }))
    }

    fn params(&self) -> ParamSet {
        ParamSet::from([("k".to_string(), ParamValue::Int(self.k as i64))])
    }

    fn param_grid(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::new(
            "k",
            K_CANDIDATES.iter().map(|&k| ParamValue::Int(k as i64)).collect(),
        )]
    }

    fn with_params(&self, params: &ParamSet) -> Result<Box<dyn Learner>> {
        let mut learner = self.clone();
        if let Some(value) = params.get("k") {
            learner.k = value
                .as_usize()
                .filter(|k| *k > 0)
                .ok_or_else(|| EngineError::config(format!("Invalid k: {}", value)))?;
        }
        Ok(Box::new(learner))
    }

    fn optimize(&self, train: &Dataset, inner_folds: usize) -> Result<SelfTuned> {
        let sampler = StratifiedSampler::new(self.seed);
        let inner_train = train.len() - train.len() / inner_folds.max(1);
        let mut best: Option<(usize, f64)> = None;
        for &k in K_CANDIDATES.iter().filter(|&&k| k <= inner_train.max(1)) {
            let candidate = KnnLearner { k, ..self.clone() };
            match cross_validate(&candidate, train, inner_folds, &sampler, 1) {
                Ok(score) => {
                    log::debug!("{}: k = {} scored {:.4}", self.name, k, score);
                    if best.map_or(true, |(_, s)| score > s) {
                        best = Some((k, score));
                    }
                }
                Err(e) => log::debug!("{}: k = {} failed: {}", self.name, k, e),
            }
        }
        let (k, score) = best.ok_or_else(|| EngineError::TuningFailure {
            learner: self.name.clone(),
            reason: "no value of k could be evaluated".to_string(),
        })?;
        let model = KnnLearner { k, ..self.clone() }.fit(train)?;
        Ok(SelfTuned {
            score,
            model: Some(model),
        })
    }
}

impl KnnModel {
    fn distances(&self, data: &Dataset) -> Result<Vec<Vec<f64>>> {
        match &self.points {
            Points::Descriptors { scaler, x } => {
                if data.n_features() != x.ncols() {
                    return Err(EngineError::evaluation(format!(
                        "Model expects {} features, got {}",
                        x.ncols(),
                        data.n_features()
                    )));
                }
                let query = scaler.transform(&data.x);
                Ok(query
                    .rows()
                    .into_iter()
                    .map(|q| {
                        x.rows()
                            .into_iter()
                            .map(|p| {
                                p.iter()
                                    .zip(q.iter())
                                    .map(|(a, b)| (a - b).powi(2))
                                    .sum::<f64>()
                                    .sqrt()
                            })
                            .collect()
                    })
                    .collect())
            }
            Points::Structures(train) => {
                let query = structures(data)?;
                Ok(query
                    .iter()
                    .map(|q| train.iter().map(|p| jaccard_distance(p, q)).collect())
                    .collect())
            }
        }
    }

    fn neighbours(&self, distances: &[f64]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..distances.len()).collect();
        order.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]).then(a.cmp(&b)));
        order.truncate(self.k);
        order
    }
}

impl Model for KnnModel {
    fn predict(&self, data: &Dataset) -> Result<Predictions> {
        let distances = self.distances(data)?;
        match &self.response {
            Response::Classes { labels, values } => {
                let predicted = distances
                    .iter()
                    .map(|row| {
                        let mut votes = vec![0usize; labels.len()];
                        for i in self.neighbours(row) {
                            votes[values[i]] += 1;
                        }
                        // lowest class index wins ties
                        votes
                            .iter()
                            .enumerate()
                            .fold((0usize, 0usize), |best, (c, &v)| if v > best.1 { (c, v) } else { best })
                            .0
                    })
                    .collect();
                Ok(Predictions::Classes(predicted))
            }
            Response::Continuous(values) => {
                let predicted = distances
                    .iter()
                    .map(|row| {
                        let nn = self.neighbours(row);
                        nn.iter().map(|&i| values[i]).sum::<f64>() / nn.len() as f64
                    })
                    .collect();
                Ok(Predictions::Values(predicted))
            }
        }
    }

    fn n_train(&self) -> usize {
        self.response.len()
    }
}
