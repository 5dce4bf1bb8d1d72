//! Outer-fold assignment.
//!
//! Every example gets one integer label: 0 keeps it in training for every
//! fold (the bias set), `k >= 1` holds it out as a test example of fold `k`.
//! Assignments come from a pluggable [`Sampler`], from a column of
//! predefined labels, or from a sampler refined by a group filter that keeps
//! non-selected examples out of every test fold.
use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::{FoldControl, SamplerStrategy};
use crate::data_handling::{Dataset, Response};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldAssignment {
    labels: Vec<usize>,
}

impl FoldAssignment {
    pub fn new(labels: Vec<usize>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Distinct positive labels, ascending.
    pub fn folds(&self) -> Vec<usize> {
        self.labels
            .iter()
            .copied()
            .filter(|&l| l != 0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn n_folds(&self) -> usize {
        self.folds().len()
    }

    pub fn test_indices(&self, fold: usize) -> Vec<usize> {
        self.indices_where(|l| l == fold)
    }

    pub fn train_indices(&self, fold: usize) -> Vec<usize> {
        self.indices_where(|l| l != fold)
    }

    /// (train, test) partitions for one outer fold.
    pub fn split(&self, data: &Dataset, fold: usize) -> (Dataset, Dataset) {
        (
            data.select_rows(&self.train_indices(fold)),
            data.select_rows(&self.test_indices(fold)),
        )
    }

    /// Number of examples per label, including the bias set.
    pub fn counts(&self) -> BTreeMap<usize, usize> {
        let mut counts = BTreeMap::new();
        for &l in &self.labels {
            *counts.entry(l).or_insert(0) += 1;
        }
        counts
    }

    fn indices_where(&self, keep: impl Fn(usize) -> bool) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(i, &l)| if keep(l) { Some(i) } else { None })
            .collect()
    }
}

/// Assigns examples to folds `1..=n_folds`.
///
/// `stream` selects an independent random stream so repeated calls (outer
/// split, inner splits of each fold) never share generator state.
pub trait Sampler: Send + Sync {
    fn sample(&self, data: &Dataset, n_folds: usize, stream: u64) -> Result<FoldAssignment>;
}

/// Seeded sampler, stratified by class when the response is categorical.
#[derive(Debug, Clone)]
pub struct StratifiedSampler {
    seed: u64,
}

impl StratifiedSampler {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn rng(&self, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
    }
}

impl Sampler for StratifiedSampler {
    fn sample(&self, data: &Dataset, n_folds: usize, stream: u64) -> Result<FoldAssignment> {
        let n = data.len();
        if n_folds == 0 {
            return Err(EngineError::config("Number of folds must be at least 1"));
        }
        if n < n_folds {
            return Err(EngineError::config(format!(
                "Too few examples ({}) for {} folds",
                n, n_folds
            )));
        }

        let mut rng = self.rng(stream);
        // Examples are dealt round-robin, class after class, so each fold
        // gets the same class proportions up to one example.
        let mut order: Vec<usize> = Vec::with_capacity(n);
        match &data.response {
            Response::Classes { labels, values } => {
                for class in 0..labels.len() {
                    let mut members: Vec<usize> =
                        (0..n).filter(|&i| values[i] == class).collect();
                    members.shuffle(&mut rng);
                    order.extend(members);
                }
            }
            Response::Continuous(_) => {
                order.extend(0..n);
                order.shuffle(&mut rng);
            }
        }

        let mut labels = vec![0usize; n];
        for (pos, &idx) in order.iter().enumerate() {
            labels[idx] = pos % n_folds + 1;
        }
        Ok(FoldAssignment::new(labels))
    }
}

pub fn build_sampler(strategy: &SamplerStrategy) -> Box<dyn Sampler> {
    match strategy {
        SamplerStrategy::Stratified { seed } => Box::new(StratifiedSampler::new(*seed)),
    }
}

/// Result of partitioning a dataset into outer folds.
#[derive(Debug, Clone)]
pub struct Partition {
    /// The dataset with any control attribute removed.
    pub data: Dataset,
    pub assignment: FoldAssignment,
    /// Examples moved to the bias set per fold (group mode only), indexed by
    /// fold label - 1.
    pub shifted: Vec<usize>,
}

/// Assign every example of `data` to an outer fold.
pub fn partition(
    data: &Dataset,
    n_folds: usize,
    control: Option<&FoldControl>,
    sampler: &dyn Sampler,
) -> Result<Partition> {
    let Some(control) = control else {
        let assignment = sampler.sample(data, n_folds, 0)?;
        return Ok(Partition {
            data: data.clone(),
            assignment,
            shifted: vec![0; n_folds],
        });
    };

    let attribute = control.attribute();
    let values = data.meta_values(attribute).ok_or_else(|| {
        EngineError::config(format!(
            "Attribute Filter Ctrl was selected, but attribute {} is not in the data",
            attribute
        ))
    })?;

    let mut stripped = data.clone();
    match control {
        FoldControl::Group {
            values: permitted, ..
        } => {
            let eligible: Vec<bool> = values.iter().map(|v| permitted.contains(v)).collect();
            stripped.remove_meta(attribute);

            let sampled = sampler.sample(&stripped, n_folds, 0)?;
            let (assignment, shifted) = shift_ineligible(&sampled, &eligible, n_folds);
            for (fold, n) in shifted.iter().enumerate() {
                log::info!(
                    "In fold {}, {} examples were shifted to the train set.",
                    fold + 1,
                    n
                );
            }
            let present = assignment.n_folds();
            if present != n_folds {
                return Err(EngineError::config(format!(
                    "Only {} of {} folds kept test examples after applying the filter on {}",
                    present, n_folds, attribute
                )));
            }
            Ok(Partition {
                data: stripped,
                assignment,
                shifted,
            })
        }
        FoldControl::Predefined { .. } => {
            let labels = values
                .iter()
                .map(|v| parse_fold_label(v))
                .collect::<Result<Vec<_>>>()?;
            stripped.remove_meta(attribute);
            let assignment = FoldAssignment::new(labels);
            log_predefined_summary(&assignment);
            if assignment.n_folds() == 0 {
                return Err(EngineError::config(format!(
                    "Attribute {} does not define any test fold",
                    attribute
                )));
            }
            let n = assignment.n_folds();
            Ok(Partition {
                data: stripped,
                assignment,
                shifted: vec![0; n],
            })
        }
    }
}

/// Move every example that is not eligible for testing into the bias set.
pub fn shift_ineligible(
    sampled: &FoldAssignment,
    eligible: &[bool],
    n_folds: usize,
) -> (FoldAssignment, Vec<usize>) {
    let mut shifted = vec![0usize; n_folds];
    let labels = sampled
        .labels()
        .iter()
        .zip(eligible)
        .map(|(&label, &ok)| {
            if !ok && label != 0 {
                if let Some(n) = shifted.get_mut(label - 1) {
                    *n += 1;
                }
                0
            } else {
                label
            }
        })
        .collect();
    (FoldAssignment::new(labels), shifted)
}

fn parse_fold_label(value: &str) -> Result<usize> {
    let invalid = || {
        EngineError::config(format!(
            "Invalid fold value: {}. It must be str convertable to an int.",
            value
        ))
    };
    let parsed: f64 = value.trim().parse().map_err(|_| invalid())?;
    if !parsed.is_finite() || parsed < 0.0 || parsed.fract() != 0.0 {
        return Err(invalid());
    }
    Ok(parsed as usize)
}

fn log_predefined_summary(assignment: &FoldAssignment) {
    let counts = assignment.counts();
    let total: usize = counts.values().sum();
    let in_bias = counts.get(&0).copied().unwrap_or(0);
    log::info!("Pre-selected {} folds for CV:", assignment.n_folds());
    log::info!("      Examples in data: {}", total);
    log::info!("      Examples selected for validation: {}", total - in_bias);
    log::info!("      Examples to be appended to the train set: {}", in_bias);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn classes(values: Vec<usize>) -> Dataset {
        let n = values.len();
        let response = Response::Classes {
            labels: vec!["a".into(), "b".into()],
            values,
        };
        Dataset::new(Array2::zeros((n, 1)), vec!["f".into()], response).unwrap()
    }

    #[test]
    fn stratified_labels_are_contiguous() {
        let data = classes((0..23).map(|i| (i % 3 == 0) as usize).collect());
        let assignment = StratifiedSampler::new(7).sample(&data, 5, 0).unwrap();
        assert_eq!(assignment.len(), 23);
        assert_eq!(assignment.folds(), vec![1, 2, 3, 4, 5]);
        assert!(assignment.labels().iter().all(|&l| (1..=5).contains(&l)));
    }

    #[test]
    fn stratification_balances_classes() {
        let data = classes((0..100).map(|i| (i < 40) as usize).collect());
        let assignment = StratifiedSampler::new(1).sample(&data, 5, 0).unwrap();
        for fold in assignment.folds() {
            let test = data.select_rows(&assignment.test_indices(fold));
            assert_eq!(test.class_counts().unwrap(), vec![12, 8]);
        }
    }

    #[test]
    fn same_seed_same_assignment() {
        let data = classes((0..50).map(|i| i % 2).collect());
        let a = StratifiedSampler::new(3).sample(&data, 5, 2).unwrap();
        let b = StratifiedSampler::new(3).sample(&data, 5, 2).unwrap();
        let c = StratifiedSampler::new(3).sample(&data, 5, 9).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn too_few_examples_for_folds() {
        let data = classes(vec![0, 1, 0]);
        assert!(StratifiedSampler::new(0).sample(&data, 5, 0).is_err());
    }

    #[test]
    fn shift_moves_ineligible_to_bias() {
        let sampled = FoldAssignment::new(vec![1, 2, 1, 2, 0]);
        let eligible = [true, false, false, true, false];
        let (assignment, shifted) = shift_ineligible(&sampled, &eligible, 2);
        assert_eq!(assignment.labels(), &[1, 0, 0, 2, 0]);
        assert_eq!(shifted, vec![1, 1]);
    }

    #[test]
    fn parse_fold_label_accepts_float_text() {
        assert_eq!(parse_fold_label("2").unwrap(), 2);
        assert_eq!(parse_fold_label("3.0").unwrap(), 3);
        assert!(parse_fold_label("A").is_err());
        assert!(parse_fold_label("-1").is_err());
    }

    #[test]
    fn parse_fold_label_rejects_fractions() {
        assert!(parse_fold_label("2.7").is_err());
        assert!(parse_fold_label("0.5").is_err());
    }
}
