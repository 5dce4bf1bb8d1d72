//! Minimum-size rules for training partitions.
use crate::data_handling::Dataset;
use crate::error::{EngineError, Result};

/// Smallest training partition a model is built from.
pub const MIN_TRAIN_EXAMPLES: usize = 20;
/// Smallest number of examples per class in a classification partition.
pub const MIN_CLASS_EXAMPLES: usize = 10;

/// Hard check: fails with `DataSufficiency` when `train` is too small.
pub fn check_train_data(train: &Dataset) -> Result<()> {
    match insufficiency(train) {
        Some(reason) => {
            log::warn!("Too few compounds to build a QSAR model: {}", reason);
            Err(EngineError::DataSufficiency { reason })
        }
        None => Ok(()),
    }
}

/// Soft check used to decide whether inner optimisation is possible.
pub fn is_trainable(train: &Dataset) -> bool {
    insufficiency(train).is_none()
}

fn insufficiency(train: &Dataset) -> Option<String> {
    if train.len() < MIN_TRAIN_EXAMPLES {
        return Some(format!(
            "{} examples, need at least {}",
            train.len(),
            MIN_TRAIN_EXAMPLES
        ));
    }
    let (Some(labels), Some(counts)) = (train.class_labels(), train.class_counts()) else {
        return None;
    };
    let short: Vec<String> = labels
        .iter()
        .zip(counts)
        .filter(|(_, count)| *count < MIN_CLASS_EXAMPLES)
        .map(|(label, count)| format!("{} ({} examples)", label, count))
        .collect();
    if short.is_empty() {
        None
    } else {
        Some(format!(
            "need at least {} examples per class: {}",
            MIN_CLASS_EXAMPLES,
            short.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::Response;
    use ndarray::Array2;

    fn classes(n0: usize, n1: usize) -> Dataset {
        let values: Vec<usize> = std::iter::repeat(0).take(n0).chain(std::iter::repeat(1).take(n1)).collect();
        let n = values.len();
        Dataset::new(
            Array2::zeros((n, 1)),
            vec!["f".into()],
            Response::Classes {
                labels: vec!["inactive".into(), "active".into()],
                values,
            },
        )
        .unwrap()
    }

    fn continuous(n: usize) -> Dataset {
        Dataset::new(
            Array2::zeros((n, 1)),
            vec!["f".into()],
            Response::Continuous((0..n).map(|i| i as f64).collect()),
        )
        .unwrap()
    }

    #[test]
    fn regression_needs_twenty_examples() {
        assert!(check_train_data(&continuous(19)).is_err());
        assert!(check_train_data(&continuous(20)).is_ok());
    }

    #[test]
    fn classification_needs_ten_per_class() {
        assert!(is_trainable(&classes(10, 10)));
        assert!(!is_trainable(&classes(30, 9)));
        let err = check_train_data(&classes(30, 9)).unwrap_err();
        assert!(err.to_string().contains("active (9 examples)"));
    }

    #[test]
    fn missing_class_counts_as_short() {
        assert!(!is_trainable(&classes(25, 0)));
    }
}
