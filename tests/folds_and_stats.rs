use std::collections::BTreeSet;

use ndarray::Array2;

use redeem_nestcv::config::{FoldControl, StabilityThresholds};
use redeem_nestcv::data_handling::{Dataset, Response, ResponseType};
use redeem_nestcv::error::EngineError;
use redeem_nestcv::evaluation::FoldMetric;
use redeem_nestcv::folds::{partition, Sampler, StratifiedSampler};
use redeem_nestcv::metrics::{r_squared, rmse};
use redeem_nestcv::stats::{create_stat_report, AggregateInput, FoldRecord};

fn classes(n: usize) -> Dataset {
    let values: Vec<usize> = (0..n).map(|i| (i % 10 >= 6) as usize).collect();
    Dataset::new(
        Array2::from_shape_vec((n, 1), (0..n).map(|i| i as f64).collect()).unwrap(),
        vec!["d".into()],
        Response::Classes {
            labels: vec!["a".into(), "b".into()],
            values,
        },
    )
    .unwrap()
}

// ----------------------------------------------------------------------------
// Partitioning
// ----------------------------------------------------------------------------

#[test]
fn default_partition_covers_every_fold() {
    let data = classes(103);
    let sampler = StratifiedSampler::new(7);
    let part = partition(&data, 5, None, &sampler).unwrap();
    let labels = part.assignment.labels();
    assert_eq!(labels.len(), 103);
    assert!(labels.iter().all(|&l| (1..=5).contains(&l)));
    assert_eq!(part.assignment.folds(), vec![1, 2, 3, 4, 5]);
    // every example is tested exactly once
    let tested: usize = (1..=5).map(|f| part.assignment.test_indices(f).len()).sum();
    assert_eq!(tested, 103);
}

#[test]
fn same_seed_same_partition() {
    let data = classes(100);
    let a = StratifiedSampler::new(3).sample(&data, 5, 0).unwrap();
    let b = StratifiedSampler::new(3).sample(&data, 5, 0).unwrap();
    assert_eq!(a, b);
}

#[test]
fn group_control_never_tests_other_groups() {
    let series: Vec<String> = (0..100)
        .map(|i| if i % 2 == 0 { "test" } else { "train" }.to_string())
        .collect();
    let data = classes(100).with_meta("Series", series.clone()).unwrap();
    let control = FoldControl::Group {
        attribute: "Series".to_string(),
        values: vec!["test".to_string()],
    };
    let part = partition(&data, 5, Some(&control), &StratifiedSampler::new(0)).unwrap();

    assert!(part.data.meta_values("Series").is_none());
    assert_eq!(part.assignment.n_folds(), 5);
    for (label, group) in part.assignment.labels().iter().zip(&series) {
        if group == "train" {
            assert_eq!(*label, 0);
        }
    }
    assert_eq!(part.shifted.iter().sum::<usize>(), 50);
    // shifted examples join the training side of every fold
    for fold in 1..=5 {
        let train: BTreeSet<usize> = part.assignment.train_indices(fold).into_iter().collect();
        assert!((0..100).filter(|i| i % 2 == 1).all(|i| train.contains(&i)));
    }
}

#[test]
fn predefined_control_uses_attribute_values() {
    let folds: Vec<String> = (0..50)
        .map(|i| match i % 3 {
            0 => "0".to_string(),
            1 => "1".to_string(),
            _ => "2.0".to_string(),
        })
        .collect();
    let data = classes(50).with_meta("Fold", folds).unwrap();
    let control = FoldControl::Predefined {
        attribute: "Fold".to_string(),
    };
    let part = partition(&data, 5, Some(&control), &StratifiedSampler::new(0)).unwrap();
    assert_eq!(part.assignment.folds(), vec![1, 2]);
    assert_eq!(part.assignment.labels()[0], 0);
    assert_eq!(part.assignment.labels()[2], 2);
}

#[test]
fn invalid_control_attribute_values() {
    let control = FoldControl::Predefined {
        attribute: "Fold".to_string(),
    };
    let missing = partition(&classes(20), 5, Some(&control), &StratifiedSampler::new(0));
    assert!(matches!(missing, Err(EngineError::Configuration(_))));

    let mut folds = vec!["1".to_string(); 20];
    folds[4] = "first".to_string();
    let data = classes(20).with_meta("Fold", folds).unwrap();
    let invalid = partition(&data, 5, Some(&control), &StratifiedSampler::new(0));
    assert!(matches!(invalid, Err(EngineError::Configuration(_))));

    let mut folds = vec!["1".to_string(); 20];
    folds[7] = "2.7".to_string();
    let data = classes(20).with_meta("Fold", folds).unwrap();
    let fractional = partition(&data, 5, Some(&control), &StratifiedSampler::new(0));
    assert!(matches!(fractional, Err(EngineError::Configuration(_))));
}

// ----------------------------------------------------------------------------
// Aggregation
// ----------------------------------------------------------------------------

#[test]
fn confusion_matrices_sum_to_tested_examples() {
    let folds: Vec<FoldRecord> = (1..=5)
        .map(|fold| FoldRecord {
            fold,
            n_train: 80,
            n_test: 20,
            metric: FoldMetric::Classification {
                ca: 0.7,
                cm: vec![vec![10, 2], vec![4, 4]],
            },
            weight: Some(0.7),
        })
        .collect();
    let labels = vec!["a".to_string(), "b".to_string()];
    let thresholds = StabilityThresholds::default();
    let report = create_stat_report(&AggregateInput {
        response_type: ResponseType::Classification,
        labels: Some(&labels),
        folds: &folds,
        exp_pred: &[],
        n_outer_folds: 5,
        thresholds: &thresholds,
    });
    let cm = report.cm.unwrap();
    assert_eq!(cm, vec![vec![50, 10], vec![20, 20]]);
    assert_eq!(cm.iter().flatten().sum::<u64>(), 100);
    assert!((report.ca.unwrap() - 0.7).abs() < 1e-12);
    assert!(report.stable);
    assert_eq!(report.mcc, redeem_nestcv::metrics::mcc(&cm));
}

#[test]
fn regression_metrics_are_pooled_not_averaged() {
    // fold 1 predicts perfectly, fold 2 is shifted by a constant
    let fold_one = [(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)];
    let fold_two = [(10.0, 11.0), (20.0, 21.0), (30.0, 31.0)];
    let pooled: Vec<(f64, f64)> = fold_one.iter().chain(&fold_two).copied().collect();
    let folds: Vec<FoldRecord> = [&fold_one[..], &fold_two[..]]
        .iter()
        .enumerate()
        .map(|(i, pairs)| FoldRecord {
            fold: i + 1,
            n_train: 20,
            n_test: 3,
            metric: FoldMetric::Regression {
                rmse: rmse(pairs),
                q2: r_squared(pairs),
            },
            weight: None,
        })
        .collect();
    let thresholds = StabilityThresholds::default();
    let report = create_stat_report(&AggregateInput {
        response_type: ResponseType::Regression,
        labels: None,
        folds: &folds,
        exp_pred: &pooled,
        n_outer_folds: 2,
        thresholds: &thresholds,
    });
    let mean_q2 = (r_squared(&fold_one).unwrap() + r_squared(&fold_two).unwrap()) / 2.0;
    assert_eq!(report.q2, r_squared(&pooled));
    assert!((report.q2.unwrap() - mean_q2).abs() > 1e-6);
    assert_eq!(report.rmse, rmse(&pooled));
    assert!(report.stability_value.is_some());
}

#[test]
fn incomplete_fold_results_give_placeholder() {
    let folds = vec![FoldRecord {
        fold: 1,
        n_train: 20,
        n_test: 5,
        metric: FoldMetric::Regression {
            rmse: Some(1.0),
            q2: Some(0.5),
        },
        weight: None,
    }];
    let thresholds = StabilityThresholds::default();
    let report = create_stat_report(&AggregateInput {
        response_type: ResponseType::Regression,
        labels: None,
        folds: &folds,
        exp_pred: &[(1.0, 1.0)],
        n_outer_folds: 5,
        thresholds: &thresholds,
    });
    assert!(report.is_placeholder());
    assert!(!report.stable);
}
