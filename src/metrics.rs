//! Per-fold evaluation metrics.
use statrs::statistics::Statistics;

/// Rows are observed classes, columns predicted classes.
pub type ConfusionMatrix = Vec<Vec<u64>>;

/// Fraction of correctly predicted classes.
pub fn classification_accuracy(observed: &[usize], predicted: &[usize]) -> f64 {
    assert_eq!(observed.len(), predicted.len(), "observed and predicted must have equal lengths");
    if observed.is_empty() {
        return 0.0;
    }
    let correct = observed.iter().zip(predicted).filter(|(o, p)| o == p).count();
    correct as f64 / observed.len() as f64
}

pub fn confusion_matrix(observed: &[usize], predicted: &[usize], n_classes: usize) -> ConfusionMatrix {
    assert_eq!(observed.len(), predicted.len(), "observed and predicted must have equal lengths");
    let mut cm = vec![vec![0u64; n_classes]; n_classes];
    for (&o, &p) in observed.iter().zip(predicted) {
        cm[o][p] += 1;
    }
    cm
}

/// Matthews correlation coefficient of a (possibly multi-class) confusion
/// matrix. `None` when a marginal is degenerate and the value is undefined.
pub fn mcc(cm: &ConfusionMatrix) -> Option<f64> {
    let k = cm.len();
    if k == 0 || cm.iter().any(|row| row.len() != k) {
        return None;
    }
    let total: f64 = cm.iter().flatten().map(|&v| v as f64).sum();
    let correct: f64 = (0..k).map(|i| cm[i][i] as f64).sum();
    let observed: Vec<f64> = cm.iter().map(|row| row.iter().map(|&v| v as f64).sum()).collect();
    let predicted: Vec<f64> = (0..k)
        .map(|j| cm.iter().map(|row| row[j] as f64).sum())
        .collect();

    let cross: f64 = observed.iter().zip(&predicted).map(|(t, p)| t * p).sum();
    let sq_obs: f64 = observed.iter().map(|t| t * t).sum();
    let sq_pred: f64 = predicted.iter().map(|p| p * p).sum();

    let denom = ((total * total - sq_pred) * (total * total - sq_obs)).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    Some((correct * total - cross) / denom)
}

/// Root mean squared error over (observed, predicted) pairs.
pub fn rmse(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let mse = pairs.iter().map(|(o, p)| (o - p).powi(2)).mean();
    Some(mse.sqrt())
}

/// Coefficient of determination (Q² when the pairs are out-of-sample).
/// `None` when the observed values have no variance.
pub fn r_squared(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let mean = pairs.iter().map(|(o, _)| *o).mean();
    let ss_tot: f64 = pairs.iter().map(|(o, _)| (o - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return None;
    }
    let ss_res: f64 = pairs.iter().map(|(o, p)| (o - p).powi(2)).sum();
    Some(1.0 - ss_res / ss_tot)
}
