//! Small preprocessing utilities shared by the built-in learners.
//!
//! Provides a per-column standard scaler fitted on a training partition and
//! applied unchanged to the matching test partition.

use ndarray::{Array1, Array2, Axis};

/// Simple standard scaler (per-column mean/std).
#[derive(Clone, Debug)]
pub struct Scaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl Scaler {
    /// Minimum stddev to avoid division by zero when transforming.
    const MIN_STD: f64 = 1e-6;

    /// Transform all rows and return a new matrix.
    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.std
    }
}

/// Fit a `Scaler` where rows are samples and columns are features.
/// An empty matrix yields an identity scaler over its columns.
pub fn fit_scaler(x: &Array2<f64>) -> Scaler {
    let ncols = x.ncols();
    if x.nrows() == 0 {
        return Scaler {
            mean: Array1::zeros(ncols),
            std: Array1::ones(ncols),
        };
    }
    let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(ncols));
    let std = x.std_axis(Axis(0), 0.0).mapv(|s| s.max(Scaler::MIN_STD));
    Scaler { mean, std }
}
