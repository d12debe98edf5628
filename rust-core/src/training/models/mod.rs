//! Fitted classifiers behind the closed [`ModelFamily`](super::domain::ModelFamily) set.
//!
//! Learning is delegated to the linfa crates and to xgboost; the wrappers
//! here own the binary label layout and keep every model serialisable.

pub mod adaboost;
pub mod boosting;
pub mod forest;
pub mod knn;
pub mod linear;
pub mod prior;
pub mod tree;

use linfa::Dataset;
use ndarray::{Array1, Array2, Ix1};

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Labelled linfa dataset; `weights` become per-sample weights when given.
pub(crate) fn dataset(x: &Array2<f64>, y: &[usize], weights: Option<&[f64]>) -> Dataset<f64, usize, Ix1> {
    let base = Dataset::new(x.clone(), Array1::from(y.to_vec()));
    match weights {
        Some(w) => base.with_weights(w.iter().map(|&v| v as f32).collect()),
        None => base,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use ndarray::Array2;

    /// Two noisy, linearly separable blobs; label 1 when `x0 + x1 > 0`.
    pub(crate) fn blobs(n: usize) -> (Array2<f64>, Vec<usize>) {
        let x = Array2::from_shape_fn((n, 2), |(row, col)| {
            let t = row as f64 / n as f64;
            let sign = if row % 2 == 0 { 1.0 } else { -1.0 };
            let jitter = ((row * 7 + col * 13) % 11) as f64 / 22.0;
            sign * (1.0 + t) + jitter - 0.25
        });
        let y = x
            .rows()
            .into_iter()
            .map(|r| usize::from(r[0] + r[1] > 0.0))
            .collect();
        (x, y)
    }

    pub(crate) fn accuracy(predicted: &[usize], y: &[usize]) -> f64 {
        let hits = predicted.iter().zip(y).filter(|(p, t)| p == t).count();
        hits as f64 / y.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0 && sigmoid(800.0) > 0.999);
        assert!(sigmoid(-800.0) >= 0.0 && sigmoid(-800.0) < 1e-300);
    }

    #[test]
    fn dataset_carries_weights() {
        let x = Array2::<f64>::zeros((3, 1));
        let ds = dataset(&x, &[0, 1, 1], Some(&[2.0, 0.5, 0.5]));
        assert_eq!(ds.weight_for(0), 2.0);
        assert_eq!(ds.weight_for(2), 0.5);
        assert_eq!(dataset(&x, &[0, 1, 1], None).weight_for(1), 1.0);
    }
}
