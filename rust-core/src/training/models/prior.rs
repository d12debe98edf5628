//! Class-prior baseline.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::common::error::CsatResult;
use crate::training::domain::{check_width, proba_from_satisfied, Classifier, SATISFIED};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriorModel {
    pub n_features: usize,
    pub p_satisfied: f64,
}

impl PriorModel {
    pub fn fit(x: &Array2<f64>, y: &[usize]) -> Self {
        let positives = y.iter().filter(|&&label| label == SATISFIED).count();
        Self {
            n_features: x.ncols(),
            p_satisfied: positives as f64 / y.len().max(1) as f64,
        }
    }
}

impl Classifier for PriorModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &Array2<f64>) -> CsatResult<Array2<f64>> {
        check_width(self.n_features, x)?;
        Ok(proba_from_satisfied(std::iter::repeat(self.p_satisfied).take(x.nrows())))
    }
}
