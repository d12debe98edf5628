//! L2-regularised logistic regression, fitted by `linfa-logistic`.

use linfa::traits::Fit;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::common::error::{CsatError, CsatResult};
use crate::training::domain::{check_width, proba_from_satisfied, ClassWeight, Classifier};

use super::dataset;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    pub max_iterations: u64,
    pub gradient_tolerance: f64,
    pub l2: f64,
    pub class_weight: ClassWeight,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            gradient_tolerance: 1e-4,
            l2: 1e-4,
            class_weight: ClassWeight::None,
        }
    }
}

impl LogisticParams {
    pub(crate) fn problem(&self) -> Option<String> {
        if self.max_iterations == 0 {
            Some("max_iterations must be at least 1".into())
        } else if !(self.gradient_tolerance > 0.0) {
            Some("gradient_tolerance must be positive".into())
        } else if self.l2 < 0.0 {
            Some("l2 must not be negative".into())
        } else {
            None
        }
    }
}

/// `predict_probabilities` of the fitted model scores the larger class, `SATISFIED`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogisticModel {
    pub n_features: usize,
    pub fitted: FittedLogisticRegression<f64, usize>,
}

impl LogisticModel {
    pub fn fit(params: &LogisticParams, x: &Array2<f64>, y: &[usize]) -> CsatResult<Self> {
        let (x_fit, y_fit) = params.class_weight.rebalance(x, y);
        let fitted = LogisticRegression::default()
            .alpha(params.l2)
            .max_iterations(params.max_iterations)
            .gradient_tolerance(params.gradient_tolerance)
            .fit(&dataset(&x_fit, &y_fit, None))
            .map_err(|err| CsatError::fit("logistic_regression", err))?;
        Ok(Self {
            n_features: x.ncols(),
            fitted,
        })
    }
}

impl Classifier for LogisticModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &Array2<f64>) -> CsatResult<Array2<f64>> {
        check_width(self.n_features, x)?;
        Ok(proba_from_satisfied(self.fitted.predict_probabilities(x)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::domain::{SATISFIED, UNSATISFIED};
    use crate::training::models::fixtures::{accuracy, blobs};

    #[test]
    fn separates_linear_blobs() {
        let (x, y) = blobs(60);
        let model = LogisticModel::fit(&LogisticParams::default(), &x, &y).unwrap();
        assert!(accuracy(&model.predict(&x).unwrap(), &y) >= 0.95);
    }

    #[test]
    fn probability_columns_follow_the_label_layout() {
        let (x, y) = blobs(60);
        let model = LogisticModel::fit(&LogisticParams::default(), &x, &y).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        let satisfied_row = y.iter().position(|&l| l == SATISFIED).unwrap();
        let unsatisfied_row = y.iter().position(|&l| l == UNSATISFIED).unwrap();
        assert!(proba[[satisfied_row, SATISFIED]] > 0.5);
        assert!(proba[[unsatisfied_row, UNSATISFIED]] > 0.5);
    }

    #[test]
    fn single_class_training_is_a_fit_error() {
        let (x, _) = blobs(10);
        let err = LogisticModel::fit(&LogisticParams::default(), &x, &[1; 10]).unwrap_err();
        assert!(matches!(err, CsatError::Fit { family: "logistic_regression", .. }));
    }

    #[test]
    fn survives_a_json_roundtrip() {
        let (x, y) = blobs(40);
        let model = LogisticModel::fit(&LogisticParams::default(), &x, &y).unwrap();
        let back: LogisticModel = serde_json::from_str(&serde_json::to_string(&model).unwrap()).unwrap();
        assert_eq!(back.predict_proba(&x).unwrap(), model.predict_proba(&x).unwrap());
    }
}
