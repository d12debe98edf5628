//! Discrete AdaBoost (SAMME, two classes) over weighted `linfa-trees` stumps.

use linfa_trees::DecisionTree;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::common::error::{CsatError, CsatResult};
use crate::training::domain::{check_width, proba_from_satisfied, ClassWeight, Classifier, SATISFIED};

use super::sigmoid;
use super::tree::{check_limits, grow, votes};

const FAMILY: &str = "ada_boost";
const MIN_ERROR: f64 = 1e-10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaBoostParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Initial sample weights before the first round.
    pub class_weight: ClassWeight,
}

impl Default for AdaBoostParams {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            learning_rate: 1.0,
            max_depth: 1,
            class_weight: ClassWeight::None,
        }
    }
}

impl AdaBoostParams {
    pub(crate) fn problem(&self) -> Option<String> {
        if self.n_estimators == 0 {
            Some("n_estimators must be at least 1".into())
        } else if !(self.learning_rate > 0.0) {
            Some("learning_rate must be positive".into())
        } else {
            check_limits(self.max_depth, 2, 1)
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeightedStump {
    pub alpha: f64,
    pub tree: DecisionTree<f64, usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdaBoostModel {
    pub n_features: usize,
    pub stages: Vec<WeightedStump>,
}

impl AdaBoostModel {
    pub fn fit(params: &AdaBoostParams, x: &Array2<f64>, y: &[usize]) -> CsatResult<Self> {
        if let Some(problem) = params.problem() {
            return Err(CsatError::fit(FAMILY, problem));
        }
        let n = y.len() as f64;
        let mut weights = params.class_weight.sample_weights(y);
        let mut stages = Vec::with_capacity(params.n_estimators);

        for round in 0..params.n_estimators {
            let tree = grow(FAMILY, params.max_depth, 2, 1, x, y, Some(&weights))?;
            let predicted = votes(&tree, x);
            let missed: Vec<bool> = predicted
                .iter()
                .zip(y)
                .map(|(&vote, &label)| (vote == 1.0) != (label == SATISFIED))
                .collect();
            let total: f64 = weights.iter().sum();
            let error = weights
                .iter()
                .zip(&missed)
                .filter(|(_, miss)| **miss)
                .map(|(w, _)| w)
                .sum::<f64>()
                / total;

            if error >= 0.5 {
                if round == 0 {
                    return Err(CsatError::fit(
                        FAMILY,
                        format!("first learner is no better than chance (error {error:.3})"),
                    ));
                }
                tracing::debug!(round, error, "stopping: weak learner at chance level");
                break;
            }
            let error = error.max(MIN_ERROR);
            let alpha = params.learning_rate * ((1.0 - error) / error).ln();
            stages.push(WeightedStump { alpha, tree });
            if error <= MIN_ERROR {
                break;
            }

            for (w, &miss) in weights.iter_mut().zip(&missed) {
                if miss {
                    *w *= alpha.exp();
                }
            }
            let total: f64 = weights.iter().sum();
            weights.iter_mut().for_each(|w| *w *= n / total);
        }

        Ok(Self {
            n_features: x.ncols(),
            stages,
        })
    }
}

impl Classifier for AdaBoostModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    /// `p_satisfied = sigmoid(2 * d)` with `d` the alpha-normalised vote in `[-1, 1]`.
    fn predict_proba(&self, x: &Array2<f64>) -> CsatResult<Array2<f64>> {
        check_width(self.n_features, x)?;
        let total_alpha: f64 = self.stages.iter().map(|s| s.alpha).sum();
        let mut decision = ndarray::Array1::<f64>::zeros(x.nrows());
        for stage in &self.stages {
            decision.scaled_add(stage.alpha, &votes(&stage.tree, x).mapv(|v| 2.0 * v - 1.0));
        }
        if total_alpha > 0.0 {
            decision /= total_alpha;
        }
        Ok(proba_from_satisfied(decision.iter().map(|&d| sigmoid(2.0 * d))))
    }
}
