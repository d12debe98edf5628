//! CART decision tree on the Gini criterion, fitted by `linfa-trees`.
//!
//! Leaves carry a single class, so probabilities are 0 or 1; ensembles in
//! [`super::forest`] and [`super::adaboost`] turn the votes into scores.

use linfa::traits::Fit;
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::common::error::{CsatError, CsatResult};
use crate::training::domain::{check_width, proba_from_satisfied, ClassWeight, Classifier, SATISFIED};

use super::dataset;

pub const MAX_TREE_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub class_weight: ClassWeight,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_samples_split: 2,
            min_samples_leaf: 1,
            class_weight: ClassWeight::None,
        }
    }
}

impl TreeParams {
    pub(crate) fn problem(&self) -> Option<String> {
        check_limits(self.max_depth, self.min_samples_split, self.min_samples_leaf)
    }
}

/// Shared tree limits; a split must be able to produce two legal leaves.
pub(crate) fn check_limits(max_depth: usize, min_split: usize, min_leaf: usize) -> Option<String> {
    if max_depth == 0 || max_depth > MAX_TREE_DEPTH {
        Some(format!("max_depth must be in 1..={MAX_TREE_DEPTH}"))
    } else if min_leaf == 0 {
        Some("min_samples_leaf must be at least 1".into())
    } else if min_split < 2 * min_leaf {
        Some("min_samples_split must be at least twice min_samples_leaf".into())
    } else {
        None
    }
}

/// Fit one linfa tree; `weights` are per-sample masses.
pub(crate) fn grow(
    family: &'static str,
    max_depth: usize,
    min_split: usize,
    min_leaf: usize,
    x: &Array2<f64>,
    y: &[usize],
    weights: Option<&[f64]>,
) -> CsatResult<DecisionTree<f64, usize>> {
    DecisionTree::params()
        .split_quality(SplitQuality::Gini)
        .max_depth(Some(max_depth))
        .min_weight_split(min_split as f32)
        .min_weight_leaf(min_leaf as f32)
        .fit(&dataset(x, y, weights))
        .map_err(|err| CsatError::fit(family, err))
}

/// 1.0 where the tree votes satisfied, else 0.0.
pub(crate) fn votes(tree: &DecisionTree<f64, usize>, x: &Array2<f64>) -> Array1<f64> {
    use linfa::traits::Predict;
    let labels: Array1<usize> = tree.predict(x);
    labels.mapv(|label| if label == SATISFIED { 1.0 } else { 0.0 })
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeModel {
    pub n_features: usize,
    pub tree: DecisionTree<f64, usize>,
}

impl TreeModel {
    pub fn fit(params: &TreeParams, x: &Array2<f64>, y: &[usize]) -> CsatResult<Self> {
        let weights = match params.class_weight {
            ClassWeight::None => None,
            ClassWeight::Balanced => Some(params.class_weight.sample_weights(y)),
        };
        let tree = grow(
            "decision_tree",
            params.max_depth,
            params.min_samples_split,
            params.min_samples_leaf,
            x,
            y,
            weights.as_deref(),
        )?;
        Ok(Self {
            n_features: x.ncols(),
            tree,
        })
    }
}

impl Classifier for TreeModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &Array2<f64>) -> CsatResult<Array2<f64>> {
        check_width(self.n_features, x)?;
        Ok(proba_from_satisfied(votes(&self.tree, x)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::models::fixtures::{accuracy, blobs};
    use ndarray::array;

    #[test]
    fn fits_the_training_blobs() {
        let (x, y) = blobs(80);
        let model = TreeModel::fit(&TreeParams::default(), &x, &y).unwrap();
        assert!(accuracy(&model.predict(&x).unwrap(), &y) >= 0.95);
    }

    #[test]
    fn stump_finds_the_single_threshold() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = [0, 0, 0, 1, 1, 1];
        let params = TreeParams {
            max_depth: 1,
            ..TreeParams::default()
        };
        let model = TreeModel::fit(&params, &x, &y).unwrap();
        let proba = model.predict_proba(&array![[0.0], [20.0]]).unwrap();
        assert_eq!(proba, array![[1.0, 0.0], [0.0, 1.0]]);
    }

    #[test]
    fn limits_are_checked_before_fitting() {
        assert!(check_limits(0, 2, 1).is_some());
        assert!(check_limits(MAX_TREE_DEPTH + 1, 2, 1).is_some());
        assert!(check_limits(4, 10, 20).is_some());
        assert!(check_limits(4, 40, 20).is_none());
    }

    #[test]
    fn survives_a_json_roundtrip() {
        let (x, y) = blobs(40);
        let model = TreeModel::fit(&TreeParams::default(), &x, &y).unwrap();
        let back: TreeModel = serde_json::from_str(&serde_json::to_string(&model).unwrap()).unwrap();
        assert_eq!(back.predict_proba(&x).unwrap(), model.predict_proba(&x).unwrap());
    }
}
