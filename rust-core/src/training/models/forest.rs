//! Random forest: bagged `linfa-trees` learners, each on a random feature subset.

use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::common::error::CsatResult;
use crate::training::domain::{check_width, proba_from_satisfied, ClassWeight, Classifier};

use super::tree::{check_limits, grow, votes};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features per tree; `round(sqrt(width))` when unset.
    pub max_features: Option<usize>,
    pub class_weight: ClassWeight,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 8,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            class_weight: ClassWeight::None,
            seed: 42,
        }
    }
}

impl ForestParams {
    pub(crate) fn problem(&self) -> Option<String> {
        if self.n_trees == 0 {
            return Some("n_trees must be at least 1".into());
        }
        if self.max_features == Some(0) {
            return Some("max_features must be at least 1".into());
        }
        check_limits(self.max_depth, self.min_samples_split, self.min_samples_leaf)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForestMember {
    /// Columns of the encoded matrix this tree was grown on, ascending.
    pub features: Vec<usize>,
    pub tree: DecisionTree<f64, usize>,
}

/// Satisfied probability is the share of trees voting satisfied.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForestModel {
    pub n_features: usize,
    pub members: Vec<ForestMember>,
}

impl ForestModel {
    pub fn fit(params: &ForestParams, x: &Array2<f64>, y: &[usize]) -> CsatResult<Self> {
        let (rows, width) = x.dim();
        let subset = params
            .max_features
            .unwrap_or_else(|| (width as f64).sqrt().round() as usize)
            .clamp(1, width);
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut members = Vec::with_capacity(params.n_trees);
        for _ in 0..params.n_trees {
            let bag: Vec<usize> = (0..rows).map(|_| rng.gen_range(0..rows)).collect();
            let mut features = sample(&mut rng, width, subset).into_vec();
            features.sort_unstable();

            let x_bag = x.select(Axis(0), &bag).select(Axis(1), &features);
            let y_bag: Vec<usize> = bag.iter().map(|&row| y[row]).collect();
            let weights = match params.class_weight {
                ClassWeight::None => None,
                ClassWeight::Balanced => Some(params.class_weight.sample_weights(&y_bag)),
            };
            let tree = grow(
                "random_forest",
                params.max_depth,
                params.min_samples_split,
                params.min_samples_leaf,
                &x_bag,
                &y_bag,
                weights.as_deref(),
            )?;
            members.push(ForestMember { features, tree });
        }
        Ok(Self {
            n_features: width,
            members,
        })
    }
}

impl Classifier for ForestModel {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &Array2<f64>) -> CsatResult<Array2<f64>> {
        check_width(self.n_features, x)?;
        let mut total = Array1::<f64>::zeros(x.nrows());
        for member in &self.members {
            total += &votes(&member.tree, &x.select(Axis(1), &member.features));
        }
        let n = self.members.len().max(1) as f64;
        Ok(proba_from_satisfied(total.mapv(|v| v / n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::models::fixtures::{accuracy, blobs};

    fn small() -> ForestParams {
        ForestParams {
            n_trees: 15,
            max_depth: 4,
            ..ForestParams::default()
        }
    }

    #[test]
    fn fits_the_training_blobs() {
        let (x, y) = blobs(80);
        let model = ForestModel::fit(&small(), &x, &y).unwrap();
        assert_eq!(model.members.len(), 15);
        assert!(accuracy(&model.predict(&x).unwrap(), &y) >= 0.9);
    }

    #[test]
    fn same_seed_grows_the_same_forest() {
        let (x, y) = blobs(50);
        let a = ForestModel::fit(&small(), &x, &y).unwrap();
        let b = ForestModel::fit(&small(), &x, &y).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
        let features: Vec<&Vec<usize>> = a.members.iter().map(|m| &m.features).collect();
        assert_eq!(features, b.members.iter().map(|m| &m.features).collect::<Vec<_>>());
    }

    #[test]
    fn probabilities_are_vote_shares() {
        let (x, y) = blobs(40);
        let model = ForestModel::fit(&small(), &x, &y).unwrap();
        for p in model.predict_proba(&x).unwrap().column(1) {
            let votes = p * 15.0;
            assert!((votes - votes.round()).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_trees_is_rejected() {
        let params = ForestParams {
            n_trees: 0,
            ..ForestParams::default()
        };
        assert!(params.problem().is_some());
    }
}
