//! k-nearest-neighbour voting over a `linfa-nn` kd-tree.

use linfa_nn::distance::{Distance, L2Dist};
use linfa_nn::{CommonNearestNeighbour, NearestNeighbour};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::common::error::{CsatError, CsatResult};
use crate::training::domain::{check_width, proba_from_satisfied, Classifier, SATISFIED};

const FAMILY: &str = "k_nearest";

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    #[default]
    Uniform,
    /// Votes scaled by inverse distance; an exact match takes the whole vote.
    Distance,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnParams {
    pub k: usize,
    pub weighting: Weighting,
}

impl Default for KnnParams {
    fn default() -> Self {
        Self {
            k: 5,
            weighting: Weighting::Uniform,
        }
    }
}

impl KnnParams {
    pub(crate) fn problem(&self) -> Option<String> {
        (self.k == 0).then(|| "k must be at least 1".to_string())
    }
}

/// Keeps the training matrix; the kd-tree is rebuilt per scoring call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KNearest {
    pub k: usize,
    pub weighting: Weighting,
    pub points: Array2<f64>,
    pub labels: Vec<usize>,
}

impl KNearest {
    pub fn fit(params: &KnnParams, x: &Array2<f64>, y: &[usize]) -> CsatResult<Self> {
        if let Some(problem) = params.problem() {
            return Err(CsatError::fit(FAMILY, problem));
        }
        Ok(Self {
            k: params.k.min(x.nrows()),
            weighting: params.weighting,
            points: x.clone(),
            labels: y.to_vec(),
        })
    }
}

impl Classifier for KNearest {
    fn n_features(&self) -> usize {
        self.points.ncols()
    }

    fn predict_proba(&self, x: &Array2<f64>) -> CsatResult<Array2<f64>> {
        check_width(self.n_features(), x)?;
        let index = CommonNearestNeighbour::KdTree
            .from_batch(&self.points, L2Dist)
            .map_err(|err| CsatError::fit(FAMILY, err))?;

        let mut p_satisfied = Vec::with_capacity(x.nrows());
        for row in x.rows() {
            let neighbours = index
                .k_nearest(row, self.k)
                .map_err(|err| CsatError::fit(FAMILY, err))?;
            let votes: Vec<(f64, bool)> = neighbours
                .into_iter()
                .map(|(point, at)| (L2Dist.distance(point, row), self.labels[at] == SATISFIED))
                .collect();
            p_satisfied.push(self.weighting.share(&votes));
        }
        Ok(proba_from_satisfied(p_satisfied))
    }
}

impl Weighting {
    /// Satisfied share of `(distance, is_satisfied)` votes.
    fn share(&self, votes: &[(f64, bool)]) -> f64 {
        let exact: Vec<bool> = votes.iter().filter(|(d, _)| *d == 0.0).map(|&(_, s)| s).collect();
        let weighted: Vec<(f64, bool)> = match self {
            Weighting::Uniform => votes.iter().map(|&(_, s)| (1.0, s)).collect(),
            Weighting::Distance if !exact.is_empty() => exact.into_iter().map(|s| (1.0, s)).collect(),
            Weighting::Distance => votes.iter().map(|&(d, s)| (1.0 / d, s)).collect(),
        };
        let total: f64 = weighted.iter().map(|(w, _)| w).sum();
        if total == 0.0 {
            return 0.5;
        }
        weighted.iter().filter(|(_, s)| *s).map(|(w, _)| w).sum::<f64>() / total
    }
}
