//! Gradient-boosted trees on the binary logistic objective, trained by xgboost.
//!
//! The booster is kept as its saved model bytes so the artefact stays plain
//! serde data; it is reloaded into a native booster when scoring.

use std::fs;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use xgboost::parameters::learning::{LearningTaskParametersBuilder, Objective};
use xgboost::parameters::tree::TreeBoosterParametersBuilder;
use xgboost::parameters::{BoosterParametersBuilder, BoosterType, TrainingParametersBuilder};
use xgboost::{Booster, DMatrix};

use crate::common::error::{CsatError, CsatResult};
use crate::training::domain::{check_width, proba_from_satisfied, ClassWeight, Classifier, SATISFIED};

const FAMILY: &str = "gradient_boosting";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: u32,
    pub learning_rate: f32,
    pub max_depth: u32,
    pub min_child_weight: f32,
    /// `Balanced` sets xgboost's `scale_pos_weight` to `n_unsatisfied / n_satisfied`.
    pub class_weight: ClassWeight,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_child_weight: 1.0,
            class_weight: ClassWeight::None,
        }
    }
}

impl BoostingParams {
    pub(crate) fn problem(&self) -> Option<String> {
        if self.n_estimators == 0 {
            Some("n_estimators must be at least 1".into())
        } else if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            Some("learning_rate must be in (0, 1]".into())
        } else if self.max_depth == 0 {
            Some("max_depth must be at least 1".into())
        } else if self.min_child_weight < 0.0 {
            Some("min_child_weight must not be negative".into())
        } else {
            None
        }
    }

    fn scale_pos_weight(&self, y: &[usize]) -> f32 {
        let satisfied = y.iter().filter(|&&label| label == SATISFIED).count();
        match self.class_weight {
            ClassWeight::Balanced if satisfied > 0 => (y.len() - satisfied) as f32 / satisfied as f32,
            _ => 1.0,
        }
    }
}

fn xgb_err(err: impl std::fmt::Display) -> CsatError {
    CsatError::fit(FAMILY, err)
}

fn dmatrix(x: &Array2<f64>) -> CsatResult<DMatrix> {
    let dense: Vec<f32> = x.iter().map(|&v| v as f32).collect();
    DMatrix::from_dense(&dense, x.nrows()).map_err(xgb_err)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoostedTrees {
    pub n_features: usize,
    /// Booster as written by `Booster::save`.
    pub model: Vec<u8>,
}

impl BoostedTrees {
    pub fn fit(params: &BoostingParams, x: &Array2<f64>, y: &[usize]) -> CsatResult<Self> {
        let mut train = dmatrix(x)?;
        let labels: Vec<f32> = y.iter().map(|&label| label as f32).collect();
        train.set_labels(&labels).map_err(xgb_err)?;

        let tree_params = TreeBoosterParametersBuilder::default()
            .max_depth(params.max_depth)
            .eta(params.learning_rate)
            .min_child_weight(params.min_child_weight)
            .scale_pos_weight(params.scale_pos_weight(y))
            .build()
            .map_err(xgb_err)?;
        let learning_params = LearningTaskParametersBuilder::default()
            .objective(Objective::BinaryLogistic)
            .build()
            .map_err(xgb_err)?;
        let booster_params = BoosterParametersBuilder::default()
            .booster_type(BoosterType::Tree(tree_params))
            .learning_params(learning_params)
            .verbose(false)
            .build()
            .map_err(xgb_err)?;
        let training_params = TrainingParametersBuilder::default()
            .dtrain(&train)
            .boost_rounds(params.n_estimators)
            .booster_params(booster_params)
            .build()
            .map_err(xgb_err)?;
        let booster = Booster::train(&training_params).map_err(xgb_err)?;

        let file = NamedTempFile::new()?;
        booster.save(file.path()).map_err(xgb_err)?;
        Ok(Self {
            n_features: x.ncols(),
            model: fs::read(file.path())?,
        })
    }

    fn booster(&self) -> CsatResult<Booster> {
        let file = NamedTempFile::new()?;
        fs::write(file.path(), &self.model)?;
        Booster::load(file.path()).map_err(xgb_err)
    }
}

impl Classifier for BoostedTrees {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &Array2<f64>) -> CsatResult<Array2<f64>> {
        check_width(self.n_features, x)?;
        let scores = self.booster()?.predict(&dmatrix(x)?).map_err(xgb_err)?;
        Ok(proba_from_satisfied(scores.into_iter().map(f64::from)))
    }
}
