//! Domain types for model training: candidate configuration, fitted models and outcomes.
//!
//! Model families form a closed enum. Adding a family means adding a variant
//! here plus its module under `models/`; there is no string-keyed registry.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::common::error::{CsatError, CsatResult};

use super::models::adaboost::{AdaBoostModel, AdaBoostParams};
use super::models::boosting::{BoostedTrees, BoostingParams};
use super::models::forest::{ForestModel, ForestParams};
use super::models::knn::{KNearest, KnnParams};
use super::models::linear::{LogisticModel, LogisticParams};
use super::models::prior::PriorModel;
use super::models::tree::{TreeModel, TreeParams};

/// Class index of a satisfied customer.
pub const SATISFIED: usize = 1;
/// Class index of an unsatisfied customer.
pub const UNSATISFIED: usize = 0;

/// Per-class sample weighting.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeight {
    #[default]
    None,
    /// Weight each sample by `n / (2 * n_class)`.
    Balanced,
}

impl ClassWeight {
    pub fn sample_weights(&self, y: &[usize]) -> Vec<f64> {
        match self {
            ClassWeight::None => vec![1.0; y.len()],
            ClassWeight::Balanced => {
                let positives = y.iter().filter(|&&label| label == SATISFIED).count();
                let counts = [y.len() - positives, positives];
                let n = y.len() as f64;
                y.iter()
                    .map(|&label| {
                        let count = counts[label.min(1)];
                        if count == 0 {
                            1.0
                        } else {
                            n / (2.0 * count as f64)
                        }
                    })
                    .collect()
            }
        }
    }

    /// Oversample the minority class cyclically until both classes match.
    ///
    /// For learners without per-sample weights. `None` returns the input unchanged.
    pub fn rebalance(&self, x: &Array2<f64>, y: &[usize]) -> (Array2<f64>, Vec<usize>) {
        let minority = match self {
            ClassWeight::None => None,
            ClassWeight::Balanced => {
                let positives = y.iter().filter(|&&label| label == SATISFIED).count();
                let negatives = y.len() - positives;
                if positives == 0 || negatives == 0 || positives == negatives {
                    None
                } else if positives < negatives {
                    Some((SATISFIED, negatives - positives))
                } else {
                    Some((UNSATISFIED, positives - negatives))
                }
            }
        };
        let Some((class, extra)) = minority else {
            return (x.clone(), y.to_vec());
        };
        let rows: Vec<usize> = (0..y.len())
            .chain(
                y.iter()
                    .enumerate()
                    .filter(|(_, label)| **label == class)
                    .map(|(row, _)| row)
                    .cycle()
                    .take(extra),
            )
            .collect();
        (x.select(Axis(0), &rows), rows.iter().map(|&row| y[row]).collect())
    }
}

/// Supported model families with their hyperparameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModelFamily {
    /// Predicts the training class prior for every row.
    Prior,
    LogisticRegression(LogisticParams),
    DecisionTree(TreeParams),
    RandomForest(ForestParams),
    GradientBoosting(BoostingParams),
    AdaBoost(AdaBoostParams),
    KNearest(KnnParams),
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Prior => "prior",
            ModelFamily::LogisticRegression(_) => "logistic_regression",
            ModelFamily::DecisionTree(_) => "decision_tree",
            ModelFamily::RandomForest(_) => "random_forest",
            ModelFamily::GradientBoosting(_) => "gradient_boosting",
            ModelFamily::AdaBoost(_) => "ada_boost",
            ModelFamily::KNearest(_) => "k_nearest",
        }
    }

    /// Reject hyperparameters that could only fail once fitting starts.
    pub fn validate(&self, name: &str) -> CsatResult<()> {
        let problem = match self {
            ModelFamily::Prior => None,
            ModelFamily::LogisticRegression(p) => p.problem(),
            ModelFamily::DecisionTree(p) => p.problem(),
            ModelFamily::RandomForest(p) => p.problem(),
            ModelFamily::GradientBoosting(p) => p.problem(),
            ModelFamily::AdaBoost(p) => p.problem(),
            ModelFamily::KNearest(p) => p.problem(),
        };
        match problem {
            Some(problem) => Err(CsatError::config(format!(
                "model '{name}' ({}): {problem}",
                self.as_str()
            ))),
            None => Ok(()),
        }
    }

    /// Fit this family on an encoded matrix and binary labels.
    pub fn fit(&self, x: &Array2<f64>, y: &[usize]) -> CsatResult<TrainedModel> {
        check_training_input(x, y)?;
        let model = match self {
            ModelFamily::Prior => TrainedModel::Prior(PriorModel::fit(x, y)),
            ModelFamily::LogisticRegression(p) => {
                TrainedModel::LogisticRegression(LogisticModel::fit(p, x, y)?)
            }
            ModelFamily::DecisionTree(p) => TrainedModel::DecisionTree(TreeModel::fit(p, x, y)?),
            ModelFamily::RandomForest(p) => TrainedModel::RandomForest(ForestModel::fit(p, x, y)?),
            ModelFamily::GradientBoosting(p) => {
                TrainedModel::GradientBoosting(BoostedTrees::fit(p, x, y)?)
            }
            ModelFamily::AdaBoost(p) => TrainedModel::AdaBoost(AdaBoostModel::fit(p, x, y)?),
            ModelFamily::KNearest(p) => TrainedModel::KNearest(KNearest::fit(p, x, y)?),
        };
        Ok(model)
    }
}

fn check_training_input(x: &Array2<f64>, y: &[usize]) -> CsatResult<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(CsatError::invalid("training matrix is empty"));
    }
    if x.nrows() != y.len() {
        return Err(CsatError::invalid(format!(
            "training matrix has {} rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if let Some(label) = y.iter().find(|&&label| label > SATISFIED) {
        return Err(CsatError::invalid(format!("label {label} is not binary")));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(CsatError::invalid("training matrix contains non-finite values"));
    }
    Ok(())
}

/// One configured candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(flatten)]
    pub family: ModelFamily,
}

/// Binary classifier over encoded feature matrices.
pub trait Classifier {
    /// Width of the matrices the model was fitted on.
    fn n_features(&self) -> usize;

    /// Class probabilities per row, columns `[p_unsatisfied, p_satisfied]`.
    fn predict_proba(&self, x: &Array2<f64>) -> CsatResult<Array2<f64>>;

    /// Most likely class per row.
    fn predict(&self, x: &Array2<f64>) -> CsatResult<Vec<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| if row[UNSATISFIED] >= 0.5 { UNSATISFIED } else { SATISFIED })
            .collect())
    }
}

/// Fail fast on matrices of the wrong width.
pub(crate) fn check_width(expected: usize, x: &Array2<f64>) -> CsatResult<()> {
    if x.ncols() == expected {
        Ok(())
    } else {
        Err(CsatError::invalid(format!(
            "model expects {expected} features, got {}",
            x.ncols()
        )))
    }
}

/// Stack per-row satisfied probabilities into the two-column layout.
pub(crate) fn proba_from_satisfied(p_satisfied: impl IntoIterator<Item = f64>) -> Array2<f64> {
    let p: Vec<f64> = p_satisfied.into_iter().map(|v| v.clamp(0.0, 1.0)).collect();
    Array2::from_shape_fn((p.len(), 2), |(row, class)| {
        if class == SATISFIED {
            p[row]
        } else {
            1.0 - p[row]
        }
    })
}

/// A fitted model of one of the supported families.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum TrainedModel {
    Prior(PriorModel),
    LogisticRegression(LogisticModel),
    DecisionTree(TreeModel),
    RandomForest(ForestModel),
    GradientBoosting(BoostedTrees),
    AdaBoost(AdaBoostModel),
    KNearest(KNearest),
}

impl TrainedModel {
    fn inner(&self) -> &dyn Classifier {
        match self {
            TrainedModel::Prior(m) => m,
            TrainedModel::LogisticRegression(m) => m,
            TrainedModel::DecisionTree(m) => m,
            TrainedModel::RandomForest(m) => m,
            TrainedModel::GradientBoosting(m) => m,
            TrainedModel::AdaBoost(m) => m,
            TrainedModel::KNearest(m) => m,
        }
    }
}

impl Classifier for TrainedModel {
    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn predict_proba(&self, x: &Array2<f64>) -> CsatResult<Array2<f64>> {
        self.inner().predict_proba(x)
    }
}

/// A fitted model paired with the configuration that produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub config: ModelConfig,
    pub model: TrainedModel,
    pub trained_at: String,
}

impl ModelArtifact {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Result of one candidate; failures never abort siblings.
#[derive(Clone, Debug)]
pub enum CandidateOutcome {
    Trained(ModelArtifact),
    Failed { name: String, reason: String },
}

impl CandidateOutcome {
    pub fn name(&self) -> &str {
        match self {
            CandidateOutcome::Trained(artifact) => artifact.name(),
            CandidateOutcome::Failed { name, .. } => name,
        }
    }
}

/// Every candidate of one training run, in configuration order.
#[derive(Clone, Debug, Default)]
pub struct TrainingRun {
    pub outcomes: Vec<CandidateOutcome>,
}

impl TrainingRun {
    pub fn artifacts(&self) -> impl Iterator<Item = &ModelArtifact> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            CandidateOutcome::Trained(artifact) => Some(artifact),
            CandidateOutcome::Failed { .. } => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            CandidateOutcome::Failed { name, reason } => Some((name.as_str(), reason.as_str())),
            CandidateOutcome::Trained(_) => None,
        })
    }
}

/// Repository contract for trained model artefacts.
pub trait ModelRepo {
    fn put_model(&self, artifact: &ModelArtifact) -> CsatResult<()>;
    fn get_model(&self, name: &str) -> CsatResult<ModelArtifact>;
}
