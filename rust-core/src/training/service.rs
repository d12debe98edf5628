//! Model training service: encode the training partition once, fit every candidate.

use ndarray::Array2;
use polars::prelude::DataFrame;
use tracing::{info, warn};

use crate::common::config::TrainingCfg;
use crate::common::error::{CsatError, CsatResult};
use crate::common::frame::{f64_values, read_csv};
use crate::common::time;
use crate::features::encoder::FittedEncoder;
use crate::features::service::load_encoder;

use super::domain::{CandidateOutcome, ModelArtifact, ModelConfig, ModelRepo, TrainingRun};

/// Binary labels of `target`, rejecting nulls and values other than 0/1.
pub fn labels(df: &DataFrame, target: &str) -> CsatResult<Vec<usize>> {
    f64_values(df, target)?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            Some(v) if v == 0.0 || v == 1.0 => Ok(v as usize),
            Some(v) => Err(CsatError::invalid(format!(
                "row {row}: label {v} in '{target}' is not binary"
            ))),
            None => Err(CsatError::invalid(format!("row {row}: label in '{target}' is null"))),
        })
        .collect()
}

/// Fit each configured candidate; a failing candidate never aborts its siblings.
pub fn train_all(
    train: &DataFrame,
    encoder: &FittedEncoder,
    configs: &[ModelConfig],
    target: &str,
) -> CsatResult<TrainingRun> {
    let x = encoder.transform(train)?;
    let y = labels(train, target)?;
    info!(rows = x.nrows(), width = x.ncols(), candidates = configs.len(), "training candidates");

    let mut run = TrainingRun::default();
    for config in configs {
        if run.outcomes.iter().any(|outcome| outcome.name() == config.name) {
            return Err(CsatError::config(format!("duplicate model name '{}'", config.name)));
        }
        run.outcomes.push(train_one(config, &x, &y));
    }

    if run.artifacts().next().is_none() {
        return Err(CsatError::internal("no models were successfully trained"));
    }
    Ok(run)
}

fn train_one(config: &ModelConfig, x: &Array2<f64>, y: &[usize]) -> CandidateOutcome {
    let fitted = config
        .family
        .validate(&config.name)
        .and_then(|_| config.family.fit(x, y));
    match fitted {
        Ok(model) => {
            info!(model = %config.name, family = config.family.as_str(), "candidate trained");
            CandidateOutcome::Trained(ModelArtifact {
                config: config.clone(),
                model,
                trained_at: time::now().to_rfc3339(),
            })
        }
        Err(err) => {
            warn!(model = %config.name, error = %err, "candidate failed, skipping");
            CandidateOutcome::Failed {
                name: config.name.clone(),
                reason: err.to_string(),
            }
        }
    }
}

/// Stage entry point: read the persisted training partition and encoder, train, persist.
pub fn run(cfg: &TrainingCfg, target: &str, repo: &impl ModelRepo) -> CsatResult<TrainingRun> {
    let train = read_csv(&cfg.train_path)?;
    let encoder = load_encoder(&cfg.encoder_path)?;
    let run = train_all(&train, &encoder, &cfg.models, target)?;
    for artifact in run.artifacts() {
        repo.put_model(artifact)?;
    }
    Ok(run)
}
