//! Stage orchestration: run each stage from its persisted inputs, stop at the first failure.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::common::config::AppCfg;
use crate::common::error::{CsatError, CsatResult};
use crate::common::frame::{read_parquet, write_parquet};
use crate::common::fs::write_status;
use crate::data::domain::Schema;
use crate::data::ingest::fetch_and_extract;
use crate::data::repo_fs::{FsDataRepo, STATUS_LABEL};
use crate::data::service::validate_and_merge;
use crate::evaluation::domain::EvaluationRun;
use crate::evaluation::repo_fs::FsRegistry;
use crate::evaluation::service as evaluation;
use crate::evaluation::tracking::TracingTracker;
use crate::features::engineer::engineer;
use crate::features::service::{fit_and_split, persist};
use crate::training::repo_fs::FsModelRepo;
use crate::training::service as training;

use super::domain::Stage;

pub const PIPELINE_STATUS_FILE: &str = "pipeline_status.txt";

/// Run `body` as `stage`: log start and completion, or log, mark and re-raise its failure.
pub fn run_stage<T>(
    stage: Stage,
    status_path: &Path,
    body: impl FnOnce() -> CsatResult<T>,
) -> CsatResult<T> {
    info!(stage = %stage, ">>>>>> stage started <<<<<<");
    match body() {
        Ok(value) => {
            info!(stage = %stage, ">>>>>> stage completed <<<<<<");
            Ok(value)
        }
        Err(err) => {
            error!(stage = %stage, code = err.code() as u32, error = %err, "stage failed");
            if let Err(mark_err) = write_status(status_path, stage.name(), false, Some(&err.to_string())) {
                error!(error = %mark_err, "could not write pipeline status marker");
            }
            Err(CsatError::stage(stage.name(), err))
        }
    }
}

/// Fail with a schema violation unless the last validation run passed.
pub fn ensure_validated(status_path: &Path) -> CsatResult<()> {
    let body = fs::read_to_string(status_path).map_err(|_| {
        CsatError::config(format!(
            "validation status marker {} not found; run the validation stage first",
            status_path.display()
        ))
    })?;
    let mut lines = body.lines();
    let expected = format!("{STATUS_LABEL}: True");
    if lines.next().map(str::trim) == Some(expected.as_str()) {
        return Ok(());
    }
    let detail: Vec<&str> = lines.filter(|line| !line.trim().is_empty()).collect();
    Err(CsatError::SchemaViolation {
        table: "validation".to_string(),
        detail: if detail.is_empty() {
            "validation status is False".to_string()
        } else {
            detail.join("; ")
        },
    })
}

fn status_path(cfg: &AppCfg) -> PathBuf {
    cfg.artifacts_root.join(PIPELINE_STATUS_FILE)
}

fn ingestion(cfg: &AppCfg) -> CsatResult<()> {
    let dir = fetch_and_extract(&cfg.ingestion)?;
    info!(dir = %dir.display(), "raw export extracted");
    Ok(())
}

fn validation(cfg: &AppCfg) -> CsatResult<()> {
    let schema = Schema::load(&cfg.validation.schema_path)?;
    let repo = FsDataRepo::new(&cfg.validation.raw_dir, &cfg.validation);
    let outcome = validate_and_merge(&repo, &schema, &cfg.validation)?;
    if !outcome.status {
        return Err(CsatError::SchemaViolation {
            table: "validation".to_string(),
            detail: outcome.report.failure_summary().join("; "),
        });
    }
    Ok(())
}

fn feature_engineering(cfg: &AppCfg) -> CsatResult<()> {
    ensure_validated(&cfg.validation.status_path)?;
    let merged = read_parquet(&cfg.features.merged_path)?;
    let mut features = engineer(&merged, &cfg.features, &cfg.target_column)?;
    write_parquet(&mut features, &cfg.features.feature_path)?;
    info!(rows = features.height(), columns = features.width(), "feature table saved");
    Ok(())
}

fn feature_transformation(cfg: &AppCfg) -> CsatResult<()> {
    let table = read_parquet(&cfg.transformation.feature_path)?;
    let (encoder, split) = fit_and_split(&table, &cfg.transformation, &cfg.target_column)?;
    persist(&encoder, &split, &cfg.transformation, &cfg.target_column)
}

fn model_training(cfg: &AppCfg) -> CsatResult<()> {
    let repo = FsModelRepo::new(&cfg.training.model_dir);
    let run = training::run(&cfg.training, &cfg.target_column, &repo)?;
    info!(
        trained = run.artifacts().count(),
        failed = run.failures().count(),
        "training finished"
    );
    Ok(())
}

fn model_evaluation(cfg: &AppCfg) -> CsatResult<EvaluationRun> {
    let repo = FsModelRepo::new(&cfg.evaluation.model_dir);
    let registry = FsRegistry::new(&cfg.evaluation.registry_dir);
    evaluation::run(
        &cfg.evaluation,
        &cfg.training.models,
        &cfg.target_column,
        &repo,
        &registry,
        &TracingTracker,
    )
}

/// Run one stage from its persisted inputs.
pub fn run_single(cfg: &AppCfg, stage: Stage) -> CsatResult<()> {
    let status = status_path(cfg);
    run_stage(stage, &status, || match stage {
        Stage::Ingestion => ingestion(cfg),
        Stage::Validation => validation(cfg),
        Stage::FeatureEngineering => feature_engineering(cfg),
        Stage::FeatureTransformation => feature_transformation(cfg),
        Stage::Training => model_training(cfg),
        Stage::Evaluation => model_evaluation(cfg).map(|_| ()),
    })
}

/// Run every stage in order; the first failure halts the run.
pub fn run_pipeline(cfg: &AppCfg) -> CsatResult<EvaluationRun> {
    let status = status_path(cfg);
    for stage in &Stage::ALL[..Stage::ALL.len() - 1] {
        run_single(cfg, *stage)?;
    }
    let run = run_stage(Stage::Evaluation, &status, || model_evaluation(cfg))?;
    write_status(&status, "pipeline", true, Some(&format!("champion: {} ({})", run.champion, run.version)))?;
    Ok(run)
}
