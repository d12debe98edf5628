//! Evaluation service: score every candidate, pick the champion, promote its bundle.

use std::cmp::Ordering;

use polars::prelude::*;
use tracing::{info, warn};

use crate::common::config::EvaluationCfg;
use crate::common::error::{CsatError, CsatResult};
use crate::common::frame::{read_csv, write_csv};
use crate::common::fs::save_json;
use crate::common::time;
use crate::features::encoder::FittedEncoder;
use crate::features::service::load_encoder;
use crate::inference::domain::ChampionBundle;
use crate::training::domain::{Classifier, ModelArtifact, ModelConfig, ModelRepo, UNSATISFIED};
use crate::training::service::labels;

use super::domain::{
    CandidateFailure, CandidateState, EvaluationRun, LeaderboardEntry, Metrics, ModelRegistry,
    RegistryStage, RunTracker, DECISION_THRESHOLD,
};
use super::metrics;

/// A candidate that scored successfully.
#[derive(Clone, Debug)]
pub struct Scored<'a> {
    pub artifact: &'a ModelArtifact,
    pub metrics: Metrics,
}

/// Score each artefact on the encoded test partition; failures are collected, not raised.
pub fn score_candidates<'a>(
    test: &DataFrame,
    encoder: &FittedEncoder,
    artifacts: &'a [ModelArtifact],
    target: &str,
) -> CsatResult<(Vec<Scored<'a>>, Vec<CandidateFailure>)> {
    let x = encoder.transform(test)?;
    let y = labels(test, target)?;
    let mut scored = Vec::new();
    let mut failures = Vec::new();
    for artifact in artifacts {
        let outcome = artifact
            .model
            .predict_proba(&x)
            .and_then(|proba| metrics::evaluate(&y, &proba.column(UNSATISFIED).to_vec()));
        match outcome {
            Ok(metrics) => {
                info!(
                    model = artifact.name(),
                    composite = metrics.composite,
                    accuracy = metrics.accuracy,
                    f1_unsatisfied = metrics.unsatisfied.f1,
                    "candidate evaluated"
                );
                scored.push(Scored { artifact, metrics });
            }
            Err(err) => {
                warn!(model = artifact.name(), error = %err, "candidate evaluation failed, excluded");
                failures.push(CandidateFailure {
                    model: artifact.name().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
    Ok((scored, failures))
}

/// Composite descending, then name ascending.
fn leaderboard_order(a: &Scored<'_>, b: &Scored<'_>) -> Ordering {
    b.metrics
        .composite
        .total_cmp(&a.metrics.composite)
        .then_with(|| a.artifact.name().cmp(b.artifact.name()))
}

/// Rank scored candidates; the first entry is the champion, the rest are archived.
pub fn rank(mut scored: Vec<Scored<'_>>) -> CsatResult<Vec<LeaderboardEntry>> {
    scored.sort_by(leaderboard_order);
    scored
        .into_iter()
        .enumerate()
        .map(|(i, candidate)| -> CsatResult<LeaderboardEntry> {
            let outcome = if i == 0 {
                CandidateState::Champion
            } else {
                CandidateState::Archived
            };
            let state = CandidateState::Trained
                .advance(CandidateState::Evaluated)?
                .advance(outcome)?;
            Ok(LeaderboardEntry {
                rank: i + 1,
                model: candidate.artifact.name().to_string(),
                family: candidate.artifact.config.family.as_str().to_string(),
                state,
                metrics: candidate.metrics,
            })
        })
        .collect()
}

/// Version tag of a promoted bundle: `<model>-<utc timestamp>`.
pub fn version_tag(model: &str) -> String {
    format!("{model}-{}", time::now().format("%Y%m%dT%H%M%SZ"))
}

/// Evaluate, select the champion, then register and promote its bundle.
pub fn evaluate_and_promote(
    test: &DataFrame,
    encoder: &FittedEncoder,
    artifacts: &[ModelArtifact],
    target: &str,
    registry: &impl ModelRegistry,
    tracker: &dyn RunTracker,
) -> CsatResult<(EvaluationRun, ChampionBundle)> {
    let (run, bundle) = evaluate_and_register(test, encoder, artifacts, target, registry, tracker)?;
    promote_champion(&run, registry, tracker)?;
    Ok((run, bundle))
}

/// Evaluate and register the champion's bundle without moving the production pointer.
pub fn evaluate_and_register(
    test: &DataFrame,
    encoder: &FittedEncoder,
    artifacts: &[ModelArtifact],
    target: &str,
    registry: &impl ModelRegistry,
    tracker: &dyn RunTracker,
) -> CsatResult<(EvaluationRun, ChampionBundle)> {
    let (scored, failures) = score_candidates(test, encoder, artifacts, target)?;
    if scored.is_empty() {
        return Err(CsatError::internal("no candidate could be evaluated"));
    }
    let leaderboard = rank(scored)?;
    for entry in &leaderboard {
        tracker.record_metric(&entry.model, "composite", entry.metrics.composite);
        tracker.record_metric(&entry.model, "accuracy", entry.metrics.accuracy);
        tracker.record_metric(&entry.model, "f1_unsatisfied", entry.metrics.unsatisfied.f1);
        tracker.record_metric(&entry.model, "recall_unsatisfied", entry.metrics.unsatisfied.recall);
        if let Some(auc) = entry.metrics.roc_auc {
            tracker.record_metric(&entry.model, "roc_auc", auc);
        }
    }

    let champion = &leaderboard[0];
    let artifact = artifacts
        .iter()
        .find(|artifact| artifact.name() == champion.model)
        .ok_or_else(|| CsatError::internal(format!("champion '{}' vanished", champion.model)))?;
    let bundle = ChampionBundle::new(encoder.clone(), artifact, champion.metrics.composite)?;

    let tag = version_tag(&champion.model);
    let version = registry.register(&bundle, &tag)?;
    info!(champion = %champion.model, %version, "champion bundle registered");

    let run = EvaluationRun {
        decision_threshold: DECISION_THRESHOLD,
        champion: champion.model.clone(),
        leaderboard,
        failures,
        version,
        tag,
    };
    Ok((run, bundle))
}

/// Point production at the run's registered version.
pub fn promote_champion(
    run: &EvaluationRun,
    registry: &impl ModelRegistry,
    tracker: &dyn RunTracker,
) -> CsatResult<()> {
    registry.promote(run.version, RegistryStage::Production)?;
    tracker.record_artifact("champion_bundle", &format!("{} ({})", run.version, run.tag));
    info!(
        champion = %run.champion,
        version = %run.version,
        "champion promoted to production"
    );
    Ok(())
}

/// Leaderboard as a flat table, best first.
pub fn leaderboard_frame(run: &EvaluationRun) -> CsatResult<DataFrame> {
    let entries = &run.leaderboard;
    let metric = |f: fn(&Metrics) -> f64| entries.iter().map(|e| f(&e.metrics)).collect::<Vec<f64>>();
    let df = df!(
        "rank" => entries.iter().map(|e| e.rank as u32).collect::<Vec<_>>(),
        "model" => entries.iter().map(|e| e.model.as_str()).collect::<Vec<_>>(),
        "family" => entries.iter().map(|e| e.family.as_str()).collect::<Vec<_>>(),
        "state" => entries.iter().map(|e| e.state.as_str()).collect::<Vec<_>>(),
        "composite" => metric(|m| m.composite),
        "accuracy" => metric(|m| m.accuracy),
        "f1_unsatisfied" => metric(|m| m.unsatisfied.f1),
        "recall_unsatisfied" => metric(|m| m.unsatisfied.recall),
        "precision_unsatisfied" => metric(|m| m.unsatisfied.precision),
        "f1_satisfied" => metric(|m| m.satisfied.f1),
        "roc_auc" => entries.iter().map(|e| e.metrics.roc_auc).collect::<Vec<Option<f64>>>()
    )?;
    Ok(df)
}

/// Persist `metrics.json` and `leaderboard.csv`.
pub fn write_reports(run: &EvaluationRun, cfg: &EvaluationCfg) -> CsatResult<()> {
    save_json(&cfg.metrics_path, run)?;
    let mut board = leaderboard_frame(run)?;
    write_csv(&mut board, &cfg.leaderboard_path)?;
    info!(path = %cfg.leaderboard_path.display(), "leaderboard saved");
    Ok(())
}

/// Stage entry point: load the test partition, encoder and every configured artefact.
///
/// Reports are written before promotion, so a failed report leaves the
/// previous production bundle in place.
pub fn run(
    cfg: &EvaluationCfg,
    models: &[ModelConfig],
    target: &str,
    repo: &impl ModelRepo,
    registry: &impl ModelRegistry,
    tracker: &dyn RunTracker,
) -> CsatResult<EvaluationRun> {
    let test = read_csv(&cfg.test_path)?;
    let encoder = load_encoder(&cfg.encoder_path)?;

    let mut artifacts = Vec::new();
    let mut missing = Vec::new();
    for model in models {
        match repo.get_model(&model.name) {
            Ok(artifact) => artifacts.push(artifact),
            Err(err) => {
                warn!(model = %model.name, error = %err, "no artefact for candidate");
                missing.push(CandidateFailure {
                    model: model.name.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    let (mut run, _) = evaluate_and_register(&test, &encoder, &artifacts, target, registry, tracker)?;
    missing.append(&mut run.failures);
    run.failures = missing;
    write_reports(&run, cfg)?;
    promote_champion(&run, registry, tracker)?;
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::domain::VersionId;
    use crate::evaluation::repo_fs::FsRegistry;
    use crate::features::domain::FeatureGroups;
    use crate::training::domain::{ModelFamily, TrainedModel};
    use crate::training::models::prior::PriorModel;
    use std::cell::RefCell;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        metrics: RefCell<Vec<(String, String, f64)>>,
        artifacts: RefCell<Vec<String>>,
    }

    impl RunTracker for Recorder {
        fn record_metric(&self, model: &str, name: &str, value: f64) {
            self.metrics.borrow_mut().push((model.into(), name.into(), value));
        }

        fn record_artifact(&self, name: &str, _location: &str) {
            self.artifacts.borrow_mut().push(name.into());
        }
    }

    /// Artefacts keyed by name; unknown names are missing.
    struct MemModels(Vec<ModelArtifact>);

    impl ModelRepo for MemModels {
        fn put_model(&self, _artifact: &ModelArtifact) -> CsatResult<()> {
            Ok(())
        }

        fn get_model(&self, name: &str) -> CsatResult<ModelArtifact> {
            self.0
                .iter()
                .find(|artifact| artifact.name() == name)
                .cloned()
                .ok_or_else(|| CsatError::model_missing(name.to_string()))
        }
    }

    fn stage_cfg(root: &std::path::Path) -> EvaluationCfg {
        let cfg = EvaluationCfg {
            test_path: root.join("test.csv"),
            encoder_path: root.join("encoder.json"),
            model_dir: root.join("models"),
            metrics_path: root.join("reports/metrics.json"),
            leaderboard_path: root.join("reports/leaderboard.csv"),
            registry_dir: root.join("registry"),
        };
        write_csv(&mut test_frame(), &cfg.test_path).unwrap();
        save_json(&cfg.encoder_path, &encoder()).unwrap();
        cfg
    }

    fn test_frame() -> DataFrame {
        df!(
            "total_price" => &[1.0, 2.0, 3.0, 4.0, 5.0],
            "label" => &[0i32, 0, 1, 1, 1]
        )
        .unwrap()
    }

    fn encoder() -> FittedEncoder {
        let groups = FeatureGroups {
            numeric: vec!["total_price".into()],
            categorical: vec![],
            passthrough: vec![],
        };
        FittedEncoder::fit(&test_frame(), &groups).unwrap()
    }

    /// Constant-probability stand-in built directly from a prior model.
    fn constant(name: &str, p_satisfied: f64) -> ModelArtifact {
        ModelArtifact {
            config: ModelConfig {
                name: name.into(),
                family: ModelFamily::Prior,
            },
            model: TrainedModel::Prior(PriorModel {
                n_features: 1,
                p_satisfied,
            }),
            trained_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn highest_composite_wins_and_is_promoted() {
        let dir = tempdir().unwrap();
        let registry = FsRegistry::new(dir.path());
        let tracker = Recorder::default();
        // p_unsat 0.7 labels everything unsatisfied: recall 1 beats the all-satisfied model.
        let artifacts = vec![constant("AllSatisfied", 0.9), constant("AllUnsatisfied", 0.3)];
        let (run, bundle) =
            evaluate_and_promote(&test_frame(), &encoder(), &artifacts, "label", &registry, &tracker)
                .unwrap();
        assert_eq!(run.champion, "AllUnsatisfied");
        assert_eq!(bundle.model_name, "AllUnsatisfied");
        assert_eq!(run.version, VersionId(1));
        assert!(run.tag.starts_with("AllUnsatisfied-"));
        assert_eq!(run.champion_entry().unwrap().rank, 1);
        assert_eq!(run.leaderboard[1].state, CandidateState::Archived);
        assert_eq!(registry.load(RegistryStage::Production).unwrap().model_name, "AllUnsatisfied");
        assert_eq!(tracker.artifacts.borrow().as_slice(), ["champion_bundle"]);
        assert!(tracker.metrics.borrow().len() >= 8);
    }

    #[test]
    fn ties_break_on_name() {
        let dir = tempdir().unwrap();
        let registry = FsRegistry::new(dir.path());
        let artifacts = vec![constant("Zeta", 0.9), constant("Alpha", 0.9)];
        let (run, _) = evaluate_and_promote(
            &test_frame(),
            &encoder(),
            &artifacts,
            "label",
            &registry,
            &Recorder::default(),
        )
        .unwrap();
        assert_eq!(run.champion, "Alpha");
        let champions = run
            .leaderboard
            .iter()
            .filter(|e| e.state == CandidateState::Champion)
            .count();
        assert_eq!(champions, 1);
    }

    #[test]
    fn failing_candidate_is_excluded() {
        let dir = tempdir().unwrap();
        let registry = FsRegistry::new(dir.path());
        let mut wrong_width = constant("Wide", 0.5);
        wrong_width.model = TrainedModel::Prior(PriorModel {
            n_features: 3,
            p_satisfied: 0.5,
        });
        let artifacts = vec![wrong_width, constant("Baseline", 0.6)];
        let (run, _) = evaluate_and_promote(
            &test_frame(),
            &encoder(),
            &artifacts,
            "label",
            &registry,
            &Recorder::default(),
        )
        .unwrap();
        assert_eq!(run.leaderboard.len(), 1);
        assert_eq!(run.failures[0].model, "Wide");
    }

    #[test]
    fn nothing_evaluable_is_internal_error() {
        let dir = tempdir().unwrap();
        let registry = FsRegistry::new(dir.path());
        let err = evaluate_and_promote(&test_frame(), &encoder(), &[], "label", &registry, &Recorder::default())
            .unwrap_err();
        assert!(matches!(err, CsatError::Internal(_)));
    }

    #[test]
    fn reports_are_written() {
        let dir = tempdir().unwrap();
        let registry = FsRegistry::new(&dir.path().join("registry"));
        let artifacts = vec![constant("A", 0.9), constant("B", 0.3)];
        let (run, _) = evaluate_and_promote(
            &test_frame(),
            &encoder(),
            &artifacts,
            "label",
            &registry,
            &Recorder::default(),
        )
        .unwrap();
        let cfg = EvaluationCfg {
            test_path: dir.path().join("test.csv"),
            encoder_path: dir.path().join("encoder.json"),
            model_dir: dir.path().join("models"),
            metrics_path: dir.path().join("metrics.json"),
            leaderboard_path: dir.path().join("leaderboard.csv"),
            registry_dir: dir.path().join("registry"),
        };
        write_reports(&run, &cfg).unwrap();
        let board = read_csv(&cfg.leaderboard_path).unwrap();
        assert_eq!(board.height(), 2);
        assert_eq!(board.column("model").unwrap().str().unwrap().get(0), Some("B"));
        assert!(cfg.metrics_path.is_file());
    }

    #[test]
    fn stage_run_writes_reports_then_promotes() {
        let dir = tempdir().unwrap();
        let cfg = stage_cfg(dir.path());
        let registry = FsRegistry::new(&cfg.registry_dir);
        let models = MemModels(vec![constant("A", 0.9), constant("B", 0.3)]);
        let configs: Vec<ModelConfig> = ["A", "B", "Ghost"]
            .iter()
            .map(|name| ModelConfig { name: name.to_string(), family: ModelFamily::Prior })
            .collect();
        let tracker = Recorder::default();

        let run = super::run(&cfg, &configs, "label", &models, &registry, &tracker).unwrap();
        assert_eq!(run.champion, "B");
        assert_eq!(run.failures[0].model, "Ghost");
        assert!(cfg.metrics_path.is_file() && cfg.leaderboard_path.is_file());
        assert_eq!(registry.load(RegistryStage::Production).unwrap().model_name, "B");
        assert_eq!(tracker.artifacts.borrow().as_slice(), ["champion_bundle"]);
    }

    #[test]
    fn failed_report_leaves_production_untouched() {
        let dir = tempdir().unwrap();
        let mut cfg = stage_cfg(dir.path());
        let registry = FsRegistry::new(&cfg.registry_dir);
        let configs = vec![ModelConfig { name: "A".into(), family: ModelFamily::Prior }];
        let models = MemModels(vec![constant("A", 0.9)]);
        // A directory where the metrics file should go makes the report write fail.
        cfg.metrics_path = dir.path().join("occupied");
        std::fs::create_dir_all(&cfg.metrics_path).unwrap();

        let tracker = Recorder::default();
        assert!(super::run(&cfg, &configs, "label", &models, &registry, &tracker).is_err());
        let err = registry.load(RegistryStage::Production).unwrap_err();
        assert!(matches!(err, CsatError::ModelMissing(_)));
        assert!(tracker.artifacts.borrow().is_empty());
        assert_eq!(registry.versions().unwrap().len(), 1);
    }
}
