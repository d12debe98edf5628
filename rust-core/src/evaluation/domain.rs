//! Evaluation domain: metric records, candidate lifecycle and the registry contract.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::error::{CsatError, CsatResult};
use crate::inference::domain::ChampionBundle;
use crate::training::domain::{SATISFIED, UNSATISFIED};

/// A row is predicted unsatisfied when `p_unsatisfied >= DECISION_THRESHOLD`.
pub const DECISION_THRESHOLD: f64 = 0.4;

/// Composite weight of the unsatisfied-class F1.
pub const WEIGHT_F1_UNSATISFIED: f64 = 0.5;
/// Composite weight of the unsatisfied-class recall.
pub const WEIGHT_RECALL_UNSATISFIED: f64 = 0.3;
/// Composite weight of plain accuracy.
pub const WEIGHT_ACCURACY: f64 = 0.2;

/// Thresholded label for one unsatisfied-class probability.
pub fn label_for(p_unsatisfied: f64) -> usize {
    if p_unsatisfied >= DECISION_THRESHOLD {
        UNSATISFIED
    } else {
        SATISFIED
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Scores of one candidate on the test partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub unsatisfied: ClassMetrics,
    pub satisfied: ClassMetrics,
    /// `None` when the test partition holds a single class.
    pub roc_auc: Option<f64>,
    /// Counts indexed `[actual][predicted]`.
    pub confusion: [[usize; 2]; 2],
    pub composite: f64,
}

/// Lifecycle of a candidate within one evaluation run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    Trained,
    Evaluated,
    Champion,
    Archived,
}

impl CandidateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateState::Trained => "trained",
            CandidateState::Evaluated => "evaluated",
            CandidateState::Champion => "champion",
            CandidateState::Archived => "archived",
        }
    }

    /// Move to `next`, rejecting anything but `trained -> evaluated -> champion|archived`.
    pub fn advance(self, next: CandidateState) -> CsatResult<CandidateState> {
        use CandidateState::*;
        match (self, next) {
            (Trained, Evaluated) | (Evaluated, Champion) | (Evaluated, Archived) => Ok(next),
            (from, to) => Err(CsatError::internal(format!(
                "illegal candidate transition {} -> {}",
                from.as_str(),
                to.as_str()
            ))),
        }
    }
}

/// One evaluated candidate, ranked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub model: String,
    pub family: String,
    pub state: CandidateState,
    pub metrics: Metrics,
}

/// A candidate excluded from the leaderboard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub model: String,
    pub reason: String,
}

/// Outcome of one evaluation run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub decision_threshold: f64,
    /// Sorted by composite descending, then name ascending.
    pub leaderboard: Vec<LeaderboardEntry>,
    pub failures: Vec<CandidateFailure>,
    pub champion: String,
    pub version: VersionId,
    pub tag: String,
}

impl EvaluationRun {
    pub fn champion_entry(&self) -> Option<&LeaderboardEntry> {
        self.leaderboard
            .iter()
            .find(|entry| entry.state == CandidateState::Champion)
    }
}

/// Sequential registry version number.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Registry stage of a bundle version.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryStage {
    /// Registered but never served.
    Registered,
    Production,
    Archived,
}

/// Append-only registry log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    Registered {
        version: VersionId,
        tag: String,
        at: String,
    },
    Promoted {
        version: VersionId,
        archived: Option<VersionId>,
        at: String,
    },
}

/// Current view of one version, replayed from the event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: VersionId,
    pub tag: String,
    pub stage: RegistryStage,
}

/// Versioned store of champion bundles with a single production pointer.
pub trait ModelRegistry {
    fn register(&self, bundle: &ChampionBundle, tag: &str) -> CsatResult<VersionId>;
    /// Only [`RegistryStage::Production`] can be promoted to; the previous holder is archived.
    fn promote(&self, version: VersionId, stage: RegistryStage) -> CsatResult<()>;
    fn load(&self, stage: RegistryStage) -> CsatResult<ChampionBundle>;
    fn versions(&self) -> CsatResult<Vec<VersionRecord>>;
}

/// Write-only sink for run metrics and artefact locations.
pub trait RunTracker {
    fn record_metric(&self, model: &str, name: &str, value: f64);
    fn record_artifact(&self, name: &str, location: &str);
}
