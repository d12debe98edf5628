//! Evaluation: thresholded metrics, champion selection and the model registry.

pub mod domain;
pub mod metrics;
pub mod repo_fs;
pub mod service;
pub mod tracking;

pub use domain::{EvaluationRun, Metrics, ModelRegistry, RegistryStage, RunTracker, VersionId};
pub use repo_fs::FsRegistry;
pub use tracking::TracingTracker;
