//! Model training: candidate families, fitting and artefact persistence.

pub mod domain;
pub mod models;
pub mod repo_fs;
pub mod service;

pub use domain::{Classifier, ModelArtifact, ModelConfig, ModelFamily, TrainedModel, TrainingRun};
pub use repo_fs::FsModelRepo;
