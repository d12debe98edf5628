//! Data domain: ingestion of the raw export, schema validation and the merge.

pub mod domain;
pub mod ingest;
pub mod merge;
pub mod repo_fs;
pub mod service;
pub mod validate;

pub use domain::{DataRepo, HealthReport, Schema, TableKind, ValidationOutcome};
pub use repo_fs::FsDataRepo;
