//! Pipeline orchestration over the six stages.

pub mod domain;
pub mod service;

pub use domain::Stage;
pub use service::{run_pipeline, run_single, run_stage};
