//! Feature domain: engineering, the stratified split and the fitted encoder.

pub mod domain;
pub mod encoder;
pub mod engineer;
pub mod service;
pub mod split;

pub use domain::{FeatureGroups, SplitDataset};
pub use encoder::FittedEncoder;
