//! Inference: the champion bundle and the serving-side predictor.

pub mod domain;
pub mod service;

pub use domain::{ChampionBundle, Prediction, RawRecord, ReloadPolicy, SatisfactionLabel};
pub use service::Predictor;
