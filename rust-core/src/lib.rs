//! Customer-satisfaction pipeline core.
//!
//! Six sequential stages turn the raw marketplace export into a promoted
//! champion bundle: ingestion, validation and merge, feature engineering,
//! feature transformation, model training, and evaluation with promotion.
//! Each stage reads the previous stage's persisted artefact.

pub mod common;
pub mod data;
pub mod evaluation;
pub mod features;
pub mod inference;
pub mod pipeline;
pub mod training;

pub use common::{CsatError, CsatResult, ErrorCode};
pub use inference::{ChampionBundle, Prediction, Predictor, RawRecord, SatisfactionLabel};
