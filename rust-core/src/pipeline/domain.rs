//! Pipeline stages in execution order.

use std::fmt;
use std::str::FromStr;

use crate::common::error::CsatError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Stage {
    Ingestion,
    Validation,
    FeatureEngineering,
    FeatureTransformation,
    Training,
    Evaluation,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Ingestion,
        Stage::Validation,
        Stage::FeatureEngineering,
        Stage::FeatureTransformation,
        Stage::Training,
        Stage::Evaluation,
    ];

    /// Human readable name used in logs and status markers.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Ingestion => "Data Ingestion",
            Stage::Validation => "Data Validation",
            Stage::FeatureEngineering => "Feature Engineering",
            Stage::FeatureTransformation => "Feature Transformation",
            Stage::Training => "Model Training",
            Stage::Evaluation => "Model Evaluation",
        }
    }

    /// Command-line spelling.
    pub fn slug(&self) -> &'static str {
        match self {
            Stage::Ingestion => "ingestion",
            Stage::Validation => "validation",
            Stage::FeatureEngineering => "features",
            Stage::FeatureTransformation => "transformation",
            Stage::Training => "training",
            Stage::Evaluation => "evaluation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = CsatError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.slug() == raw)
            .ok_or_else(|| {
                let known: Vec<&str> = Stage::ALL.iter().map(Stage::slug).collect();
                CsatError::config(format!("unknown stage '{raw}' (expected one of {})", known.join(", ")))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(stage.slug().parse::<Stage>().unwrap(), stage);
        }
        assert!("deploy".parse::<Stage>().is_err());
    }

    #[test]
    fn stages_run_in_declared_order() {
        let mut sorted = Stage::ALL;
        sorted.sort();
        assert_eq!(sorted, Stage::ALL);
    }
}
