//! Serving domain: the champion bundle and its raw-record prediction contract.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::Array2;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::error::{CsatError, CsatResult};
use crate::common::time;
use crate::evaluation::domain::DECISION_THRESHOLD;
use crate::features::encoder::FittedEncoder;
use crate::training::domain::{Classifier, ModelArtifact, TrainedModel, UNSATISFIED};

/// One raw feature record: field name to JSON value, untransformed.
pub type RawRecord = BTreeMap<String, Value>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SatisfactionLabel {
    Satisfied,
    Dissatisfied,
}

impl SatisfactionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SatisfactionLabel::Satisfied => "Satisfied",
            SatisfactionLabel::Dissatisfied => "Dissatisfied",
        }
    }
}

impl fmt::Display for SatisfactionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: SatisfactionLabel,
    /// Probability of `label`.
    pub probability: f64,
}

impl Prediction {
    fn from_unsatisfied(p_unsatisfied: f64, threshold: f64) -> Self {
        if p_unsatisfied >= threshold {
            Self {
                label: SatisfactionLabel::Dissatisfied,
                probability: p_unsatisfied,
            }
        } else {
            Self {
                label: SatisfactionLabel::Satisfied,
                probability: 1.0 - p_unsatisfied,
            }
        }
    }
}

/// When the serving side re-reads the production bundle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPolicy {
    /// Load once and keep serving that bundle.
    #[default]
    OnStart,
    /// Re-read the production pointer before every prediction.
    EveryRequest,
}

/// Encoder and champion classifier packaged as one unit over raw records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChampionBundle {
    pub model_name: String,
    pub family: String,
    pub encoder: FittedEncoder,
    pub model: TrainedModel,
    /// Exact field set `predict` accepts.
    pub feature_columns: Vec<String>,
    pub decision_threshold: f64,
    pub composite: f64,
    pub created_at: String,
}

impl ChampionBundle {
    pub fn new(encoder: FittedEncoder, artifact: &ModelArtifact, composite: f64) -> CsatResult<Self> {
        if artifact.model.n_features() != encoder.width() {
            return Err(CsatError::internal(format!(
                "model '{}' expects {} features but the encoder produces {}",
                artifact.name(),
                artifact.model.n_features(),
                encoder.width()
            )));
        }
        Ok(Self {
            model_name: artifact.name().to_string(),
            family: artifact.config.family.as_str().to_string(),
            feature_columns: encoder.input_columns(),
            encoder,
            model: artifact.model.clone(),
            decision_threshold: DECISION_THRESHOLD,
            composite,
            created_at: time::now().to_rfc3339(),
        })
    }

    fn unsatisfied_column(&self, x: &Array2<f64>) -> CsatResult<Vec<f64>> {
        let proba = self.model.predict_proba(x)?;
        Ok(proba.column(UNSATISFIED).to_vec())
    }

    /// Label one raw record; its fields must match `feature_columns` exactly.
    pub fn predict(&self, record: &RawRecord) -> CsatResult<Prediction> {
        let x = self.encoder.transform_record(record)?;
        let p = self.unsatisfied_column(&x)?;
        let p_unsatisfied = p
            .first()
            .copied()
            .ok_or_else(|| CsatError::internal("model returned no probabilities"))?;
        Ok(Prediction::from_unsatisfied(p_unsatisfied, self.decision_threshold))
    }

    /// Label every row of a raw frame.
    pub fn predict_frame(&self, df: &DataFrame) -> CsatResult<Vec<Prediction>> {
        let x = self.encoder.transform(df)?;
        Ok(self
            .unsatisfied_column(&x)?
            .into_iter()
            .map(|p| Prediction::from_unsatisfied(p, self.decision_threshold))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::domain::FeatureGroups;
    use crate::training::domain::{ModelConfig, ModelFamily};
    use polars::prelude::*;
    use serde_json::json;

    /// Small bundle whose champion is a prior model with `p_satisfied = 0.75`.
    pub(crate) fn bundle() -> ChampionBundle {
        let train = df!(
            "total_price" => &[10.0, 20.0, 30.0, 40.0],
            "payment_type" => &["boleto", "credit_card", "credit_card", "voucher"],
            "is_late_delivery" => &[0i32, 1, 0, 0],
            "label" => &[1i32, 0, 1, 1]
        )
        .unwrap();
        let groups = FeatureGroups {
            numeric: vec!["total_price".into()],
            categorical: vec!["payment_type".into()],
            passthrough: vec!["is_late_delivery".into()],
        };
        let encoder = FittedEncoder::fit(&train, &groups).unwrap();
        let x = encoder.transform(&train).unwrap();
        let config = ModelConfig {
            name: "Baseline".into(),
            family: ModelFamily::Prior,
        };
        let model = config.family.fit(&x, &[1, 0, 1, 1]).unwrap();
        let artifact = ModelArtifact {
            config,
            model,
            trained_at: "2024-01-01T00:00:00Z".into(),
        };
        ChampionBundle::new(encoder, &artifact, 0.5).unwrap()
    }

    pub(crate) fn record() -> RawRecord {
        [
            ("total_price".to_string(), json!(25.0)),
            ("payment_type".to_string(), json!("pix")),
            ("is_late_delivery".to_string(), json!(0)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn probability_belongs_to_the_returned_label() {
        let prediction = bundle().predict(&record()).unwrap();
        assert_eq!(prediction.label, SatisfactionLabel::Satisfied);
        assert!((prediction.probability - 0.75).abs() < 1e-12);
    }

    #[test]
    fn threshold_boundary_matches_evaluation() {
        let dissatisfied = Prediction::from_unsatisfied(0.41, DECISION_THRESHOLD);
        assert_eq!(dissatisfied.label, SatisfactionLabel::Dissatisfied);
        assert!((dissatisfied.probability - 0.41).abs() < 1e-12);
        let satisfied = Prediction::from_unsatisfied(0.39, DECISION_THRESHOLD);
        assert_eq!(satisfied.label, SatisfactionLabel::Satisfied);
    }

    #[test]
    fn record_with_missing_field_is_rejected() {
        let mut record = record();
        record.remove("payment_type");
        let err = bundle().predict(&record).unwrap_err();
        assert!(matches!(err, CsatError::InvalidInput(_)));
    }

    #[test]
    fn bundle_survives_json() {
        let bundle = bundle();
        let body = serde_json::to_string(&bundle).unwrap();
        let back: ChampionBundle = serde_json::from_str(&body).unwrap();
        assert_eq!(back.feature_columns, bundle.feature_columns);
        assert_eq!(back.predict(&record()).unwrap(), bundle.predict(&record()).unwrap());
    }

    #[test]
    fn labels_serialise_as_display_strings() {
        assert_eq!(serde_json::to_string(&SatisfactionLabel::Dissatisfied).unwrap(), "\"Dissatisfied\"");
    }
}
