//! Runtime configuration loaded once from `pipeline.toml`.
//!
//! Every stage gets its own section. The document is validated eagerly at
//! load time so a missing key or an out-of-range hyperparameter fails before
//! any stage runs.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::error::{CsatError, CsatResult};
use crate::features::domain::FeatureGroups;
use crate::inference::domain::ReloadPolicy;
use crate::training::domain::ModelConfig;

/// Configuration document version understood by this build.
pub const CONFIG_VERSION: u32 = 1;

/// Snapshot of configuration values consumed by the core.
#[derive(Clone, Debug, Deserialize)]
pub struct AppCfg {
    pub version: u32,
    pub artifacts_root: PathBuf,
    /// Name of the binary label column written by feature engineering.
    #[serde(default = "default_target_column")]
    pub target_column: String,
    pub ingestion: IngestionCfg,
    pub validation: ValidationCfg,
    pub features: FeatureCfg,
    pub transformation: TransformationCfg,
    pub training: TrainingCfg,
    pub evaluation: EvaluationCfg,
    #[serde(default)]
    pub serving: ServingCfg,
    #[serde(default)]
    pub logging: LoggingCfg,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IngestionCfg {
    pub source_url: String,
    pub local_archive: PathBuf,
    pub unzip_dir: PathBuf,
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ValidationCfg {
    pub raw_dir: PathBuf,
    pub schema_path: PathBuf,
    pub merged_path: PathBuf,
    pub report_path: PathBuf,
    pub status_path: PathBuf,
    #[serde(default = "default_review_placeholder")]
    pub review_placeholder: String,
    /// Rows with a null in any of these merged columns are dropped.
    #[serde(default = "default_critical_merged_columns")]
    pub critical_merged_columns: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FeatureCfg {
    pub merged_path: PathBuf,
    pub feature_path: PathBuf,
    #[serde(default = "default_satisfied_threshold")]
    pub satisfied_threshold: i64,
    /// Upper bounds of the `cheap` and `affordable` price tiers.
    #[serde(default = "default_price_tiers")]
    pub price_tiers: [f64; 2],
    #[serde(default)]
    pub extra_drop_columns: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TransformationCfg {
    pub feature_path: PathBuf,
    pub encoder_path: PathBuf,
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    pub test_fraction: f64,
    pub seed: u64,
    #[serde(default)]
    pub groups: FeatureGroups,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TrainingCfg {
    pub train_path: PathBuf,
    pub encoder_path: PathBuf,
    pub model_dir: PathBuf,
    pub models: Vec<ModelConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EvaluationCfg {
    pub test_path: PathBuf,
    pub encoder_path: PathBuf,
    pub model_dir: PathBuf,
    pub metrics_path: PathBuf,
    pub leaderboard_path: PathBuf,
    pub registry_dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServingCfg {
    #[serde(default = "default_registry_dir")]
    pub registry_dir: PathBuf,
    #[serde(default)]
    pub reload: ReloadPolicy,
}

impl Default for ServingCfg {
    fn default() -> Self {
        Self {
            registry_dir: default_registry_dir(),
            reload: ReloadPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingCfg {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingCfg {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppCfg {
    /// Read, parse and validate the configuration document at `path`.
    pub fn load(path: &Path) -> CsatResult<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            CsatError::config(format!("cannot read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate an in-memory configuration document.
    pub fn from_toml_str(raw: &str) -> CsatResult<Self> {
        let cfg: AppCfg = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject documents that would only fail once a stage starts.
    pub fn validate(&self) -> CsatResult<()> {
        if self.version != CONFIG_VERSION {
            return Err(CsatError::config(format!(
                "unsupported config version {} (expected {CONFIG_VERSION})",
                self.version
            )));
        }
        if self.target_column.trim().is_empty() {
            return Err(CsatError::config("target_column must not be empty"));
        }
        if self.ingestion.source_url.trim().is_empty() {
            return Err(CsatError::config("ingestion.source_url must not be empty"));
        }

        let fraction = self.transformation.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(CsatError::config(format!(
                "transformation.test_fraction must be in (0, 1), got {fraction}"
            )));
        }

        let [cheap, affordable] = self.features.price_tiers;
        if !(cheap < affordable) {
            return Err(CsatError::config(format!(
                "features.price_tiers must be ascending, got [{cheap}, {affordable}]"
            )));
        }

        if self.training.models.is_empty() {
            return Err(CsatError::config("training.models must declare at least one model"));
        }
        let mut seen = BTreeSet::new();
        for model in &self.training.models {
            if model.name.trim().is_empty() {
                return Err(CsatError::config("training.models entry with empty name"));
            }
            if !seen.insert(model.name.as_str()) {
                return Err(CsatError::config(format!(
                    "duplicate model name '{}' in training.models",
                    model.name
                )));
            }
            model.family.validate(&model.name)?;
        }

        self.transformation.groups.validate()?;
        Ok(())
    }
}

fn default_target_column() -> String {
    "label".to_string()
}

fn default_max_download_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_review_placeholder() -> String {
    "no_review".to_string()
}

fn default_critical_merged_columns() -> Vec<String> {
    [
        "order_id",
        "customer_id",
        "total_price",
        "total_freight",
        "order_purchase_timestamp",
        "order_delivered_customer_date",
        "review_score",
    ]
    .iter()
    .map(|name| name.to_string())
    .collect()
}

fn default_satisfied_threshold() -> i64 {
    4
}

fn default_price_tiers() -> [f64; 2] {
    [50.0, 150.0]
}

fn default_registry_dir() -> PathBuf {
    PathBuf::from("artifacts/registry")
}

fn default_log_level() -> String {
    "info".to_string()
}
