//! Error handling primitives shared across the core.
//!
//! Every fallible operation returns [`CsatResult`]. Variants map onto a stable
//! [`ErrorCode`] so the CLI and status markers can report a machine readable
//! code next to the message.

use polars::prelude::PolarsError;

/// Stable error codes surfaced in status markers and process exit codes.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    /// Success code used as a sentinel.
    Ok = 0,
    /// Missing or malformed configuration, path or hyperparameter.
    Config = 1,
    /// A raw table failed its declared schema.
    SchemaViolation = 2,
    /// Requested model artefact or bundle was not available.
    ModelMissing = 3,
    /// Caller supplied input failed validation.
    InvalidInput = 4,
    /// Catch-all for bugs and unrecoverable pipeline conditions.
    Internal = 5,
    /// Filesystem failure.
    Io = 6,
    /// Dataframe engine or serialisation failure.
    Data = 7,
    /// Network transfer or archive failure during ingestion.
    Transport = 8,
}

/// Canonical error type for the core.
#[derive(Debug, thiserror::Error)]
pub enum CsatError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("schema violation in '{table}': {detail}")]
    SchemaViolation { table: String, detail: String },
    #[error("model artefact missing: {0}")]
    ModelMissing(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Internal(String),
    #[error("{family} failed to fit: {detail}")]
    Fit { family: &'static str, detail: String },
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<CsatError>,
    },
    #[error("http transfer failed: {0}")]
    Http(String),
    #[error("archive error: {0}")]
    Archive(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// Result alias used throughout the crate.
pub type CsatResult<T> = Result<T, CsatError>;

impl CsatError {
    /// Configuration helper.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Validation helper for caller supplied input.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Model missing helper.
    pub fn model_missing(msg: impl Into<String>) -> Self {
        Self::ModelMissing(msg.into())
    }

    /// Internal error helper.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// A learning backend rejected the training data or its parameters.
    pub fn fit(family: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Fit {
            family,
            detail: err.to_string(),
        }
    }

    /// Wrap an error escaping a pipeline stage.
    pub fn stage(stage: &'static str, source: CsatError) -> Self {
        Self::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// Machine readable code; stage wrappers report the code of their cause.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) | Self::Toml(_) => ErrorCode::Config,
            Self::SchemaViolation { .. } => ErrorCode::SchemaViolation,
            Self::ModelMissing(_) => ErrorCode::ModelMissing,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Internal(_) | Self::Fit { .. } => ErrorCode::Internal,
            Self::Stage { source, .. } => source.code(),
            Self::Http(_) | Self::Archive(_) => ErrorCode::Transport,
            Self::Io(_) => ErrorCode::Io,
            Self::Polars(_) | Self::Json(_) => ErrorCode::Data,
        }
    }
}
