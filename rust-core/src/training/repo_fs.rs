//! Filesystem repository for trained model artefacts, one JSON file per candidate.

use std::path::{Path, PathBuf};

use crate::common::error::{CsatError, CsatResult};
use crate::common::fs::{load_json, save_json};

use super::domain::{ModelArtifact, ModelRepo};

/// Stores `<model_dir>/<name>.json`.
pub struct FsModelRepo {
    root: PathBuf,
}

impl FsModelRepo {
    pub fn new(model_dir: &Path) -> Self {
        Self {
            root: model_dir.to_path_buf(),
        }
    }

    fn artefact_path(&self, name: &str) -> CsatResult<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
            && !name.starts_with('.');
        if !valid {
            return Err(CsatError::config(format!(
                "model name '{name}' cannot be used as a file name"
            )));
        }
        Ok(self.root.join(format!("{name}.json")))
    }
}

impl ModelRepo for FsModelRepo {
    fn put_model(&self, artifact: &ModelArtifact) -> CsatResult<()> {
        save_json(&self.artefact_path(artifact.name())?, artifact)
    }

    fn get_model(&self, name: &str) -> CsatResult<ModelArtifact> {
        let artifact: ModelArtifact = load_json(&self.artefact_path(name)?)?;
        if artifact.name() != name {
            return Err(CsatError::internal(format!(
                "artefact for '{name}' is labelled '{}'",
                artifact.name()
            )));
        }
        Ok(artifact)
    }
}
