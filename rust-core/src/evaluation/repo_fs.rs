//! Filesystem model registry.
//!
//! Layout under the registry root:
//!
//! ```text
//! versions/<n>/bundle.json   one immutable bundle per registered version
//! events.jsonl               append-only log of registrations and promotions
//! PRODUCTION                 number of the production version, swapped atomically
//! ```

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;

use crate::common::error::{CsatError, CsatResult};
use crate::common::fs::{create_dir, load_json, save_json};
use crate::common::time;
use crate::inference::domain::ChampionBundle;

use super::domain::{ModelRegistry, RegistryEvent, RegistryStage, VersionId, VersionRecord};

const EVENTS_FILE: &str = "events.jsonl";
const POINTER_FILE: &str = "PRODUCTION";

#[derive(Clone, Debug)]
pub struct FsRegistry {
    root: PathBuf,
}

impl FsRegistry {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn bundle_path(&self, version: VersionId) -> PathBuf {
        self.root
            .join("versions")
            .join(version.0.to_string())
            .join("bundle.json")
    }

    fn append(&self, event: &RegistryEvent) -> CsatResult<()> {
        create_dir(&self.root)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(EVENTS_FILE))?;
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    /// Every logged event, oldest first.
    pub fn events(&self) -> CsatResult<Vec<RegistryEvent>> {
        let path = self.root.join(EVENTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }

    /// Version the production pointer names, if any.
    pub fn production_version(&self) -> CsatResult<Option<VersionId>> {
        let path = self.root.join(POINTER_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        raw.trim()
            .parse::<u64>()
            .map(|n| Some(VersionId(n)))
            .map_err(|_| CsatError::internal(format!("corrupt production pointer '{}'", raw.trim())))
    }

    fn write_pointer(&self, version: VersionId) -> CsatResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        writeln!(tmp, "{}", version.0)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.root.join(POINTER_FILE))
            .map_err(|err| CsatError::Io(err.error))?;
        Ok(())
    }
}

impl ModelRegistry for FsRegistry {
    fn register(&self, bundle: &ChampionBundle, tag: &str) -> CsatResult<VersionId> {
        let next = self
            .versions()?
            .iter()
            .map(|record| record.id.0)
            .max()
            .map_or(1, |last| last + 1);
        let version = VersionId(next);
        save_json(&self.bundle_path(version), bundle)?;
        self.append(&RegistryEvent::Registered {
            version,
            tag: tag.to_string(),
            at: time::now().to_rfc3339(),
        })?;
        info!(%version, tag, "bundle registered");
        Ok(version)
    }

    fn promote(&self, version: VersionId, stage: RegistryStage) -> CsatResult<()> {
        if stage != RegistryStage::Production {
            return Err(CsatError::invalid(format!(
                "bundles can only be promoted to production, not {stage:?}"
            )));
        }
        if !self.bundle_path(version).is_file() {
            return Err(CsatError::model_missing(format!("registry has no version {version}")));
        }
        let previous = self.production_version()?;
        if previous == Some(version) {
            return Ok(());
        }
        self.write_pointer(version)?;
        self.append(&RegistryEvent::Promoted {
            version,
            archived: previous,
            at: time::now().to_rfc3339(),
        })?;
        info!(%version, archived = ?previous, "production pointer moved");
        Ok(())
    }

    fn load(&self, stage: RegistryStage) -> CsatResult<ChampionBundle> {
        if stage != RegistryStage::Production {
            return Err(CsatError::invalid(format!(
                "only the production bundle can be loaded, not {stage:?}"
            )));
        }
        let version = self
            .production_version()?
            .ok_or_else(|| CsatError::model_missing("no bundle has been promoted to production"))?;
        load_json(&self.bundle_path(version))
    }

    fn versions(&self) -> CsatResult<Vec<VersionRecord>> {
        let mut records: Vec<VersionRecord> = Vec::new();
        for event in self.events()? {
            match event {
                RegistryEvent::Registered { version, tag, .. } => records.push(VersionRecord {
                    id: version,
                    tag,
                    stage: RegistryStage::Registered,
                }),
                RegistryEvent::Promoted {
                    version, archived, ..
                } => {
                    for record in records.iter_mut() {
                        if record.id == version {
                            record.stage = RegistryStage::Production;
                        } else if Some(record.id) == archived {
                            record.stage = RegistryStage::Archived;
                        }
                    }
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::domain::tests::bundle;
    use tempfile::tempdir;

    #[test]
    fn empty_registry_has_no_production_bundle() {
        let dir = tempdir().unwrap();
        let registry = FsRegistry::new(dir.path());
        let err = registry.load(RegistryStage::Production).unwrap_err();
        assert!(matches!(err, CsatError::ModelMissing(_)));
        assert!(registry.versions().unwrap().is_empty());
    }

    #[test]
    fn promotion_archives_the_previous_holder() {
        let dir = tempdir().unwrap();
        let registry = FsRegistry::new(dir.path());
        let first = registry.register(&bundle(), "Baseline-1").unwrap();
        let second = registry.register(&bundle(), "Baseline-2").unwrap();
        assert_eq!((first, second), (VersionId(1), VersionId(2)));

        registry.promote(first, RegistryStage::Production).unwrap();
        registry.promote(second, RegistryStage::Production).unwrap();

        let stages: Vec<RegistryStage> = registry.versions().unwrap().iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec![RegistryStage::Archived, RegistryStage::Production]);
        assert_eq!(registry.production_version().unwrap(), Some(second));
        assert_eq!(registry.load(RegistryStage::Production).unwrap().model_name, "Baseline");
        assert_eq!(registry.events().unwrap().len(), 4);
    }

    #[test]
    fn unknown_version_cannot_be_promoted() {
        let dir = tempdir().unwrap();
        let registry = FsRegistry::new(dir.path());
        let err = registry.promote(VersionId(9), RegistryStage::Production).unwrap_err();
        assert!(matches!(err, CsatError::ModelMissing(_)));
    }

    #[test]
    fn only_production_is_a_promotion_target() {
        let dir = tempdir().unwrap();
        let registry = FsRegistry::new(dir.path());
        let version = registry.register(&bundle(), "t").unwrap();
        assert!(registry.promote(version, RegistryStage::Archived).is_err());
    }
}
