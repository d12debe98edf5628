//! Filesystem helpers: directory bootstrap, JSON artefacts, status markers.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::common::error::{CsatError, CsatResult};

/// Create `dir` and its parents; existing directories are fine.
pub fn create_dir(dir: &Path) -> CsatResult<()> {
    fs::create_dir_all(dir)?;
    debug!(dir = %dir.display(), "directory ready");
    Ok(())
}

/// Create the parent directory of a file path.
pub fn ensure_parent(path: &Path) -> CsatResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => create_dir(parent),
        _ => Ok(()),
    }
}

/// Pretty-print `value` as JSON at `path`, creating parent directories.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> CsatResult<()> {
    ensure_parent(path)?;
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(path, body)?;
    info!(path = %path.display(), "json artefact saved");
    Ok(())
}

/// Load a JSON artefact; a missing file is reported as a missing artefact.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> CsatResult<T> {
    if !path.exists() {
        return Err(CsatError::model_missing(format!(
            "artefact not found at {}",
            path.display()
        )));
    }
    let body = fs::read(path)?;
    Ok(serde_json::from_slice(&body)?)
}

/// Human readable file size, rounded to kilobytes.
pub fn size_kb(path: &Path) -> String {
    match fs::metadata(path) {
        Ok(meta) => format!("~ {} KB", (meta.len() as f64 / 1024.0).round() as u64),
        Err(_) => "unknown size".to_string(),
    }
}

/// Persist a plain-text status marker an operator can read without rerunning.
pub fn write_status(path: &Path, label: &str, ok: bool, detail: Option<&str>) -> CsatResult<()> {
    ensure_parent(path)?;
    let flag = if ok { "True" } else { "False" };
    let body = match detail {
        Some(detail) => format!("{label}: {flag}\n{detail}\n"),
        None => format!("{label}: {flag}\n"),
    };
    fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn json_roundtrip_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/report.json");
        let mut value = BTreeMap::new();
        value.insert("rows".to_string(), 12u64);
        save_json(&path, &value).unwrap();
        let loaded: BTreeMap<String, u64> = load_json(&path).unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn missing_json_is_model_missing() {
        let dir = tempdir().unwrap();
        let err = load_json::<u32>(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CsatError::ModelMissing(_)));
    }

    #[test]
    fn status_marker_records_flag_and_detail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.txt");
        write_status(&path, "validation_status", false, Some("orders: missing column")).unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert_eq!(body, "validation_status: False\norders: missing column\n");
    }
}
