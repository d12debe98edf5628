//! Filesystem-backed repository for raw tables and validation artefacts.

use std::path::{Path, PathBuf};

use polars::prelude::DataFrame;

use crate::common::config::ValidationCfg;
use crate::common::error::CsatResult;
use crate::common::frame::{read_csv, write_parquet};
use crate::common::fs::{save_json, write_status};

use super::domain::{DataRepo, HealthReport};

pub const STATUS_LABEL: &str = "validation_status";

/// Reads raw CSVs from the extracted archive and writes merged output.
pub struct FsDataRepo {
    raw_dir: PathBuf,
    merged_path: PathBuf,
    report_path: PathBuf,
    status_path: PathBuf,
}

impl FsDataRepo {
    pub fn new(raw_dir: &Path, cfg: &ValidationCfg) -> Self {
        Self {
            raw_dir: raw_dir.to_path_buf(),
            merged_path: cfg.merged_path.clone(),
            report_path: cfg.report_path.clone(),
            status_path: cfg.status_path.clone(),
        }
    }

    pub fn table_path(&self, file: &str) -> PathBuf {
        self.raw_dir.join(file)
    }
}

impl DataRepo for FsDataRepo {
    fn load_table(&self, file: &str) -> CsatResult<Option<DataFrame>> {
        let path = self.table_path(file);
        if !path.is_file() {
            return Ok(None);
        }
        read_csv(&path).map(Some)
    }

    fn save_merged(&self, merged: &mut DataFrame) -> CsatResult<()> {
        write_parquet(merged, &self.merged_path)
    }

    fn save_report(&self, report: &HealthReport) -> CsatResult<()> {
        save_json(&self.report_path, report)
    }

    fn save_status(&self, ok: bool, detail: Option<&str>) -> CsatResult<()> {
        write_status(&self.status_path, STATUS_LABEL, ok, detail)
    }
}
