//! Stage 1: fetch the compressed export and unpack it into the raw directory.
//!
//! Remote locators go through a shared `ureq` agent with bounded timeouts and a
//! hard size cap. `file://` locators and plain paths are copied, which keeps
//! offline runs and tests off the network.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use tracing::info;

use crate::common::config::IngestionCfg;
use crate::common::error::{CsatError, CsatResult};
use crate::common::fs::{create_dir, ensure_parent, size_kb};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ZIP_ENTRIES: usize = 1_000;

fn agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build()
    })
}

/// Download (or copy) the archive and extract it, returning the raw directory.
pub fn fetch_and_extract(cfg: &IngestionCfg) -> CsatResult<PathBuf> {
    ensure_parent(&cfg.local_archive)?;
    create_dir(&cfg.unzip_dir)?;

    let locator = direct_download_url(&cfg.source_url);
    match local_source(&locator) {
        Some(source) => {
            fs::copy(&source, &cfg.local_archive).map_err(|err| {
                io::Error::new(err.kind(), format!("cannot read {}: {err}", source.display()))
            })?;
        }
        None => download_to_file(&locator, &cfg.local_archive, cfg.max_download_bytes)?,
    }
    info!(
        archive = %cfg.local_archive.display(),
        size = %size_kb(&cfg.local_archive),
        "archive fetched"
    );

    let extracted = unzip_to_dir(&cfg.local_archive, &cfg.unzip_dir)?;
    info!(files = extracted, dir = %cfg.unzip_dir.display(), "archive extracted");
    Ok(cfg.unzip_dir.clone())
}

/// Rewrite a Drive share link (`/file/d/<id>/view`) to its direct download form.
pub fn direct_download_url(url: &str) -> String {
    const PREFIX: &str = "https://drive.google.com/file/d/";
    match url.strip_prefix(PREFIX) {
        Some(rest) => {
            let id = rest.split('/').next().unwrap_or(rest);
            format!("https://drive.google.com/uc?export=download&id={id}")
        }
        None => url.to_string(),
    }
}

fn local_source(locator: &str) -> Option<PathBuf> {
    if let Some(path) = locator.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if locator.starts_with("http://") || locator.starts_with("https://") {
        return None;
    }
    Some(PathBuf::from(locator))
}

fn download_to_file(url: &str, dest: &Path, max_bytes: u64) -> CsatResult<()> {
    let response = agent()
        .get(url)
        .set("User-Agent", "csat-pipeline")
        .call()
        .map_err(|err| CsatError::Http(err.to_string()))?;
    if let Some(length) = response
        .header("Content-Length")
        .and_then(|value| value.parse::<u64>().ok())
    {
        if length > max_bytes {
            return Err(CsatError::Http(format!("response too large: {length} bytes")));
        }
    }
    let mut file = File::create(dest)?;
    copy_limited(response.into_reader(), &mut file, max_bytes)
}

fn copy_limited(reader: impl Read, writer: &mut impl Write, max_bytes: u64) -> CsatResult<()> {
    let mut limited = reader.take(max_bytes + 1);
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let read = limited
            .read(&mut buf)
            .map_err(|err| CsatError::Http(err.to_string()))?;
        if read == 0 {
            break;
        }
        total += read as u64;
        if total > max_bytes {
            return Err(CsatError::Http(format!("response exceeded {max_bytes} bytes")));
        }
        writer.write_all(&buf[..read])?;
    }
    Ok(())
}

/// Extract every file entry under `dest_dir`; returns the number of files written.
pub fn unzip_to_dir(zip_path: &Path, dest_dir: &Path) -> CsatResult<usize> {
    let file = File::open(zip_path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|err| CsatError::Archive(err.to_string()))?;
    if archive.len() > MAX_ZIP_ENTRIES {
        return Err(CsatError::Archive(format!(
            "archive has {} entries, limit is {MAX_ZIP_ENTRIES}",
            archive.len()
        )));
    }
    let mut written = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| CsatError::Archive(err.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(CsatError::Archive(format!(
                "entry '{}' escapes the extraction directory",
                entry.name()
            )));
        };
        let outpath = dest_dir.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }
        ensure_parent(&outpath)?;
        let mut outfile = File::create(&outpath)?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| CsatError::Archive(format!("{}: {err}", entry.name())))?;
        written += 1;
    }
    Ok(written)
}
