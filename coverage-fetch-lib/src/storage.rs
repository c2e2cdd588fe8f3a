//! Atomic artifact writes.
//!
//! Artifacts are written to `<name>.part` and renamed into place once fully
//! flushed, so an interrupted write never leaves a file that a later run
//! would mistake for a finished artifact.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use coverage_fetch_core::is_artifact_file_name;

const PARTIAL_SUFFIX: &str = ".part";

/// Temporary path an artifact is written to before the final rename.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Write `bytes` to `path` through a temporary file. Returns the number of
/// bytes written.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<u64> {
    let tmp = partial_path(path);
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(bytes.len() as u64)
}

/// Delete partial artifacts left behind in `dir` by an interrupted run.
///
/// Only `.part` files named after an artifact are touched; anything else
/// in the directory is left alone.
pub fn remove_partials(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_partial = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(PARTIAL_SUFFIX))
            .is_some_and(is_artifact_file_name);
        if is_partial && entry.file_type()?.is_file() {
            fs::remove_file(&path)?;
            log::debug!("Removed leftover partial file {}", path.display());
            removed += 1;
        }
    }
    Ok(removed)
}
