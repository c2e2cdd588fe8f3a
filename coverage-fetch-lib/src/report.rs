//! The failure report written at the end of a batch.

use std::fs;
use std::path::{Path, PathBuf};

use coverage_fetch_core::FailureRecord;
use thiserror::Error;

/// File name of the failure report inside the output directory.
pub const FAILURE_REPORT_NAME: &str = "failed_polygons.csv";

pub fn report_path(output_dir: &Path) -> PathBuf {
    output_dir.join(FAILURE_REPORT_NAME)
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error writing {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl ReportError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What happened to the report at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    Written { path: PathBuf, rows: usize },
    /// No failures this run; a report left by an earlier run was removed.
    Cleared { path: PathBuf },
    /// No failures and no earlier report.
    NotNeeded,
    /// The report could not be written. The batch itself still finished.
    Unwritten { path: PathBuf, error: String },
}

/// Failure records collected during a batch.
#[derive(Debug, Default, Clone)]
pub struct FailureLog {
    records: Vec<FailureRecord>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: FailureRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<FailureRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the report into `output_dir`, replacing any earlier one.
    ///
    /// Rows are sorted by polygon index. With no records nothing is
    /// written, and a stale report from an earlier run is removed.
    pub fn write_to_dir(&self, output_dir: &Path) -> Result<ReportStatus, ReportError> {
        let path = report_path(output_dir);

        if self.records.is_empty() {
            return match fs::remove_file(&path) {
                Ok(()) => {
                    log::warn!("Removed failure report from an earlier run: {}", path.display());
                    Ok(ReportStatus::Cleared { path })
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ReportStatus::NotNeeded),
                Err(e) => Err(ReportError::io(&path, e)),
            };
        }

        let mut rows: Vec<&FailureRecord> = self.records.iter().collect();
        rows.sort_by_key(|r| r.index);

        let tmp = path.with_extension("csv.tmp");
        let result = (|| {
            let mut writer = csv::Writer::from_path(&tmp).map_err(|e| ReportError::csv(&tmp, e))?;
            for row in &rows {
                writer.serialize(row).map_err(|e| ReportError::csv(&tmp, e))?;
            }
            writer.flush().map_err(|e| ReportError::io(&tmp, e))?;
            drop(writer);
            fs::rename(&tmp, &path).map_err(|e| ReportError::io(&path, e))
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        log::info!("Wrote {} failure(s) to {}", rows.len(), path.display());
        Ok(ReportStatus::Written {
            path,
            rows: rows.len(),
        })
    }
}

#[cfg(test)]
#[path = "tests/report_tests.rs"]
mod tests;
