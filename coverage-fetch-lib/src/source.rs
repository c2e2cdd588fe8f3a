//! Where polygon bounding boxes come from.
//!
//! Geometry loading and reprojection happen elsewhere; a batch only needs a
//! sequence of indexed boxes already in the service's CRS.

use std::path::{Path, PathBuf};

use coverage_fetch_core::{BoundingBox, PolygonRecord, RecordDefect};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Input not found: {0}")]
    NotFound(PathBuf),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Input is missing required column '{0}'")]
    MissingColumn(String),
}

pub type RecordIter = Box<dyn Iterator<Item = PolygonRecord> + Send>;

/// A source of polygon records.
pub trait PolygonSource: Send + Sync {
    /// A fresh, lazy pass over every record.
    fn records(&self) -> Result<RecordIter, SourceError>;

    /// Number of records, if known up front.
    fn len_hint(&self) -> Option<u64> {
        None
    }
}

/// Column positions within a bounds CSV.
#[derive(Debug, Clone, Copy)]
struct Columns {
    index: Option<usize>,
    minx: usize,
    miny: usize,
    maxx: usize,
    maxy: usize,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Result<Self, SourceError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let require = |name: &str| find(name).ok_or_else(|| SourceError::MissingColumn(name.to_string()));
        Ok(Self {
            index: find("index"),
            minx: require("minx")?,
            miny: require("miny")?,
            maxx: require("maxx")?,
            maxy: require("maxy")?,
        })
    }

    fn parse(&self, row: usize, record: &csv::StringRecord) -> PolygonRecord {
        let coord = |col: usize| {
            record
                .get(col)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .unwrap_or(f64::NAN)
        };
        let bbox = BoundingBox::new(coord(self.minx), coord(self.miny), coord(self.maxx), coord(self.maxy));
        let row = row as u64;
        match self.index.and_then(|col| record.get(col)) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(index) => PolygonRecord::new(index, bbox),
                Err(_) => {
                    log::warn!("Row {}: unparseable index '{}'", row, raw);
                    PolygonRecord::defective(row, bbox, RecordDefect::UnparseableIndex(raw.to_string()))
                }
            },
            None if self.index.is_some() => PolygonRecord::defective(
                row,
                bbox,
                RecordDefect::UnparseableIndex(String::new()),
            ),
            None => PolygonRecord::new(row, bbox),
        }
    }
}

/// Pre-computed bounds in a CSV file with a header row.
///
/// Required columns are `minx`, `miny`, `maxx` and `maxy` (case-insensitive).
/// An `index` column is optional and defaults to the 0-based row number.
/// Coordinates that do not parse become NaN and an index that does not
/// parse marks the record defective, so the row fails validation on its
/// own instead of disappearing from the batch or taking another row's
/// artifact.
#[derive(Debug, Clone)]
pub struct CsvBoundsSource {
    path: PathBuf,
    columns: Columns,
    rows: u64,
}

impl CsvBoundsSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(SourceError::NotFound(path));
        }
        let mut reader = Self::reader(&path)?;
        let columns = Columns::locate(reader.headers()?)?;
        let rows = reader.records().count() as u64;
        log::debug!("{}: {} rows", path.display(), rows);
        Ok(Self {
            path,
            columns,
            rows,
        })
    }

    fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>, SourceError> {
        let file = std::fs::File::open(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file))
    }
}

impl PolygonSource for CsvBoundsSource {
    fn records(&self) -> Result<RecordIter, SourceError> {
        let reader = Self::reader(&self.path)?;
        let columns = self.columns;
        let iter = reader
            .into_records()
            .enumerate()
            .map(move |(row, result)| match result {
                Ok(record) => columns.parse(row, &record),
                Err(e) => {
                    log::warn!("Row {}: unreadable ({})", row, e);
                    PolygonRecord::defective(
                        row as u64,
                        BoundingBox::invalid(),
                        RecordDefect::UnreadableRow(e.to_string()),
                    )
                }
            });
        Ok(Box::new(iter))
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.rows)
    }
}

/// Records held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    records: Vec<PolygonRecord>,
}

impl VecSource {
    pub fn new(records: Vec<PolygonRecord>) -> Self {
        Self { records }
    }

    /// Records indexed by position.
    pub fn from_boxes(boxes: impl IntoIterator<Item = BoundingBox>) -> Self {
        Self::new(
            boxes
                .into_iter()
                .enumerate()
                .map(|(i, bbox)| PolygonRecord::new(i as u64, bbox))
                .collect(),
        )
    }
}

impl PolygonSource for VecSource {
    fn records(&self) -> Result<RecordIter, SourceError> {
        Ok(Box::new(self.records.clone().into_iter()))
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.records.len() as u64)
    }
}
