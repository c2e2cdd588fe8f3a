use std::fmt;

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in the working CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    /// A box whose coordinates are all NaN. Used for input rows that could
    /// not be read, so they fail validation instead of vanishing.
    pub fn invalid() -> Self {
        Self::new(f64::NAN, f64::NAN, f64::NAN, f64::NAN)
    }

    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// True when no coordinate is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        [self.minx, self.miny, self.maxx, self.maxy]
            .iter()
            .all(|v| v.is_finite())
    }

    /// True unless `maxx > minx` and `maxy > miny`.
    pub fn is_degenerate(&self) -> bool {
        !(self.maxx > self.minx && self.maxy > self.miny)
    }

    /// Comma-separated `minx,miny,maxx,maxy`, the form OGC services expect.
    pub fn to_query_value(&self) -> String {
        format!("{},{},{},{}", self.minx, self.miny, self.maxx, self.maxy)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.minx, self.miny, self.maxx, self.maxy
        )
    }
}

/// Why an input row could not be turned into a usable record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordDefect {
    /// The `index` cell did not parse as a non-negative integer.
    UnparseableIndex(String),
    /// The row itself could not be read.
    UnreadableRow(String),
}

/// One polygon from the input source, reduced to its bounding box.
///
/// `index` is the polygon's row identity in the source and is stable across
/// re-reads, which is what makes resume work. A record with a `defect` keeps
/// its place in the batch but fails validation; its `index` is then the
/// 0-based row number and never names an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonRecord {
    pub index: u64,
    pub bbox: BoundingBox,
    pub defect: Option<RecordDefect>,
}

impl PolygonRecord {
    pub fn new(index: u64, bbox: BoundingBox) -> Self {
        Self {
            index,
            bbox,
            defect: None,
        }
    }

    /// A row that cannot be fetched.
    pub fn defective(row: u64, bbox: BoundingBox, defect: RecordDefect) -> Self {
        Self {
            index: row,
            bbox,
            defect: Some(defect),
        }
    }
}
