use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::bbox::BoundingBox;
use crate::error::{ErrorKind, FetchError};

/// Terminal result of processing one polygon.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Artifact fetched and written to its deterministic path.
    Completed {
        index: u64,
        path: PathBuf,
        bytes: u64,
    },
    /// Artifact already present from an earlier run; nothing fetched.
    Skipped { index: u64, path: PathBuf },
    Failed {
        index: u64,
        bbox: BoundingBox,
        kind: ErrorKind,
        message: String,
        timestamp: DateTime<Local>,
    },
}

impl Outcome {
    /// Failed outcome for `error`, stamped with the current local time.
    pub fn failed(index: u64, bbox: BoundingBox, error: &FetchError) -> Self {
        Self::Failed {
            index,
            bbox,
            kind: error.kind(),
            message: error.to_string(),
            timestamp: Local::now(),
        }
    }

    pub fn index(&self) -> u64 {
        match self {
            Self::Completed { index, .. } | Self::Skipped { index, .. } | Self::Failed { index, .. } => {
                *index
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The report row for a failed outcome.
    pub fn failure_record(&self) -> Option<FailureRecord> {
        match self {
            Self::Failed {
                index,
                bbox,
                kind,
                message,
                timestamp,
            } => Some(FailureRecord {
                index: *index,
                minx: bbox.minx,
                miny: bbox.miny,
                maxx: bbox.maxx,
                maxy: bbox.maxy,
                error_type: kind.as_str().to_string(),
                error_message: message.clone(),
                timestamp: timestamp.to_rfc3339(),
            }),
            _ => None,
        }
    }
}

/// One row of the failure report. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub index: u64,
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
    pub error_type: String,
    pub error_message: String,
    pub timestamp: String,
}
