//! Download orchestration for coverage-fetch.
//!
//! A batch reads polygon bounding boxes from a [`PolygonSource`], builds and
//! validates one request per polygon, skips polygons whose artifact already
//! exists, and hands the rest to a paced [`WorkerPool`]. Every polygon ends
//! in exactly one [`Outcome`](coverage_fetch_core::Outcome), tallied by the
//! [`Aggregator`]; failures are written to a CSV report at the end.

pub mod aggregator;
pub mod async_util;
pub mod batch;
pub mod classify;
pub mod fetch;
pub mod pacing;
pub mod report;
pub mod resume;
pub mod settings;
pub mod source;
pub mod storage;
pub mod worker_pool;

pub use aggregator::{Aggregator, ProgressSnapshot};
pub use batch::{BatchDriver, BatchError, BatchEvent, BatchSummary, CancelFlag};
pub use classify::{Classification, ContentKind, classify};
pub use fetch::{CoveragePayload, CoverageService, FetchClient};
pub use report::{FAILURE_REPORT_NAME, FailureLog, ReportError, ReportStatus};
pub use resume::{ArtifactStore, FsArtifactStore, ResumeDecision, ResumeFilter};
pub use source::{CsvBoundsSource, PolygonSource, SourceError, VecSource};
pub use worker_pool::{Abandoned, PoolConfig, Submitter, WorkerPool};

pub use coverage_fetch_core as core;
