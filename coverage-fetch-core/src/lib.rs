//! Core types for coverage-fetch.
//!
//! Bounding boxes, fetch requests, per-request outcomes and the error
//! taxonomy shared by the orchestration library, the service client and the
//! CLI. Nothing in this crate touches the network or spawns tasks.

pub mod bbox;
pub mod config;
pub mod error;
pub mod outcome;
pub mod request;

pub use bbox::{BoundingBox, PolygonRecord, RecordDefect};
pub use config::{BatchConfig, ConfigError, ServiceConfig};
pub use error::{ErrorKind, FetchError};
pub use outcome::{FailureRecord, Outcome};
pub use request::{
    FetchRequest, RequestParams, ValidationError, artifact_file_name, is_artifact_file_name,
};
