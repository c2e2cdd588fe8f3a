//! OGC Web Coverage Service (WCS 1.0.0) transport for coverage-fetch.

pub mod client;
pub mod error;
pub mod query;

pub use client::WcsClient;
pub use error::WcsError;
