//! Batch configuration and its startup validation.
//!
//! Every check here runs once, before any request is built. A failure is
//! fatal for the whole run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::request::RequestParams;

/// Default maximum pixels per dimension for a single request.
pub const DEFAULT_MAX_PIXELS: u32 = 10_000;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_SLEEP_SECS: f64 = 0.5;
pub const DEFAULT_RESOLUTION: f64 = 1.0;
pub const DEFAULT_WCS_URL: &str = "https://wcs.geonorge.no/skwms1/wcs.hoyde-dtm-nhm-25833";
pub const DEFAULT_COVERAGE_ID: &str = "nhm_dtm_topo_25833";
pub const DEFAULT_CRS: &str = "EPSG:25833";
pub const DEFAULT_FORMAT: &str = "GeoTIFF";
pub const DEFAULT_TIMEOUT_SECS: f64 = 120.0;

/// Fatal configuration problems, reported before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer (got {value})")]
    NotPositiveInteger { name: &'static str, value: String },

    #[error("{name} must be a positive, finite number (got {value})")]
    NotPositive { name: &'static str, value: f64 },

    #[error("sleep must be a non-negative number of seconds (got {0})")]
    NegativeSleep(f64),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("Invalid service URL '{0}': expected an http:// or https:// URL")]
    InvalidUrl(String),

    #[error("Output directory {path} is not writable: {source}")]
    OutputNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value for {name}: {message}")]
    Invalid { name: String, message: String },

    #[error("Could not read settings file {path}: {message}")]
    Settings { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Where and what to request from the coverage service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub url: String,
    pub coverage_id: String,
    /// CRS the bounding boxes are expressed in; sent with every request.
    pub crs: String,
    /// Requested output format, e.g. "GeoTIFF".
    pub format: String,
    /// Per-request transport timeout in seconds.
    pub timeout_secs: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WCS_URL.to_string(),
            coverage_id: DEFAULT_COVERAGE_ID.to_string(),
            crs: DEFAULT_CRS.to_string(),
            format: DEFAULT_FORMAT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ConfigError::Empty("service URL"));
        }
        let lower = url.to_ascii_lowercase();
        let rest = lower
            .strip_prefix("https://")
            .or_else(|| lower.strip_prefix("http://"));
        match rest {
            Some(host) if !host.is_empty() && !host.starts_with('/') => {}
            _ => return Err(ConfigError::InvalidUrl(self.url.clone())),
        }
        if self.coverage_id.trim().is_empty() {
            return Err(ConfigError::Empty("coverage id"));
        }
        if self.crs.trim().is_empty() {
            return Err(ConfigError::Empty("crs"));
        }
        if self.format.trim().is_empty() {
            return Err(ConfigError::Empty("format"));
        }
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "timeout",
                value: self.timeout_secs,
            });
        }
        Ok(())
    }
}

/// Everything the batch needs besides the polygon source itself.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Directory receiving one artifact per polygon plus the failure report.
    pub output_dir: PathBuf,
    pub workers: usize,
    /// Pause between consecutive requests on one worker, in seconds.
    pub sleep_secs: f64,
    /// Output resolution in CRS units (meters) per pixel.
    pub resolution: f64,
    pub max_pixels: u32,
    pub service: ServiceConfig,
}

impl BatchConfig {
    /// Create a configuration with default values for `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            workers: DEFAULT_WORKERS,
            sleep_secs: DEFAULT_SLEEP_SECS,
            resolution: DEFAULT_RESOLUTION,
            max_pixels: DEFAULT_MAX_PIXELS,
            service: ServiceConfig::default(),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn sleep_secs(mut self, secs: f64) -> Self {
        self.sleep_secs = secs;
        self
    }

    pub fn resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn max_pixels(mut self, max_pixels: u32) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    pub fn service(mut self, service: ServiceConfig) -> Self {
        self.service = service;
        self
    }

    pub fn sleep(&self) -> Duration {
        secs_to_duration(self.sleep_secs)
    }

    /// Check every numeric and string setting. Filesystem checks happen
    /// when the batch is prepared.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NotPositiveInteger {
                name: "workers",
                value: self.workers.to_string(),
            });
        }
        if !(self.sleep_secs.is_finite() && self.sleep_secs >= 0.0) {
            return Err(ConfigError::NegativeSleep(self.sleep_secs));
        }
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "resolution",
                value: self.resolution,
            });
        }
        if self.max_pixels == 0 {
            return Err(ConfigError::NotPositiveInteger {
                name: "max pixels",
                value: self.max_pixels.to_string(),
            });
        }
        self.service.validate()
    }

    /// Parameters every request is built from.
    pub fn request_params(&self) -> RequestParams {
        RequestParams {
            resolution: self.resolution,
            max_pixels: self.max_pixels,
            service: Arc::new(self.service.clone()),
        }
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
