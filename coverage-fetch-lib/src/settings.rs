//! Layered configuration: CLI flags, environment, settings file, defaults.
//!
//! The settings file lives at `<config_dir>/coverage-fetch/settings.toml`:
//!
//! ```toml
//! [service]
//! url = "https://wcs.example.org/wcs"
//! coverage_id = "dtm_25833"
//! crs = "EPSG:25833"
//! format = "GeoTIFF"
//! timeout = 120.0
//!
//! [batch]
//! workers = 4
//! sleep = 0.5
//! resolution = 1.0
//! max_pixels = 10000
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use coverage_fetch_core::config::{
    DEFAULT_COVERAGE_ID, DEFAULT_CRS, DEFAULT_FORMAT, DEFAULT_MAX_PIXELS, DEFAULT_RESOLUTION,
    DEFAULT_SLEEP_SECS, DEFAULT_TIMEOUT_SECS, DEFAULT_WCS_URL, DEFAULT_WORKERS,
};
use coverage_fetch_core::{BatchConfig, ConfigError, ServiceConfig};
use serde::{Deserialize, Serialize};

pub const ENV_WORKERS: &str = "COVERAGE_FETCH_WORKERS";
pub const ENV_SLEEP: &str = "COVERAGE_FETCH_SLEEP";
pub const ENV_RESOLUTION: &str = "COVERAGE_FETCH_RESOLUTION";
pub const ENV_MAX_PIXELS: &str = "COVERAGE_FETCH_MAX_PIXELS";
pub const ENV_WCS_URL: &str = "COVERAGE_FETCH_WCS_URL";
pub const ENV_COVERAGE_ID: &str = "COVERAGE_FETCH_COVERAGE_ID";
pub const ENV_CRS: &str = "COVERAGE_FETCH_CRS";
pub const ENV_TIMEOUT: &str = "COVERAGE_FETCH_TIMEOUT";

/// Canonical path to the settings file: `~/.config/coverage-fetch/settings.toml`.
pub fn settings_path() -> PathBuf {
    let config = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    config.join("coverage-fetch").join("settings.toml")
}

/// TOML settings file format.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    pub service: ServiceSettings,
    pub batch: BatchSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSettings {
    pub url: Option<String>,
    pub coverage_id: Option<String>,
    pub crs: Option<String>,
    pub format: Option<String>,
    pub timeout: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSettings {
    pub workers: Option<i64>,
    pub sleep: Option<f64>,
    pub resolution: Option<f64>,
    pub max_pixels: Option<i64>,
}

impl FromStr for SettingsFile {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

/// Read the settings file at `path`. A missing file is not an error.
pub fn load_settings(path: &Path) -> Result<Option<SettingsFile>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::Settings {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    };
    contents
        .parse::<SettingsFile>()
        .map(Some)
        .map_err(|e| ConfigError::Settings {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })
}

/// Where a setting's effective value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    EnvVar(&'static str),
    SettingsFile,
    Default,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag => write!(f, "command line"),
            Self::EnvVar(var) => write!(f, "env ${}", var),
            Self::SettingsFile => write!(f, "settings file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Values given on the command line. Numbers are taken signed so that
/// out-of-range input is reported as a configuration error.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workers: Option<i64>,
    pub sleep: Option<f64>,
    pub resolution: Option<f64>,
    pub max_pixels: Option<i64>,
    pub wcs_url: Option<String>,
    pub coverage_id: Option<String>,
    pub crs: Option<String>,
    pub format: Option<String>,
    pub timeout: Option<f64>,
}

/// Provenance of each setting.
#[derive(Debug, Clone)]
pub struct ConfigSources {
    pub workers: ValueSource,
    pub sleep: ValueSource,
    pub resolution: ValueSource,
    pub max_pixels: ValueSource,
    pub url: ValueSource,
    pub coverage_id: ValueSource,
    pub crs: ValueSource,
    pub format: ValueSource,
    pub timeout: ValueSource,
}

/// The effective configuration and where each value came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: BatchConfig,
    pub sources: ConfigSources,
}

impl ResolvedConfig {
    /// `(name, value, source)` rows for display.
    pub fn entries(&self) -> Vec<(&'static str, String, &ValueSource)> {
        let c = &self.config;
        let s = &self.sources;
        vec![
            ("workers", c.workers.to_string(), &s.workers),
            ("sleep", format!("{}s", c.sleep_secs), &s.sleep),
            ("resolution", format!("{}m", c.resolution), &s.resolution),
            ("max_pixels", c.max_pixels.to_string(), &s.max_pixels),
            ("wcs_url", c.service.url.clone(), &s.url),
            ("coverage_id", c.service.coverage_id.clone(), &s.coverage_id),
            ("crs", c.service.crs.clone(), &s.crs),
            ("format", c.service.format.clone(), &s.format),
            ("timeout", format!("{}s", c.service.timeout_secs), &s.timeout),
        ]
    }
}

/// Resolve the effective configuration.
///
/// Priority: flag > environment variable > settings file > default.
/// `env` looks up an environment variable; pass `|k| std::env::var(k).ok()`
/// for the real environment.
pub fn resolve<E>(
    output_dir: impl Into<PathBuf>,
    overrides: &Overrides,
    file: Option<&SettingsFile>,
    env: E,
) -> Result<ResolvedConfig, ConfigError>
where
    E: Fn(&str) -> Option<String>,
{
    let layers = Layers { env: &env };
    let file = file.cloned().unwrap_or_default();

    let (workers, workers_src) = layers.pick(
        overrides.workers,
        ENV_WORKERS,
        file.batch.workers,
        DEFAULT_WORKERS as i64,
    )?;
    let (sleep, sleep_src) =
        layers.pick(overrides.sleep, ENV_SLEEP, file.batch.sleep, DEFAULT_SLEEP_SECS)?;
    let (resolution, resolution_src) = layers.pick(
        overrides.resolution,
        ENV_RESOLUTION,
        file.batch.resolution,
        DEFAULT_RESOLUTION,
    )?;
    let (max_pixels, max_pixels_src) = layers.pick(
        overrides.max_pixels,
        ENV_MAX_PIXELS,
        file.batch.max_pixels,
        i64::from(DEFAULT_MAX_PIXELS),
    )?;
    let (url, url_src) = layers.pick(
        overrides.wcs_url.clone(),
        ENV_WCS_URL,
        file.service.url,
        DEFAULT_WCS_URL.to_string(),
    )?;
    let (coverage_id, coverage_id_src) = layers.pick(
        overrides.coverage_id.clone(),
        ENV_COVERAGE_ID,
        file.service.coverage_id,
        DEFAULT_COVERAGE_ID.to_string(),
    )?;
    let (crs, crs_src) = layers.pick(
        overrides.crs.clone(),
        ENV_CRS,
        file.service.crs,
        DEFAULT_CRS.to_string(),
    )?;
    // No environment variable for the format
    let (format, format_src) = match (overrides.format.clone(), file.service.format) {
        (Some(f), _) => (f, ValueSource::Flag),
        (None, Some(f)) => (f, ValueSource::SettingsFile),
        (None, None) => (DEFAULT_FORMAT.to_string(), ValueSource::Default),
    };
    let (timeout, timeout_src) = layers.pick(
        overrides.timeout,
        ENV_TIMEOUT,
        file.service.timeout,
        DEFAULT_TIMEOUT_SECS,
    )?;

    let workers = usize::try_from(workers)
        .ok()
        .filter(|&w| w > 0)
        .ok_or_else(|| ConfigError::NotPositiveInteger {
            name: "workers",
            value: workers.to_string(),
        })?;
    let max_pixels = u32::try_from(max_pixels)
        .ok()
        .filter(|&m| m > 0)
        .ok_or_else(|| ConfigError::NotPositiveInteger {
            name: "max pixels",
            value: max_pixels.to_string(),
        })?;

    let config = BatchConfig::new(output_dir)
        .workers(workers)
        .sleep_secs(sleep)
        .resolution(resolution)
        .max_pixels(max_pixels)
        .service(ServiceConfig {
            url,
            coverage_id,
            crs,
            format,
            timeout_secs: timeout,
        });

    Ok(ResolvedConfig {
        config,
        sources: ConfigSources {
            workers: workers_src,
            sleep: sleep_src,
            resolution: resolution_src,
            max_pixels: max_pixels_src,
            url: url_src,
            coverage_id: coverage_id_src,
            crs: crs_src,
            format: format_src,
            timeout: timeout_src,
        },
    })
}

struct Layers<'a, E> {
    env: &'a E,
}

impl<E: Fn(&str) -> Option<String>> Layers<'_, E> {
    fn pick<T: FromStr>(
        &self,
        flag: Option<T>,
        var: &'static str,
        file: Option<T>,
        default: T,
    ) -> Result<(T, ValueSource), ConfigError> {
        if let Some(v) = flag {
            return Ok((v, ValueSource::Flag));
        }
        if let Some(raw) = (self.env)(var) {
            let raw = raw.trim();
            if !raw.is_empty() {
                let v = raw
                    .parse::<T>()
                    .map_err(|_| ConfigError::invalid(var, format!("could not parse '{}'", raw)))?;
                return Ok((v, ValueSource::EnvVar(var)));
            }
        }
        if let Some(v) = file {
            return Ok((v, ValueSource::SettingsFile));
        }
        Ok((default, ValueSource::Default))
    }
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
