//! Turning a polygon's bounding box into a fully specified fetch request.
//!
//! Building a request is where oversized or malformed boxes are stopped. A
//! request that fails here never reaches the network.

use std::sync::Arc;

use thiserror::Error;

use crate::bbox::{BoundingBox, PolygonRecord, RecordDefect};
use crate::config::ServiceConfig;

/// Slack applied before rounding up, so an extent that is an exact multiple
/// of the resolution does not gain a pixel from float noise.
const PIXEL_EPSILON: f64 = 1e-9;

/// Reasons a request is rejected before it is sent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid polygon index '{raw}' in input row {row}")]
    InvalidIndex { row: u64, raw: String },

    #[error("Unreadable input row {row}: {reason}")]
    UnreadableRow { row: u64, reason: String },

    #[error("Duplicate polygon index {index}: an earlier record already uses it")]
    DuplicateIndex { index: u64 },

    #[error("Invalid geometry bounds (NaN values) for polygon {index}")]
    NonFinite { index: u64 },

    #[error("Degenerate bounds for polygon {index}: {bbox}")]
    Degenerate { index: u64, bbox: BoundingBox },

    #[error(
        "Computed raster size for polygon {index} is invalid ({width}x{height} pixels at resolution {resolution})"
    )]
    InvalidDimensions {
        index: u64,
        width: f64,
        height: f64,
        resolution: f64,
    },

    #[error(
        "Requested raster too large for polygon {index}: {width}x{height} pixels ({}). Consider using a coarser resolution or increasing --max-pixels.",
        oversize_detail(.width, .height, .max)
    )]
    TooLarge {
        index: u64,
        width: u64,
        height: u64,
        max: u32,
    },
}

impl ValidationError {
    pub fn too_large(index: u64, width: u64, height: u64, max: u32) -> Self {
        Self::TooLarge {
            index,
            width,
            height,
            max,
        }
    }
}

fn oversize_detail(width: &u64, height: &u64, max: &u32) -> String {
    let mut parts = Vec::new();
    if *width > u64::from(*max) {
        parts.push(format!("width {} exceeds maximum {}", width, max));
    }
    if *height > u64::from(*max) {
        parts.push(format!("height {} exceeds maximum {}", height, max));
    }
    parts.join(", ")
}

/// Settings shared by every request in a batch.
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub resolution: f64,
    pub max_pixels: u32,
    pub service: Arc<ServiceConfig>,
}

/// A validated request for one polygon's raster.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub index: u64,
    pub bbox: BoundingBox,
    pub width: u32,
    pub height: u32,
    pub resolution: f64,
    pub service: Arc<ServiceConfig>,
}

impl FetchRequest {
    /// Build and validate the request for `record`.
    ///
    /// Pixel dimensions are `ceil(extent / resolution)` per axis and must
    /// each be within `params.max_pixels`.
    pub fn build(record: &PolygonRecord, params: &RequestParams) -> Result<Self, ValidationError> {
        let index = record.index;
        let bbox = record.bbox;

        match &record.defect {
            Some(RecordDefect::UnparseableIndex(raw)) => {
                return Err(ValidationError::InvalidIndex {
                    row: index,
                    raw: raw.clone(),
                });
            }
            Some(RecordDefect::UnreadableRow(reason)) => {
                return Err(ValidationError::UnreadableRow {
                    row: index,
                    reason: reason.clone(),
                });
            }
            None => {}
        }
        if !bbox.is_finite() {
            return Err(ValidationError::NonFinite { index });
        }
        if bbox.is_degenerate() {
            return Err(ValidationError::Degenerate { index, bbox });
        }

        let width = pixel_count(bbox.width(), params.resolution);
        let height = pixel_count(bbox.height(), params.resolution);
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(ValidationError::InvalidDimensions {
                index,
                width,
                height,
                resolution: params.resolution,
            });
        }

        let max = f64::from(params.max_pixels);
        if width > max || height > max {
            return Err(ValidationError::too_large(
                index,
                width as u64,
                height as u64,
                params.max_pixels,
            ));
        }

        Ok(Self {
            index,
            bbox,
            width: width as u32,
            height: height as u32,
            resolution: params.resolution,
            service: params.service.clone(),
        })
    }

    /// File name this request's artifact is stored under.
    pub fn file_name(&self) -> String {
        artifact_file_name(self.index, self.resolution, &self.service.format)
    }
}

/// Number of pixels needed to cover `extent` at `resolution`, rounded up.
///
/// A positive extent always needs at least one pixel, however small it is
/// next to the resolution.
pub fn pixel_count(extent: f64, resolution: f64) -> f64 {
    let pixels = (extent / resolution - PIXEL_EPSILON).ceil();
    if pixels.is_finite() && extent > 0.0 && resolution > 0.0 {
        pixels.max(1.0)
    } else {
        pixels
    }
}

/// Deterministic artifact name for a polygon at a resolution.
///
/// `D_{resolution}m_{index}.{ext}`; integral resolutions keep their decimal
/// point (`D_1.0m_7.tif`) so names stay stable across runs and tools.
pub fn artifact_file_name(index: u64, resolution: f64, format: &str) -> String {
    format!(
        "D_{}m_{}.{}",
        format_resolution(resolution),
        index,
        extension_for_format(format)
    )
}

/// Whether `name` has the shape [`artifact_file_name`] produces:
/// `D_<resolution>m_<index>.<ext>`.
pub fn is_artifact_file_name(name: &str) -> bool {
    let Some((resolution, rest)) = name
        .strip_prefix("D_")
        .and_then(|n| n.split_once("m_"))
    else {
        return false;
    };
    let Some((index, ext)) = rest.split_once('.') else {
        return false;
    };
    resolution.parse::<f64>().is_ok_and(|r| r.is_finite() && r > 0.0)
        && !index.is_empty()
        && index.bytes().all(|b| b.is_ascii_digit())
        && !ext.is_empty()
        && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn format_resolution(resolution: f64) -> String {
    if resolution.fract() == 0.0 && resolution.abs() < 1e15 {
        format!("{:.1}", resolution)
    } else {
        format!("{}", resolution)
    }
}

/// File extension for a requested coverage format.
pub fn extension_for_format(format: &str) -> String {
    let lower = format.to_ascii_lowercase();
    if lower.contains("tif") {
        return "tif".to_string();
    }
    if lower.contains("jpeg") || lower.contains("jpg") {
        return "jpg".to_string();
    }
    if lower.contains("png") {
        return "png".to_string();
    }
    let ext: String = lower
        .rsplit('/')
        .next()
        .unwrap_or(&lower)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if ext.is_empty() { "bin".to_string() } else { ext }
}

#[cfg(test)]
#[path = "tests/request_tests.rs"]
mod tests;
