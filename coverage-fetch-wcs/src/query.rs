//! GetCoverage query parameters.

use coverage_fetch_core::FetchRequest;

pub const WCS_VERSION: &str = "1.0.0";

/// Key-value pairs for a WCS 1.0.0 GetCoverage request.
pub fn get_coverage(request: &FetchRequest) -> Vec<(&'static str, String)> {
    let service = &request.service;
    vec![
        ("SERVICE", "WCS".to_string()),
        ("VERSION", WCS_VERSION.to_string()),
        ("REQUEST", "GetCoverage".to_string()),
        ("COVERAGE", service.coverage_id.clone()),
        ("CRS", service.crs.clone()),
        ("BBOX", request.bbox.to_query_value()),
        ("WIDTH", request.width.to_string()),
        ("HEIGHT", request.height.to_string()),
        ("FORMAT", service.format.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use coverage_fetch_core::{BoundingBox, PolygonRecord, RequestParams, ServiceConfig};

    use super::*;

    #[test]
    fn carries_request_geometry_and_service() {
        let params = RequestParams {
            resolution: 2.0,
            max_pixels: 10_000,
            service: Arc::new(ServiceConfig::default()),
        };
        let record = PolygonRecord::new(
            9,
            BoundingBox::new(250_000.0, 6_600_000.0, 250_300.0, 6_600_101.0),
        );
        let request = FetchRequest::build(&record, &params).unwrap();
        let query = get_coverage(&request);
        let get = |key: &str| {
            query
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };

        assert_eq!(get("REQUEST"), "GetCoverage");
        assert_eq!(get("VERSION"), "1.0.0");
        assert_eq!(get("COVERAGE"), "nhm_dtm_topo_25833");
        assert_eq!(get("CRS"), "EPSG:25833");
        assert_eq!(get("BBOX"), "250000,6600000,250300,6600101");
        assert_eq!(get("WIDTH"), "150");
        assert_eq!(get("HEIGHT"), "51");
        assert_eq!(get("FORMAT"), "GeoTIFF");
    }
}
