use super::*;
use crate::bbox::RecordDefect;
use crate::config::BatchConfig;

fn params(resolution: f64, max_pixels: u32) -> RequestParams {
    BatchConfig::new("/tmp/out")
        .resolution(resolution)
        .max_pixels(max_pixels)
        .request_params()
}

fn record(index: u64, minx: f64, miny: f64, maxx: f64, maxy: f64) -> PolygonRecord {
    PolygonRecord::new(index, BoundingBox::new(minx, miny, maxx, maxy))
}

#[test]
fn dimensions_round_up() {
    let req = FetchRequest::build(&record(1, 0.0, 0.0, 10.5, 3.2), &params(1.0, 10_000)).unwrap();
    assert_eq!(req.width, 11);
    assert_eq!(req.height, 4);
}

#[test]
fn exact_multiples_do_not_gain_a_pixel() {
    let req = FetchRequest::build(&record(1, 0.0, 0.0, 0.3, 0.7), &params(0.1, 10_000)).unwrap();
    assert_eq!(req.width, 3);
    assert_eq!(req.height, 7);
}

#[test]
fn small_box_gets_at_least_one_pixel() {
    let req = FetchRequest::build(&record(1, 0.0, 0.0, 0.2, 0.2), &params(1.0, 10_000)).unwrap();
    assert_eq!((req.width, req.height), (1, 1));
}

#[test]
fn sliver_far_below_resolution_still_gets_a_pixel() {
    let req = FetchRequest::build(&record(1, 0.0, 0.0, 1e-12, 5.0), &params(1.0, 10_000)).unwrap();
    assert_eq!((req.width, req.height), (1, 5));
}

#[test]
fn oversized_request_names_dimension_and_limit() {
    let rec = record(42, 500_000.0, 6_600_000.0, 515_000.0, 6_615_000.0);
    let err = FetchRequest::build(&rec, &params(1.0, 10_000)).unwrap_err();
    assert_eq!(err, ValidationError::too_large(42, 15_000, 15_000, 10_000));
    let msg = err.to_string();
    assert!(msg.contains("15000 exceeds maximum 10000"), "{msg}");
    assert!(msg.contains("coarser resolution"));
}

#[test]
fn same_box_at_coarser_resolution_is_accepted() {
    let rec = record(42, 500_000.0, 6_600_000.0, 515_000.0, 6_615_000.0);
    let req = FetchRequest::build(&rec, &params(2.0, 10_000)).unwrap();
    assert_eq!((req.width, req.height), (7_500, 7_500));
}

#[test]
fn only_offending_axis_is_reported() {
    let rec = record(3, 0.0, 0.0, 12_000.0, 50.0);
    let msg = FetchRequest::build(&rec, &params(1.0, 10_000))
        .unwrap_err()
        .to_string();
    assert!(msg.contains("width 12000 exceeds maximum 10000"));
    assert!(!msg.contains("height"));
}

#[test]
fn ceiling_is_inclusive() {
    let rec = record(3, 0.0, 0.0, 10_000.0, 10_000.0);
    assert!(FetchRequest::build(&rec, &params(1.0, 10_000)).is_ok());
}

#[test]
fn nan_bounds_rejected() {
    let rec = record(9, f64::NAN, 0.0, 1.0, 1.0);
    let err = FetchRequest::build(&rec, &params(1.0, 10_000)).unwrap_err();
    assert_eq!(err, ValidationError::NonFinite { index: 9 });
    assert_eq!(
        err.to_string(),
        "Invalid geometry bounds (NaN values) for polygon 9"
    );
}

#[test]
fn degenerate_bounds_rejected() {
    let rec = record(5, 10.0, 0.0, 10.0, 5.0);
    assert!(matches!(
        FetchRequest::build(&rec, &params(1.0, 10_000)),
        Err(ValidationError::Degenerate { index: 5, .. })
    ));
}

#[test]
fn defective_rows_are_rejected_before_geometry() {
    let rec = PolygonRecord::defective(
        4,
        BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        RecordDefect::UnparseableIndex("abc".to_string()),
    );
    let err = FetchRequest::build(&rec, &params(1.0, 10_000)).unwrap_err();
    assert_eq!(err.to_string(), "Invalid polygon index 'abc' in input row 4");

    let rec = PolygonRecord::defective(
        6,
        BoundingBox::invalid(),
        RecordDefect::UnreadableRow("invalid UTF-8".to_string()),
    );
    assert!(matches!(
        FetchRequest::build(&rec, &params(1.0, 10_000)),
        Err(ValidationError::UnreadableRow { row: 6, .. })
    ));
}

#[test]
fn file_name_is_deterministic() {
    let p = params(1.0, 10_000);
    let a = FetchRequest::build(&record(17, 0.0, 0.0, 5.0, 5.0), &p).unwrap();
    let b = FetchRequest::build(&record(17, 100.0, 100.0, 200.0, 200.0), &p).unwrap();
    assert_eq!(a.file_name(), "D_1.0m_17.tif");
    assert_eq!(a.file_name(), b.file_name());
}

#[test]
fn artifact_names_keep_resolution() {
    assert_eq!(artifact_file_name(0, 2.0, "GeoTIFF"), "D_2.0m_0.tif");
    assert_eq!(artifact_file_name(12, 0.5, "GeoTIFF"), "D_0.5m_12.tif");
    assert_eq!(artifact_file_name(12, 0.25, "image/png"), "D_0.25m_12.png");
}

#[test]
fn recognizes_only_artifact_names() {
    assert!(is_artifact_file_name("D_1.0m_7.tif"));
    assert!(is_artifact_file_name(&artifact_file_name(12, 0.25, "image/png")));
    assert!(!is_artifact_file_name("notes"));
    assert!(!is_artifact_file_name("D_1.0m_7"));
    assert!(!is_artifact_file_name("D_fastm_7.tif"));
    assert!(!is_artifact_file_name("D_1.0m_x7.tif"));
    assert!(!is_artifact_file_name("D_1.0m_7.tar.gz"));
}

#[test]
fn extensions_from_format_names() {
    assert_eq!(extension_for_format("GeoTIFF"), "tif");
    assert_eq!(extension_for_format("image/tiff"), "tif");
    assert_eq!(extension_for_format("JPEG"), "jpg");
    assert_eq!(extension_for_format("NetCDF"), "netcdf");
    assert_eq!(extension_for_format("///"), "bin");
}
