use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicUsize, Ordering};

use coverage_fetch_lib::core::{BatchConfig, BoundingBox, ErrorKind, FetchError, FetchRequest, PolygonRecord};
use coverage_fetch_lib::{
    ArtifactStore, BatchDriver, BatchError, BatchEvent, CancelFlag, ContentKind, CoveragePayload, CoverageService,
    CsvBoundsSource, FAILURE_REPORT_NAME, ReportStatus, VecSource,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

const TIFF: &[u8] = b"II*\0\x08\0\0\0fake raster";

#[derive(Clone)]
enum Scripted {
    ServiceError(&'static str),
    Refused,
    /// Trip the batch's cancel flag, then answer normally.
    Cancel(Arc<OnceLock<CancelFlag>>),
}

/// Service double: counts calls and answers per polygon index.
#[derive(Clone, Default)]
struct MockService {
    calls: Arc<AtomicUsize>,
    script: Arc<HashMap<u64, Scripted>>,
}

impl MockService {
    fn new() -> Self {
        Self::default()
    }

    fn scripted(script: impl IntoIterator<Item = (u64, Scripted)>) -> Self {
        Self {
            calls: Arc::default(),
            script: Arc::new(script.into_iter().collect()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CoverageService for MockService {
    async fn fetch(&self, request: &FetchRequest) -> Result<CoveragePayload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.get(&request.index) {
            Some(Scripted::ServiceError(reason)) => {
                let body = format!(
                    "<?xml version=\"1.0\"?><ServiceExceptionReport><ServiceException code=\"InvalidParameterValue\">{}</ServiceException></ServiceExceptionReport>",
                    reason
                );
                Ok(CoveragePayload::new(body.into_bytes(), ContentKind::Xml).with_status(200))
            }
            Some(Scripted::Refused) => Err(FetchError::transport("connection refused")),
            Some(Scripted::Cancel(flag)) => {
                if let Some(flag) = flag.get() {
                    flag.cancel();
                }
                Ok(CoveragePayload::new(TIFF.to_vec(), ContentKind::Tiff).with_status(200))
            }
            None => Ok(CoveragePayload::new(TIFF.to_vec(), ContentKind::Tiff).with_status(200)),
        }
    }
}

/// `n` 100 m squares laid out along the x axis.
fn squares(n: u64) -> VecSource {
    VecSource::from_boxes((0..n).map(|i| {
        let x = i as f64 * 100.0;
        BoundingBox::new(x, 6_600_000.0, x + 100.0, 6_600_100.0)
    }))
}

fn config(out: &Path) -> BatchConfig {
    BatchConfig::new(out).workers(4).sleep_secs(0.0)
}

fn artifact_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tif"))
        .count()
}

fn report_rows(dir: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(dir.join(FAILURE_REPORT_NAME)).unwrap();
    reader.records().map(|r| r.unwrap()).collect()
}

fn drain(mut rx: mpsc::UnboundedReceiver<BatchEvent>) -> Vec<BatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn paced_batch_with_service_errors() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("tiles");
    let failing = [3, 17, 50, 98];
    let service = MockService::scripted(
        failing
            .iter()
            .map(|&i| (i, Scripted::ServiceError("BBOX outside coverage"))),
    );

    let driver =
        BatchDriver::prepare(BatchConfig::new(&out).workers(4).sleep_secs(0.5), service.clone()).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let start = Instant::now();
    let summary = driver.run(&squares(99), tx).await.unwrap();

    assert_eq!(
        (summary.completed, summary.skipped, summary.failed, summary.total),
        (95, 0, 4, 99)
    );
    assert!(!summary.interrupted);
    assert_eq!(service.calls(), 99);
    assert_eq!(artifact_count(&out), 95);

    // Some worker handled at least 25 requests, with a pause before each after its first
    assert!(start.elapsed() >= Duration::from_secs(12), "{:?}", start.elapsed());

    assert_eq!(
        summary.report,
        ReportStatus::Written {
            path: out.join(FAILURE_REPORT_NAME),
            rows: 4
        }
    );
    let rows = report_rows(&out);
    assert_eq!(rows.len(), 4);
    let indices: Vec<u64> = rows.iter().map(|r| r[0].parse().unwrap()).collect();
    assert_eq!(indices, failing);
    for row in &rows {
        assert_eq!(&row[5], "ServiceError");
        assert!(row[6].contains("BBOX outside coverage"), "{}", &row[6]);
    }
    assert_eq!(summary.failures.len(), 4);
}

#[tokio::test]
async fn one_failure_does_not_affect_others() {
    let tmp = TempDir::new().unwrap();
    let service = MockService::scripted([(1, Scripted::ServiceError("bad"))]);
    let driver = BatchDriver::prepare(config(tmp.path()), service).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let summary = driver.run(&squares(3), tx).await.unwrap();

    assert_eq!((summary.completed, summary.failed), (2, 1));
    assert!(tmp.path().join("D_1.0m_0.tif").exists());
    assert!(!tmp.path().join("D_1.0m_1.tif").exists());
    assert!(tmp.path().join("D_1.0m_2.tif").exists());
    assert_eq!(fs::read(tmp.path().join("D_1.0m_2.tif")).unwrap(), TIFF);
}

#[tokio::test]
async fn transport_failures_are_classified() {
    let tmp = TempDir::new().unwrap();
    let service = MockService::scripted([(0, Scripted::Refused)]);
    let driver = BatchDriver::prepare(config(tmp.path()), service).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let summary = driver.run(&squares(2), tx).await.unwrap();

    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].error_type, "TransportError");
    assert_eq!(summary.failures[0].error_message, "connection refused");
}

#[tokio::test]
async fn rerun_fetches_nothing() {
    let tmp = TempDir::new().unwrap();

    let first = MockService::new();
    let driver = BatchDriver::prepare(config(tmp.path()), first.clone()).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    driver.run(&squares(20), tx).await.unwrap();
    assert_eq!(first.calls(), 20);

    let second = MockService::new();
    let driver = BatchDriver::prepare(config(tmp.path()), second.clone()).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let summary = driver.run(&squares(20), tx).await.unwrap();

    assert_eq!(second.calls(), 0);
    assert_eq!((summary.skipped, summary.total), (20, 20));
    assert_eq!(summary.report, ReportStatus::NotNeeded);
}

#[tokio::test]
async fn resume_fetches_only_missing_and_clears_stale_report() {
    let tmp = TempDir::new().unwrap();
    for i in (0..100).step_by(2) {
        fs::write(tmp.path().join(format!("D_1.0m_{i}.tif")), TIFF).unwrap();
    }
    // Left behind by the interrupted first run
    fs::write(tmp.path().join("D_1.0m_1.tif.part"), b"II*").unwrap();
    fs::write(
        tmp.path().join(FAILURE_REPORT_NAME),
        "index,minx,miny,maxx,maxy,error_type,error_message,timestamp\n",
    )
    .unwrap();

    let service = MockService::new();
    let driver = BatchDriver::prepare(config(tmp.path()), service.clone()).unwrap();
    assert!(!tmp.path().join("D_1.0m_1.tif.part").exists());

    let (tx, _rx) = mpsc::unbounded_channel();
    let summary = driver.run(&squares(100), tx).await.unwrap();

    assert_eq!(service.calls(), 50);
    assert_eq!(
        (summary.completed, summary.skipped, summary.failed, summary.total),
        (50, 50, 0, 100)
    );
    assert!(matches!(summary.report, ReportStatus::Cleared { .. }));
    assert!(!tmp.path().join(FAILURE_REPORT_NAME).exists());
    assert_eq!(artifact_count(tmp.path()), 100);
}

#[tokio::test]
async fn oversized_request_is_never_sent() {
    let tmp = TempDir::new().unwrap();
    let source = VecSource::new(vec![
        PolygonRecord::new(0, BoundingBox::new(0.0, 0.0, 15_000.0, 100.0)),
        PolygonRecord::new(1, BoundingBox::new(0.0, 0.0, 100.0, 100.0)),
    ]);
    let service = MockService::new();
    let driver = BatchDriver::prepare(config(tmp.path()), service.clone()).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let summary = driver.run(&source, tx).await.unwrap();

    assert_eq!(service.calls(), 1);
    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.index, 0);
    assert_eq!(failure.error_type, "ValidationError");
    assert!(failure.error_message.contains("15000 exceeds maximum 10000"));
}

#[tokio::test]
async fn write_failure_is_a_storage_error() {
    let tmp = TempDir::new().unwrap();
    // A directory where the partial file would go makes the write fail
    fs::create_dir(tmp.path().join("D_1.0m_0.tif.part")).unwrap();
    let service = MockService::new();
    let driver = BatchDriver::prepare(config(tmp.path()), service.clone()).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let summary = driver.run(&squares(2), tx).await.unwrap();

    assert_eq!(service.calls(), 2);
    assert_eq!((summary.completed, summary.failed), (1, 1));
    assert_eq!(summary.failures[0].error_type, "StorageError");
    assert!(!tmp.path().join("D_1.0m_0.tif").exists());
}

#[tokio::test]
async fn invalid_config_is_fatal_and_touches_nothing() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("never-created");
    let service = MockService::new();

    let result = BatchDriver::prepare(BatchConfig::new(&out).workers(0), service.clone());

    assert!(matches!(result, Err(BatchError::Config(_))));
    assert!(!out.exists());
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn bad_rows_fail_alone() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("bounds.csv");
    fs::write(
        &input,
        "index,minx,miny,maxx,maxy\n0,0,0,100,100\n1,oops,0,100,100\n2,0,0,100,100\n",
    )
    .unwrap();
    let out = tmp.path().join("out");
    let source = CsvBoundsSource::open(&input).unwrap();
    let driver = BatchDriver::prepare(config(&out), MockService::new()).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let summary = driver.run(&source, tx).await.unwrap();

    assert_eq!((summary.completed, summary.failed), (2, 1));
    assert_eq!(
        summary.failures[0].error_message,
        "Invalid geometry bounds (NaN values) for polygon 1"
    );
}

#[tokio::test]
async fn unparseable_index_fails_without_taking_another_row() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("bounds.csv");
    fs::write(
        &input,
        "index,minx,miny,maxx,maxy\n1,0,0,100,100\nabc,5000,5000,5100,5100\n",
    )
    .unwrap();
    let out = tmp.path().join("out");
    let service = MockService::new();
    let driver = BatchDriver::prepare(config(&out).workers(1), service.clone()).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let summary = driver
        .run(&CsvBoundsSource::open(&input).unwrap(), tx)
        .await
        .unwrap();

    assert_eq!((summary.completed, summary.failed, summary.total), (1, 1, 2));
    assert_eq!(service.calls(), 1);
    assert_eq!(artifact_count(&out), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.error_type, "ValidationError");
    assert_eq!(failure.error_message, "Invalid polygon index 'abc' in input row 1");
}

#[tokio::test]
async fn duplicate_index_is_fetched_once() {
    let tmp = TempDir::new().unwrap();
    let source = VecSource::new(vec![
        PolygonRecord::new(7, BoundingBox::new(0.0, 0.0, 100.0, 100.0)),
        PolygonRecord::new(7, BoundingBox::new(5000.0, 5000.0, 5100.0, 5100.0)),
        PolygonRecord::new(8, BoundingBox::new(0.0, 0.0, 50.0, 50.0)),
    ]);

    let service = MockService::new();
    let driver = BatchDriver::prepare(config(tmp.path()), service.clone()).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let summary = driver.run(&source, tx).await.unwrap();

    assert_eq!((summary.completed, summary.failed, summary.total), (2, 1, 3));
    assert_eq!(service.calls(), 2);
    assert_eq!(artifact_count(tmp.path()), 2);
    let failure = &summary.failures[0];
    assert_eq!(failure.index, 7);
    assert_eq!(failure.error_type, "ValidationError");
    assert!(failure.error_message.contains("Duplicate polygon index 7"));
    // The row that lost keeps its own bounds in the report
    assert_eq!(failure.minx, 5000.0);

    // A re-run skips the first record and rejects the duplicate again
    let again = MockService::new();
    let driver = BatchDriver::prepare(config(tmp.path()), again.clone()).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let summary = driver.run(&source, tx).await.unwrap();
    assert_eq!(again.calls(), 0);
    assert_eq!((summary.skipped, summary.failed), (2, 1));
}

/// Resume store backed by a list of finished artifacts instead of the disk.
struct Manifest(HashSet<PathBuf>);

impl ArtifactStore for Manifest {
    fn exists(&self, path: &Path) -> bool {
        self.0.contains(path)
    }
}

#[tokio::test]
async fn custom_store_decides_what_is_skipped() {
    let tmp = TempDir::new().unwrap();
    // On disk but not in the manifest, so it is fetched again
    fs::write(tmp.path().join("D_1.0m_3.tif"), TIFF).unwrap();
    let manifest = Manifest(HashSet::from([
        tmp.path().join("D_1.0m_0.tif"),
        tmp.path().join("D_1.0m_1.tif"),
    ]));

    let service = MockService::new();
    let driver = BatchDriver::prepare(config(tmp.path()), service.clone())
        .unwrap()
        .with_store(manifest);
    let (tx, _rx) = mpsc::unbounded_channel();
    let summary = driver.run(&squares(4), tx).await.unwrap();

    assert_eq!((summary.completed, summary.skipped, summary.total), (2, 2, 4));
    assert_eq!(service.calls(), 2);
    assert!(!tmp.path().join("D_1.0m_0.tif").exists());
    assert!(tmp.path().join("D_1.0m_2.tif").exists());
}

#[tokio::test]
async fn unrelated_part_files_survive_preparation() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("D_1.0m_4.tif.part"), b"II*").unwrap();
    fs::write(tmp.path().join("movie.mkv.part"), b"downloading").unwrap();

    BatchDriver::prepare(config(tmp.path()), MockService::new()).unwrap();

    assert!(!tmp.path().join("D_1.0m_4.tif.part").exists());
    assert_eq!(fs::read(tmp.path().join("movie.mkv.part")).unwrap(), b"downloading");
}

#[tokio::test]
async fn cancel_before_start_admits_nothing() {
    let tmp = TempDir::new().unwrap();
    let service = MockService::new();
    let driver = BatchDriver::prepare(config(tmp.path()), service.clone()).unwrap();
    driver.cancel_flag().cancel();
    let (tx, rx) = mpsc::unbounded_channel();

    let summary = driver.run(&squares(50), tx).await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.total, 0);
    assert_eq!(service.calls(), 0);
    assert!(drain(rx).contains(&BatchEvent::Interrupted));
}

#[tokio::test]
async fn cancellation_mid_run_settles_admitted_requests() {
    let tmp = TempDir::new().unwrap();
    let flag = Arc::new(OnceLock::new());
    let service = MockService::scripted([(10, Scripted::Cancel(flag.clone()))]);
    let driver = BatchDriver::prepare(config(tmp.path()), service.clone()).unwrap();
    let _ = flag.set(driver.cancel_flag());
    let (tx, _rx) = mpsc::unbounded_channel();

    let summary = driver.run(&squares(100), tx).await.unwrap();

    assert!(summary.interrupted);
    assert!(summary.total > 10 && summary.total < 100, "{}", summary.total);
    assert_eq!(summary.completed + summary.skipped + summary.failed, summary.total);
    assert_eq!(service.calls() as u64, summary.total);
    assert_eq!(artifact_count(tmp.path()) as u64, summary.completed);
}

#[tokio::test]
async fn events_cover_every_outcome() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("D_1.0m_0.tif"), TIFF).unwrap();
    let service = MockService::scripted([(2, Scripted::ServiceError("nope"))]);
    let driver = BatchDriver::prepare(config(tmp.path()), service).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    let summary = driver.run(&squares(5), tx).await.unwrap();
    let events = drain(rx);

    assert_eq!(events.first(), Some(&BatchEvent::Started { expected: Some(5) }));
    assert_eq!(events.last(), Some(&BatchEvent::Done));
    let settled = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                BatchEvent::Completed { .. } | BatchEvent::Skipped { .. } | BatchEvent::Failed { .. }
            )
        })
        .count() as u64;
    assert_eq!(settled, summary.total);
    let started = events
        .iter()
        .filter(|e| matches!(e, BatchEvent::RequestStarted { .. }))
        .count();
    assert_eq!(started, 4);
    assert!(events.iter().any(|e| matches!(
        e,
        BatchEvent::Failed {
            index: 2,
            kind: ErrorKind::Service,
            ..
        }
    )));
}
