//! Batch orchestration.
//!
//! A dedicated reader thread walks the polygon source, builds and validates
//! each request, rejects duplicate indices and short-circuits polygons whose
//! artifact already exists. On the batch task, the feeder admits what the
//! reader hands over and submits fetches to the worker pool, while the
//! collector receives pool results. Every admitted polygon produces exactly
//! one [`Outcome`], recorded by the [`Aggregator`] and announced as a
//! [`BatchEvent`].

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use coverage_fetch_core::{
    BatchConfig, ConfigError, ErrorKind, FailureRecord, FetchError, FetchRequest, Outcome,
    PolygonRecord, RequestParams, ValidationError,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::aggregator::{Aggregator, ProgressSnapshot};
use crate::fetch::{CoverageService, FetchClient};
use crate::report::{self, ReportStatus};
use crate::resume::{ArtifactStore, FsArtifactStore, ResumeDecision, ResumeFilter};
use crate::source::{PolygonSource, RecordIter, SourceError};
use crate::storage;
use crate::worker_pool::{Abandoned, DEFAULT_ITEM_TIMEOUT, PoolConfig, WorkerPool};

const WRITE_PROBE_NAME: &str = ".coverage-fetch-write-probe";

/// Shared flag asking a running batch to stop reading input.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-request progress notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Started { expected: Option<u64> },
    /// A worker is sending the request for this polygon.
    RequestStarted { index: u64 },
    Completed { index: u64, path: PathBuf },
    Skipped { index: u64, path: PathBuf },
    Failed {
        index: u64,
        kind: ErrorKind,
        message: String,
    },
    /// Input reading stopped early; queued requests still finish.
    Interrupted,
    Done,
}

/// Final result of a batch.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub total: u64,
    pub report: ReportStatus,
    pub interrupted: bool,
    /// Failure records sorted by polygon index.
    pub failures: Vec<FailureRecord>,
}

impl BatchSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Errors that stop a batch from starting.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not start the input reader: {0}")]
    Reader(#[source] std::io::Error),
}

/// A request cleared for fetching, with the path its artifact goes to.
#[derive(Debug, Clone)]
struct Job {
    request: FetchRequest,
    path: PathBuf,
}

impl Job {
    fn abandoned(self, why: Abandoned) -> Outcome {
        let error = match why {
            Abandoned::TimedOut(_) => FetchError::transport(format!("request {}", why)),
            Abandoned::Panicked(_) => FetchError::internal(why.to_string()),
        };
        Outcome::failed(self.request.index, self.request.bbox, &error)
    }
}

/// What the reader decided about one record.
enum Intake {
    /// Settled without a request: invalid, duplicate or already present.
    Settled(Outcome),
    Fetch(Job),
    /// The cancel flag stopped reading.
    Interrupted,
    /// Every record was read.
    Finished,
}

/// Drives one batch from a prepared configuration.
pub struct BatchDriver<S, A = FsArtifactStore> {
    config: BatchConfig,
    client: Arc<FetchClient<S>>,
    resume: Arc<ResumeFilter<A>>,
    aggregator: Arc<Aggregator>,
    cancel: CancelFlag,
}

impl<S: CoverageService> BatchDriver<S, FsArtifactStore> {
    /// Validate `config` and make the output directory ready.
    ///
    /// Every configuration check runs before the filesystem is touched.
    /// The output directory is then created if needed, probed for
    /// writability, and cleared of partial files left by an interrupted
    /// run.
    pub fn prepare(config: BatchConfig, service: S) -> Result<Self, BatchError> {
        config.validate()?;
        let dir = &config.output_dir;
        ensure_writable(dir)?;

        let removed = storage::remove_partials(dir).map_err(|source| BatchError::Io {
            path: dir.clone(),
            source,
        })?;
        if removed > 0 {
            log::warn!("Removed {} partial file(s) from an interrupted run", removed);
        }

        let resume = ResumeFilter::new(dir);
        Ok(Self {
            config,
            client: Arc::new(FetchClient::new(service)),
            resume: Arc::new(resume),
            aggregator: Arc::new(Aggregator::new(None)),
            cancel: CancelFlag::new(),
        })
    }
}

impl<S: CoverageService, A: ArtifactStore> BatchDriver<S, A> {
    /// Use a different artifact store for resume checks.
    pub fn with_store<B: ArtifactStore>(self, store: B) -> BatchDriver<S, B> {
        BatchDriver {
            resume: Arc::new(ResumeFilter::with_store(&self.config.output_dir, store)),
            config: self.config,
            client: self.client,
            aggregator: self.aggregator,
            cancel: self.cancel,
        }
    }

    /// Live progress snapshots.
    pub fn progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.aggregator.subscribe()
    }

    /// Flag that stops the batch from reading further input.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Process every polygon in `source`.
    ///
    /// Per-request failures never end the run; they are counted, reported
    /// on `events`, and written to the failure report at the end.
    pub async fn run(
        self,
        source: &dyn PolygonSource,
        events: mpsc::UnboundedSender<BatchEvent>,
    ) -> Result<BatchSummary, BatchError> {
        let records = source.records()?;
        let expected = source.len_hint();
        self.aggregator.set_expected(expected);
        let _ = events.send(BatchEvent::Started { expected });

        let params = self.config.request_params();
        let item_timeout = (self.config.service.timeout() * 2).max(DEFAULT_ITEM_TIMEOUT);
        let pool_config = PoolConfig::new(self.config.workers)
            .pacing(self.config.sleep())
            .item_timeout(item_timeout);

        log::info!(
            "Starting batch: {} polygon(s), {} worker(s), {:.2}s between requests per worker",
            expected.map_or_else(|| "?".to_string(), |n| n.to_string()),
            pool_config.workers,
            self.config.sleep_secs
        );

        let client = self.client.clone();
        let worker_events = events.clone();
        let (submitter, mut pool) = WorkerPool::spawn(
            pool_config,
            move |job: Job| {
                let client = client.clone();
                let events = worker_events.clone();
                async move { process_job(&client, job, &events).await }
            },
            Job::abandoned,
        );

        let intake = spawn_reader(
            records,
            params,
            self.resume.clone(),
            self.cancel.clone(),
            pool_config.workers,
        )
        .map_err(BatchError::Reader)?;

        let aggregator = &self.aggregator;
        let cancel = &self.cancel;
        let events_ref = &events;

        let feeder = async {
            let submitter = submitter;
            let mut intake = intake;
            let mut finished = false;
            while let Some(next) = intake.recv().await {
                // Stop admitting as soon as cancellation is seen, even if
                // the reader has records buffered
                if cancel.is_cancelled() {
                    break;
                }
                let job = match next {
                    Intake::Settled(outcome) => {
                        aggregator.admit();
                        settle(aggregator, events_ref, outcome);
                        continue;
                    }
                    Intake::Fetch(job) => job,
                    Intake::Interrupted => break,
                    Intake::Finished => {
                        finished = true;
                        break;
                    }
                };
                aggregator.admit();
                if let Err(job) = submitter.submit(job).await {
                    let error = FetchError::internal("worker pool shut down before the request ran");
                    let outcome = Outcome::failed(job.request.index, job.request.bbox, &error);
                    settle(aggregator, events_ref, outcome);
                }
            }
            if !finished && !cancel.is_cancelled() {
                log::error!("Input reader stopped before the end of the source");
            }
            !finished
        };

        let collector = async {
            while let Some(outcome) = pool.recv().await {
                settle(aggregator, events_ref, outcome);
            }
        };

        let (interrupted, ()) = tokio::join!(feeder, collector);

        if interrupted {
            log::warn!(
                "Interrupted after admitting {} polygon(s); queued requests were completed",
                self.aggregator.snapshot().total
            );
            let _ = events.send(BatchEvent::Interrupted);
        }

        let failures = self.aggregator.take_failure_log();
        let report = match failures.write_to_dir(&self.config.output_dir) {
            Ok(status) => status,
            Err(e) => {
                log::error!("Could not write failure report: {}", e);
                ReportStatus::Unwritten {
                    path: report::report_path(&self.config.output_dir),
                    error: e.to_string(),
                }
            }
        };

        let snapshot = self.aggregator.snapshot();
        let mut failures = failures.into_records();
        failures.sort_by_key(|r| r.index);
        let _ = events.send(BatchEvent::Done);

        log::info!(
            "Batch finished: {} completed, {} skipped, {} failed, {} total",
            snapshot.completed,
            snapshot.skipped,
            snapshot.failed,
            snapshot.total
        );

        Ok(BatchSummary {
            completed: snapshot.completed,
            skipped: snapshot.skipped,
            failed: snapshot.failed,
            total: snapshot.total,
            report,
            interrupted,
            failures,
        })
    }
}

/// Read `records` on a dedicated thread, handing each verdict to the batch.
///
/// Source reads and artifact lookups block, so they stay off the runtime.
/// The channel holds `capacity` verdicts; the thread exits early when the
/// batch stops receiving.
fn spawn_reader<A: ArtifactStore>(
    records: RecordIter,
    params: RequestParams,
    resume: Arc<ResumeFilter<A>>,
    cancel: CancelFlag,
    capacity: usize,
) -> std::io::Result<mpsc::Receiver<Intake>> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    std::thread::Builder::new()
        .name("polygon-reader".to_string())
        .spawn(move || {
            let mut seen = HashSet::new();
            for record in records {
                if cancel.is_cancelled() {
                    let _ = tx.blocking_send(Intake::Interrupted);
                    return;
                }
                let next = examine(&record, &params, &resume, &mut seen);
                if tx.blocking_send(next).is_err() {
                    return; // Batch stopped receiving
                }
            }
            let _ = tx.blocking_send(Intake::Finished);
        })?;
    Ok(rx)
}

/// Decide what one record needs. `seen` holds every index already claimed
/// by an earlier record, so no two polygons share an artifact path.
fn examine<A: ArtifactStore>(
    record: &PolygonRecord,
    params: &RequestParams,
    resume: &ResumeFilter<A>,
    seen: &mut HashSet<u64>,
) -> Intake {
    let request = match FetchRequest::build(record, params) {
        Ok(request) => request,
        Err(e) => {
            return Intake::Settled(Outcome::failed(record.index, record.bbox, &FetchError::from(e)));
        }
    };
    if !seen.insert(request.index) {
        let error = FetchError::from(ValidationError::DuplicateIndex {
            index: request.index,
        });
        return Intake::Settled(Outcome::failed(request.index, request.bbox, &error));
    }
    match resume.check(&request) {
        ResumeDecision::Satisfied(path) => {
            log::debug!("Polygon {}: {} exists, skipping", request.index, path.display());
            Intake::Settled(Outcome::Skipped {
                index: request.index,
                path,
            })
        }
        ResumeDecision::Pending(path) => Intake::Fetch(Job { request, path }),
    }
}

/// Fetch one request and write its artifact.
async fn process_job<S: CoverageService>(
    client: &FetchClient<S>,
    job: Job,
    events: &mpsc::UnboundedSender<BatchEvent>,
) -> Outcome {
    let Job { request, path } = job;
    let index = request.index;
    let _ = events.send(BatchEvent::RequestStarted { index });
    log::debug!("Polygon {}: requesting {}x{} px", index, request.width, request.height);

    let bytes = match client.fetch(&request).await {
        Ok(bytes) => bytes,
        Err(e) => return Outcome::failed(index, request.bbox, &e),
    };

    let write_path = path.clone();
    let written = tokio::task::spawn_blocking(move || storage::write_atomic(&write_path, &bytes)).await;
    match written {
        Ok(Ok(bytes)) => Outcome::Completed { index, path, bytes },
        Ok(Err(e)) => Outcome::failed(index, request.bbox, &FetchError::storage(path, e)),
        Err(e) => Outcome::failed(
            index,
            request.bbox,
            &FetchError::internal(format!("write task failed: {}", e)),
        ),
    }
}

/// Record an outcome and announce it.
fn settle(aggregator: &Aggregator, events: &mpsc::UnboundedSender<BatchEvent>, outcome: Outcome) {
    let event = match &outcome {
        Outcome::Completed { index, path, bytes } => {
            log::debug!("Polygon {}: wrote {} bytes to {}", index, bytes, path.display());
            BatchEvent::Completed {
                index: *index,
                path: path.clone(),
            }
        }
        Outcome::Skipped { index, path } => BatchEvent::Skipped {
            index: *index,
            path: path.clone(),
        },
        Outcome::Failed {
            index,
            kind,
            message,
            ..
        } => {
            log::warn!("Polygon {} failed ({}): {}", index, kind, message);
            BatchEvent::Failed {
                index: *index,
                kind: *kind,
                message: message.clone(),
            }
        }
    };
    aggregator.record(&outcome);
    let _ = events.send(event);
}

/// Create `dir` if needed and check that files can be created in it.
fn ensure_writable(dir: &Path) -> Result<(), ConfigError> {
    let not_writable = |source| ConfigError::OutputNotWritable {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(not_writable)?;
    let probe = dir.join(WRITE_PROBE_NAME);
    fs::write(&probe, b"").map_err(not_writable)?;
    fs::remove_file(&probe).map_err(not_writable)?;
    Ok(())
}
