//! Thread-safe tally of outcomes.
//!
//! Counters and the failure collection sit behind one lock, so a snapshot
//! never shows a failure count that disagrees with the collected records.
//! Every change is also published on a `watch` channel for progress
//! displays.

use std::sync::{Mutex, PoisonError};

use coverage_fetch_core::Outcome;
use tokio::sync::watch;

use crate::report::FailureLog;

/// Point-in-time view of batch progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Requests admitted into the batch so far.
    pub total: u64,
    /// Number of polygons the source expects to yield, if known.
    pub expected: Option<u64>,
}

impl ProgressSnapshot {
    pub fn processed(&self) -> u64 {
        self.completed + self.skipped + self.failed
    }

    /// Whether every admitted request has an outcome.
    pub fn is_complete(&self) -> bool {
        self.processed() == self.total
    }
}

#[derive(Debug, Default)]
struct Tally {
    snapshot: ProgressSnapshot,
    failures: FailureLog,
}

#[derive(Debug)]
pub struct Aggregator {
    tally: Mutex<Tally>,
    progress_tx: watch::Sender<ProgressSnapshot>,
}

impl Aggregator {
    pub fn new(expected: Option<u64>) -> Self {
        let snapshot = ProgressSnapshot {
            expected,
            ..Default::default()
        };
        let (progress_tx, _) = watch::channel(snapshot);
        Self {
            tally: Mutex::new(Tally {
                snapshot,
                failures: FailureLog::new(),
            }),
            progress_tx,
        }
    }

    /// Set how many polygons the source expects to yield.
    pub fn set_expected(&self, expected: Option<u64>) {
        self.update(|tally| tally.snapshot.expected = expected);
    }

    /// Count a request into the batch total.
    pub fn admit(&self) {
        self.update(|tally| tally.snapshot.total += 1);
    }

    /// Record the outcome of an admitted request.
    pub fn record(&self, outcome: &Outcome) {
        self.update(|tally| match outcome {
            Outcome::Completed { .. } => tally.snapshot.completed += 1,
            Outcome::Skipped { .. } => tally.snapshot.skipped += 1,
            Outcome::Failed { .. } => {
                tally.snapshot.failed += 1;
                if let Some(record) = outcome.failure_record() {
                    tally.failures.add(record);
                }
            }
        });
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().snapshot
    }

    /// Receiver that sees every later snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    /// Take the collected failures, leaving the collection empty.
    pub fn take_failure_log(&self) -> FailureLog {
        std::mem::take(&mut self.lock().failures)
    }

    fn update(&self, f: impl FnOnce(&mut Tally)) {
        let snapshot = {
            let mut tally = self.lock();
            f(&mut tally);
            tally.snapshot
        };
        self.progress_tx.send_replace(snapshot);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tally> {
        self.tally.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use coverage_fetch_core::{BoundingBox, FetchError};

    use super::*;

    fn completed(index: u64) -> Outcome {
        Outcome::Completed {
            index,
            path: PathBuf::from(format!("D_1.0m_{index}.tif")),
            bytes: 10,
        }
    }

    fn failed(index: u64) -> Outcome {
        Outcome::failed(
            index,
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            &FetchError::service("nope"),
        )
    }

    #[test]
    fn counts_each_outcome_once() {
        let agg = Aggregator::new(Some(3));
        for _ in 0..3 {
            agg.admit();
        }
        agg.record(&completed(0));
        agg.record(&Outcome::Skipped {
            index: 1,
            path: PathBuf::from("D_1.0m_1.tif"),
        });
        agg.record(&failed(2));

        let snap = agg.snapshot();
        assert_eq!(
            snap,
            ProgressSnapshot {
                completed: 1,
                skipped: 1,
                failed: 1,
                total: 3,
                expected: Some(3),
            }
        );
        assert!(snap.is_complete());

        let log = agg.take_failure_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].index, 2);
        assert!(agg.take_failure_log().is_empty());
    }

    #[test]
    fn concurrent_recording_is_exact() {
        let agg = Arc::new(Aggregator::new(None));
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for i in 0..250u64 {
                        let index = t * 1000 + i;
                        agg.admit();
                        if i % 10 == 0 {
                            agg.record(&failed(index));
                        } else {
                            agg.record(&completed(index));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = agg.snapshot();
        assert_eq!(snap.total, 2000);
        assert_eq!(snap.failed, 200);
        assert_eq!(snap.completed, 1800);
        assert!(snap.is_complete());
        assert_eq!(agg.take_failure_log().len(), 200);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let agg = Aggregator::new(Some(1));
        let mut rx = agg.subscribe();
        agg.admit();
        agg.record(&completed(0));
        rx.changed().await.unwrap();
        let snap = *rx.borrow_and_update();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.total, 1);
    }
}
