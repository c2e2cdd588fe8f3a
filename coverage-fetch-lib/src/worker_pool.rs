//! Worker pool for concurrent processing with backpressure.
//!
//! Spawns N persistent tokio tasks that pull work items from a bounded
//! async-channel. Results are sent to an unbounded channel for consumption
//! by the caller.
//!
//! Uses `async-channel` for work distribution: its `Receiver` is `Clone`,
//! so each worker gets its own handle and an item is delivered to exactly
//! one worker.
//!
//! Every submitted item yields exactly one result. If processing panics or
//! runs past the per-item timeout, the worker asks `on_abandoned` to turn
//! the item into a result and moves on to the next one.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::pacing::Pacer;

/// Hard upper bound on a single item. Set well above the transport timeout
/// so it only fires when something below it failed to time out.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    /// Minimum pause between consecutive items on one worker.
    pub pacing: Duration,
    pub item_timeout: Duration,
}

impl PoolConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            pacing: Duration::ZERO,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
        }
    }

    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }
}

/// Why a worker gave up on an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Abandoned {
    TimedOut(Duration),
    Panicked(String),
}

impl std::fmt::Display for Abandoned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut(d) => write!(f, "abandoned after {}s without a response", d.as_secs()),
            Self::Panicked(msg) => write!(f, "worker panicked: {}", msg),
        }
    }
}

/// Feeds items to the workers. Dropping every `Submitter` closes the queue;
/// workers finish what is queued and then exit.
#[derive(Debug)]
pub struct Submitter<W> {
    work_tx: async_channel::Sender<W>,
}

impl<W> Clone for Submitter<W> {
    fn clone(&self) -> Self {
        Self {
            work_tx: self.work_tx.clone(),
        }
    }
}

impl<W> Submitter<W> {
    /// Queue an item, waiting while the queue is full. Returns the item back
    /// if every worker has exited.
    pub async fn submit(&self, item: W) -> Result<(), W> {
        self.work_tx.send(item).await.map_err(|e| e.into_inner())
    }
}

/// A pool of worker tasks that process items concurrently.
///
/// # Example
///
/// ```ignore
/// let (submitter, mut pool) = WorkerPool::spawn(
///     PoolConfig::new(4),
///     |item| async move { process(item).await },
///     |item, why| give_up(item, why),
/// );
/// tokio::join!(
///     async move { for item in items { let _ = submitter.submit(item).await; } },
///     async { while let Some(result) = pool.recv().await { handle(result); } },
/// );
/// ```
pub struct WorkerPool<R: Send + 'static> {
    result_rx: mpsc::UnboundedReceiver<R>,
    _handles: Vec<JoinHandle<()>>,
}

impl<R: Send + 'static> WorkerPool<R> {
    /// Spawn `config.workers` workers and return the submission handle and
    /// the pool for receiving results.
    ///
    /// The work queue holds at most one item per worker, so submission
    /// blocks while every worker is busy.
    pub fn spawn<W, F, Fut, A>(config: PoolConfig, process_fn: F, on_abandoned: A) -> (Submitter<W>, Self)
    where
        W: Clone + Send + 'static,
        F: Fn(W) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        A: Fn(W, Abandoned) -> R + Send + Sync + 'static,
    {
        let workers = config.workers.max(1);
        let (work_tx, work_rx) = async_channel::bounded::<W>(workers);
        let (result_tx, result_rx) = mpsc::unbounded_channel::<R>();
        let process_fn = Arc::new(process_fn);
        let on_abandoned = Arc::new(on_abandoned);

        let handles = (0..workers)
            .map(|worker_id| {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let process_fn = process_fn.clone();
                let on_abandoned = on_abandoned.clone();
                tokio::spawn(async move {
                    let mut pacer = Pacer::new(config.pacing);
                    while let Ok(item) = work_rx.recv().await {
                        pacer.ready().await;
                        let snapshot = item.clone();
                        let work = AssertUnwindSafe(process_fn(item)).catch_unwind();
                        let result = match tokio::time::timeout(config.item_timeout, work).await {
                            Ok(Ok(r)) => r,
                            Ok(Err(panic)) => {
                                let msg = panic_message(panic.as_ref());
                                log::error!("Worker {}: item panicked: {}", worker_id, msg);
                                on_abandoned(snapshot, Abandoned::Panicked(msg))
                            }
                            Err(_) => {
                                log::warn!(
                                    "Worker {}: item timed out after {}s",
                                    worker_id,
                                    config.item_timeout.as_secs()
                                );
                                on_abandoned(snapshot, Abandoned::TimedOut(config.item_timeout))
                            }
                        };
                        pacer.finished();
                        if result_tx.send(result).is_err() {
                            break; // Receiver dropped
                        }
                    }
                    log::debug!("Worker {}: queue closed, exiting", worker_id);
                })
            })
            .collect();

        // Drop our copy of result_tx so the channel closes when all workers finish
        drop(result_tx);

        (
            Submitter { work_tx },
            Self {
                result_rx,
                _handles: handles,
            },
        )
    }

    /// Spawn a pool and submit `items` from a background task.
    pub fn start<W, I, F, Fut, A>(config: PoolConfig, items: I, process_fn: F, on_abandoned: A) -> Self
    where
        W: Clone + Send + 'static,
        I: IntoIterator<Item = W> + Send + 'static,
        I::IntoIter: Send,
        F: Fn(W) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        A: Fn(W, Abandoned) -> R + Send + Sync + 'static,
    {
        let (submitter, pool) = Self::spawn(config, process_fn, on_abandoned);
        tokio::spawn(async move {
            for item in items {
                if submitter.submit(item).await.is_err() {
                    break;
                }
            }
        });
        pool
    }

    /// Receive the next result. Returns `None` once the queue is closed and
    /// every worker has exited.
    pub async fn recv(&mut self) -> Option<R> {
        self.result_rx.recv().await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "tests/worker_pool_tests.rs"]
mod tests;
