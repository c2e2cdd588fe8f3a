//! Driving a batch while draining its event channel.
//!
//! Front ends run the batch future and render its events at the same time.
//! Rendering never feeds back into the batch: a slow consumer only delays
//! its own output.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// How long to keep draining after the task has finished. Bounds the wait
/// if some sender clone outlives the task.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `task` to completion, calling `on_event` for every event received on
/// `event_rx`, then drain what is left and return the task's result.
pub async fn run_with_events<F, E, R>(
    task: F,
    mut event_rx: mpsc::UnboundedReceiver<E>,
    mut on_event: impl FnMut(E),
) -> R
where
    F: Future<Output = R>,
{
    tokio::pin!(task);
    let mut received: u64 = 0;

    let result = loop {
        tokio::select! {
            r = &mut task => break Some(r),
            event = event_rx.recv() => match event {
                Some(e) => {
                    received += 1;
                    on_event(e);
                }
                None => break None,
            },
        }
    };

    let result = match result {
        Some(r) => {
            let deadline = Instant::now() + DRAIN_TIMEOUT;
            loop {
                match tokio::time::timeout_at(deadline, event_rx.recv()).await {
                    Ok(Some(e)) => {
                        received += 1;
                        on_event(e);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        log::warn!(
                            "Event drain timed out after {}s; senders still alive",
                            DRAIN_TIMEOUT.as_secs()
                        );
                        break;
                    }
                }
            }
            r
        }
        // All senders gone before the task finished
        None => task.await,
    };

    log::debug!("run_with_events: {} events handled", received);
    result
}
