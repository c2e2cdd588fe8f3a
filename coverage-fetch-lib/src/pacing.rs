//! Per-worker request pacing.

use tokio::time::{Duration, Instant};

/// Keeps consecutive requests on one worker at least `interval` apart.
///
/// The pause is measured from the end of the previous request, so a worker's
/// first request goes out immediately and later ones wait out whatever part
/// of the interval has not already passed.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last_finished: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_finished: None,
        }
    }

    /// Wait until the next request may be issued.
    pub async fn ready(&mut self) {
        if self.interval.is_zero() {
            return;
        }
        if let Some(last) = self.last_finished {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
    }

    /// Mark the current request as finished.
    pub fn finished(&mut self) {
        self.last_finished = Some(Instant::now());
    }
}
