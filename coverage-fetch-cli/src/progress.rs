//! Live progress for a running batch.
//!
//! One overall bar shows processed polygons against the expected count,
//! with completed, skipped and failed tallies in its message. Below it, a
//! fixed number of spinner "slots" show which polygon each worker is
//! fetching. Slots are claimed and released by polygon index.

use std::collections::HashMap;
use std::time::Duration;

use coverage_fetch_lib::{BatchEvent, ProgressSnapshot};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const TICK: Duration = Duration::from_millis(100);

pub(crate) struct ProgressDisplay {
    #[allow(dead_code)]
    mp: MultiProgress,
    overall: ProgressBar,
    spinners: Vec<ProgressBar>,
    slot_assignments: HashMap<u64, usize>,
    free_slots: Vec<usize>,
    interrupted: bool,
}

impl ProgressDisplay {
    /// Create a display with one spinner slot per worker.
    ///
    /// When `quiet` is true, nothing is drawn.
    pub(crate) fn new(workers: usize, expected: Option<u64>, quiet: bool) -> Self {
        let mp = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };

        let overall = match expected {
            Some(len) => {
                let pb = mp.add(ProgressBar::new(len));
                pb.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                    )
                    .expect("static pattern")
                    .progress_chars("=> "),
                );
                pb
            }
            None => {
                let pb = mp.add(ProgressBar::new_spinner());
                pb.set_style(
                    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} {msg}")
                        .expect("static pattern"),
                );
                pb
            }
        };
        overall.enable_steady_tick(TICK);

        let spinner_style = ProgressStyle::with_template("  {spinner:.cyan} {msg}")
            .expect("static pattern")
            .tick_chars("/-\\|");
        let spinners: Vec<ProgressBar> = (0..workers)
            .map(|_| {
                let pb = mp.add(ProgressBar::new_spinner());
                pb.set_style(spinner_style.clone());
                pb
            })
            .collect();
        let free_slots = (0..workers).rev().collect();

        let display = Self {
            mp,
            overall,
            spinners,
            slot_assignments: HashMap::new(),
            free_slots,
            interrupted: false,
        };
        display.refresh(ProgressSnapshot {
            expected,
            ..Default::default()
        });
        display
    }

    /// Apply one batch event, then redraw the totals from `snapshot`.
    pub(crate) fn handle(&mut self, event: &BatchEvent, snapshot: ProgressSnapshot) {
        match event {
            BatchEvent::RequestStarted { index } => self.claim(*index),
            BatchEvent::Completed { index, .. } | BatchEvent::Failed { index, .. } => {
                self.release(*index)
            }
            BatchEvent::Interrupted => self.interrupted = true,
            BatchEvent::Started { .. } | BatchEvent::Skipped { .. } | BatchEvent::Done => {}
        }
        self.refresh(snapshot);
    }

    fn refresh(&self, snapshot: ProgressSnapshot) {
        self.overall.set_position(snapshot.processed());
        let mut msg = format!(
            "\u{2713}{} \u{23ED}{} \u{2717}{}",
            snapshot.completed, snapshot.skipped, snapshot.failed
        );
        if self.interrupted {
            msg.push_str(" (interrupted, finishing queued requests)");
        }
        self.overall.set_message(msg);
    }

    fn claim(&mut self, index: u64) {
        if let Some(slot) = self.free_slots.pop() {
            self.spinners[slot].reset();
            self.spinners[slot].enable_steady_tick(TICK);
            self.spinners[slot].set_message(format!("Fetching polygon {}", index));
            self.slot_assignments.insert(index, slot);
        }
    }

    fn release(&mut self, index: u64) {
        if let Some(slot) = self.slot_assignments.remove(&index) {
            self.spinners[slot].disable_steady_tick();
            self.spinners[slot].set_message("");
            self.spinners[slot].finish_and_clear();
            self.free_slots.push(slot);
        }
    }

    /// Clear every line.
    pub(crate) fn finish(&mut self) {
        for spinner in &self.spinners {
            spinner.disable_steady_tick();
            spinner.finish_and_clear();
        }
        self.slot_assignments.clear();
        self.free_slots = (0..self.spinners.len()).rev().collect();
        self.overall.finish_and_clear();
    }
}
