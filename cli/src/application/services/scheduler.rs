//! Application service — round-robin driver for active test runs.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::MissedTickBehavior;

use crate::application::services::engine::{RunState, TestRun};
use crate::domain::result::TestResult;

/// Owns active runs and ticks each of them once per interval.
pub struct Scheduler {
    interval: Duration,
    active: Vec<TestRun>,
    results: Vec<TestResult>,
}

impl Scheduler {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Add a run. Runs that already finished during launch are collected
    /// immediately.
    pub fn add(&mut self, mut run: TestRun) {
        if run.is_finished() {
            self.collect(&mut run);
        } else {
            self.active.push(run);
        }
    }

    /// Record an already-known result, e.g. for a test that never launched.
    pub fn add_result(&mut self, result: TestResult) {
        self.results.push(result);
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    /// Cancel every active run; each finishes on its next tick.
    pub fn cancel_all(&self) {
        for run in &self.active {
            run.cancel();
        }
    }

    /// Tick every active run once and retire the finished ones. Returns the
    /// number still active.
    pub fn tick(&mut self) -> usize {
        let mut still_active = Vec::with_capacity(self.active.len());
        for mut run in std::mem::take(&mut self.active) {
            match run.tick() {
                RunState::Running => still_active.push(run),
                RunState::Finished => self.collect(&mut run),
            }
        }
        self.active = still_active;
        self.active.len()
    }

    fn collect(&mut self, run: &mut TestRun) {
        if let Some(result) = run.take_result() {
            tracing::debug!(test = %result.test, outcome = %result.outcome, "run retired");
            self.results.push(result);
        }
    }

    /// Results gathered so far, in completion order.
    #[must_use]
    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// Tick until no run is active and return every result.
    pub async fn run_to_completion(self) -> Vec<TestResult> {
        self.drive(futures::stream::empty::<Result<TestRun, TestResult>>())
            .await
    }

    /// Keep ticking active runs while `launches` resolve, so a launch waiting
    /// for devices does not stall the runs that hold them. A launch that never
    /// started yields its result directly. Returns once every launch has
    /// resolved and no run is active.
    pub async fn drive<S>(mut self, mut launches: S) -> Vec<TestResult>
    where
        S: Stream<Item = Result<TestRun, TestResult>> + Unpin,
    {
        let mut interval = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut launching = true;
        while launching || !self.is_idle() {
            tokio::select! {
                next = launches.next(), if launching => match next {
                    Some(Ok(run)) => self.add(run),
                    Some(Err(result)) => self.add_result(result),
                    None => launching = false,
                },
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }
        self.results
    }
}
