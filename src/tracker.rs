//! Movement hysteresis.
//!
//! Raw per-frame motion booleans flicker. The tracker debounces them into a
//! single `continuous_movement` signal with three one-shot timers:
//!
//! - confirm: motion must persist this long before it counts as continuous.
//! - tolerance: a short gap during confirmation that cancels the pending
//!   confirm instead of restarting it silently.
//! - absence: stillness must persist this long before continuous movement
//!   is declared over.
//!
//! Timers are plain `Instant` deadlines polled on each sample, so the state
//! machine is deterministic under test without real sleeps.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::scheduler::StopToken;
use crate::signal::Signal;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackerParams {
    /// How long motion must persist before it is confirmed continuous.
    pub present_threshold: Duration,
    /// How long stillness must persist before continuous movement ends.
    pub absence_threshold: Duration,
    /// Grace period for gaps while confirmation is pending.
    pub tolerance: Duration,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            present_threshold: Duration::from_millis(10_000),
            absence_threshold: Duration::from_millis(3_000),
            tolerance: Duration::from_millis(1_000),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    PendingConfirm,
    Continuous,
}

pub struct MovementTracker {
    params: TrackerParams,
    continuous: bool,
    confirm_deadline: Option<Instant>,
    tolerance_deadline: Option<Instant>,
    absence_deadline: Option<Instant>,
    pub continuous_movement: Signal<bool>,
}

impl MovementTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            params,
            continuous: false,
            confirm_deadline: None,
            tolerance_deadline: None,
            absence_deadline: None,
            continuous_movement: Signal::new(),
        }
    }

    pub fn state(&self) -> TrackerState {
        if self.continuous {
            TrackerState::Continuous
        } else if self.confirm_deadline.is_some() {
            TrackerState::PendingConfirm
        } else {
            TrackerState::Idle
        }
    }

    /// Feed one debounce input. `now` is passed explicitly so the machine
    /// can be driven by a synthetic clock.
    pub fn on_sample(&mut self, motion: bool, now: Instant) {
        self.poll_timers(now);
        if motion {
            self.absence_deadline = None;
            self.tolerance_deadline = None;
            if self.continuous {
                return;
            }
            if self.confirm_deadline.is_none() {
                self.confirm_deadline = Some(now + self.params.present_threshold);
            }
        } else {
            if self.continuous {
                if self.absence_deadline.is_none() {
                    self.absence_deadline = Some(now + self.params.absence_threshold);
                }
            } else if self.tolerance_deadline.is_none() {
                self.tolerance_deadline = Some(now + self.params.tolerance);
            }
        }
    }

    /// Fire every deadline that has passed, earliest first.
    pub fn poll_timers(&mut self, now: Instant) {
        loop {
            let due = [
                self.tolerance_deadline,
                self.confirm_deadline,
                self.absence_deadline,
            ]
            .into_iter()
            .flatten()
            .filter(|&d| d <= now)
            .min();
            let Some(deadline) = due else { break };

            if self.tolerance_deadline == Some(deadline) {
                // A gap outlasted the grace period: abandon confirmation.
                self.tolerance_deadline = None;
                self.confirm_deadline = None;
            } else if self.confirm_deadline == Some(deadline) {
                self.confirm_deadline = None;
                self.tolerance_deadline = None;
                if !self.continuous {
                    self.continuous = true;
                    log::info!("continuous movement started");
                    self.continuous_movement.emit(true);
                }
            } else if self.absence_deadline == Some(deadline) {
                self.absence_deadline = None;
                if self.continuous {
                    self.continuous = false;
                    log::info!("continuous movement ended");
                    self.continuous_movement.emit(false);
                }
            }
        }
    }

    /// Earliest armed deadline, if any. Drives the worker's wait bound.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.tolerance_deadline,
            self.confirm_deadline,
            self.absence_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Cancel all timers and declare movement over. Always announces the
    /// stopped state so consumers resynchronize even from Idle.
    pub fn stop_timers(&mut self) {
        self.confirm_deadline = None;
        self.tolerance_deadline = None;
        self.absence_deadline = None;
        self.continuous = false;
        self.continuous_movement.emit(false);
    }

    /// Replace thresholds. Stale deadlines from the old thresholds would be
    /// meaningless, so tracking restarts from idle.
    pub fn reconfigure(&mut self, params: TrackerParams) {
        self.stop_timers();
        self.params = params;
    }
}

/// Tracker plus its inbound sample channel, run on a scheduler worker.
pub struct TrackerWorker {
    pub tracker: MovementTracker,
    pub samples: Receiver<bool>,
}

/// Blocking loop: waits for samples but never sleeps past the tracker's
/// next deadline, so timers fire on time even when frames stop arriving.
pub fn run_loop(worker: &mut TrackerWorker, token: StopToken) {
    while !token.is_stopped() {
        let now = Instant::now();
        worker.tracker.poll_timers(now);
        let wait = worker
            .tracker
            .next_deadline()
            .map(|d| d.saturating_duration_since(now))
            .unwrap_or(IDLE_POLL_INTERVAL)
            .min(IDLE_POLL_INTERVAL);
        match worker.samples.recv_timeout(wait) {
            Ok(motion) => worker.tracker.on_sample(motion, Instant::now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
