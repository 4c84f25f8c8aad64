//! Epoch and phase state shared between mutators and the GC thread.
//!
//! Epochs are numbered from 1. A request is answered with the epoch whose
//! completion will satisfy it; repeated requests before that cycle starts
//! coalesce into the same epoch.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Phase of the collector as seen by mutators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcPhase {
    /// No cycle running.
    #[default]
    Idle,
    /// Mark pass in progress.
    Marking,
    /// Sweep in progress.
    Sweeping,
}

/// Outcome of [`GcStateHolder::wait_scheduled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleWait {
    /// A cycle for this epoch should start.
    Scheduled(u64),
    /// The timeout elapsed without a request.
    TimedOut,
    /// The holder was shut down.
    Shutdown,
}

#[derive(Debug, Default)]
struct EpochState {
    scheduled: u64,
    started: u64,
    finished: u64,
    phase: GcPhase,
    shutdown: bool,
}

/// Shared GC epoch state.
#[derive(Debug, Default)]
pub struct GcStateHolder {
    state: Mutex<EpochState>,
    changed: Condvar,
}

impl GcStateHolder {
    /// Fresh state: nothing scheduled, nothing run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cycle. Returns the epoch that will satisfy the request.
    ///
    /// A cycle already in progress may have missed objects that became
    /// garbage after it started, so the request goes to the next one.
    pub fn schedule(&self) -> u64 {
        let mut state = self.state.lock();
        if state.scheduled <= state.started {
            state.scheduled = state.started + 1;
            self.changed.notify_all();
        }
        state.scheduled
    }

    /// Block until a cycle is requested, the timeout elapses, or shutdown.
    pub fn wait_scheduled(&self, timeout: Option<Duration>) -> ScheduleWait {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return ScheduleWait::Shutdown;
            }
            if state.scheduled > state.started {
                return ScheduleWait::Scheduled(state.scheduled);
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        if state.shutdown {
                            return ScheduleWait::Shutdown;
                        }
                        if state.scheduled > state.started {
                            return ScheduleWait::Scheduled(state.scheduled);
                        }
                        return ScheduleWait::TimedOut;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
    }

    /// Record that the cycle for `epoch` has started.
    ///
    /// # Panics
    ///
    /// Panics if `epoch` does not advance past the last started epoch.
    pub fn start(&self, epoch: u64) {
        let mut state = self.state.lock();
        assert!(
            epoch > state.started,
            "epoch {epoch} started after epoch {}",
            state.started
        );
        state.started = epoch;
        state.scheduled = state.scheduled.max(epoch);
        state.phase = GcPhase::Marking;
        self.changed.notify_all();
    }

    /// Update the phase of the running cycle.
    pub fn set_phase(&self, phase: GcPhase) {
        self.state.lock().phase = phase;
    }

    /// Publish `epoch` as completed and wake every waiter.
    ///
    /// # Panics
    ///
    /// Panics if `epoch` was not the last started epoch.
    pub fn finish(&self, epoch: u64) {
        let mut state = self.state.lock();
        assert_eq!(epoch, state.started, "finishing an epoch that was not started");
        state.finished = epoch;
        state.phase = GcPhase::Idle;
        self.changed.notify_all();
    }

    /// Block until `epoch` is completed.
    ///
    /// Returns `false` if the holder shut down first.
    pub fn wait_epoch_finished(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        while state.finished < epoch {
            if state.shutdown {
                return false;
            }
            self.changed.wait(&mut state);
        }
        true
    }

    /// Stop accepting work and wake every waiter.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.changed.notify_all();
    }

    /// Whether [`Self::shutdown`] was called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Last requested epoch.
    #[must_use]
    pub fn scheduled_epoch(&self) -> u64 {
        self.state.lock().scheduled
    }

    /// Last started epoch.
    #[must_use]
    pub fn started_epoch(&self) -> u64 {
        self.state.lock().started
    }

    /// Last completed epoch.
    #[must_use]
    pub fn finished_epoch(&self) -> u64 {
        self.state.lock().finished
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> GcPhase {
        self.state.lock().phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_schedule_coalesces() {
        let state = GcStateHolder::new();
        assert_eq!(state.schedule(), 1);
        assert_eq!(state.schedule(), 1);
        assert_eq!(state.wait_scheduled(None), ScheduleWait::Scheduled(1));
    }

    #[test]
    fn test_schedule_during_cycle_targets_next_epoch() {
        let state = GcStateHolder::new();
        let epoch = state.schedule();
        state.start(epoch);
        assert_eq!(state.phase(), GcPhase::Marking);

        assert_eq!(state.schedule(), 2);
        state.finish(epoch);
        assert_eq!(state.finished_epoch(), 1);
        assert_eq!(state.phase(), GcPhase::Idle);
        assert_eq!(state.wait_scheduled(None), ScheduleWait::Scheduled(2));
    }

    #[test]
    fn test_wait_scheduled_times_out() {
        let state = GcStateHolder::new();
        assert_eq!(
            state.wait_scheduled(Some(Duration::from_millis(10))),
            ScheduleWait::TimedOut
        );
    }

    #[test]
    fn test_wait_epoch_finished_wakes() {
        let state = Arc::new(GcStateHolder::new());
        let epoch = state.schedule();

        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_epoch_finished(epoch))
        };

        state.start(epoch);
        state.finish(epoch);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_shutdown_releases_waiters() {
        let state = Arc::new(GcStateHolder::new());

        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_epoch_finished(5))
        };

        state.shutdown();
        assert!(!waiter.join().unwrap());
        assert_eq!(state.wait_scheduled(None), ScheduleWait::Shutdown);
    }

    #[test]
    #[should_panic(expected = "not started")]
    fn test_finish_unstarted_panics() {
        let state = GcStateHolder::new();
        state.finish(1);
    }
}
