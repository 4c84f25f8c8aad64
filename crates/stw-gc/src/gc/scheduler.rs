//! Decides when a collection is warranted.
//!
//! Two triggers: the heap growing past a target size, and an optional
//! regular interval since the last cycle. With auto-tuning the target is
//! recomputed from the alive set after each cycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::gc::state::GcStateHolder;

/// Default heap size that triggers a collection: 16 MiB.
pub const DEFAULT_TARGET_HEAP_BYTES: usize = 16 * 1024 * 1024;
/// Default lower bound of the auto-tuned target: 1 MiB.
pub const DEFAULT_MIN_HEAP_BYTES: usize = 1024 * 1024;
/// Default upper bound of the auto-tuned target: unbounded.
pub const DEFAULT_MAX_HEAP_BYTES: usize = usize::MAX;
/// Default share of the target expected to survive a collection.
pub const DEFAULT_TARGET_HEAP_UTILIZATION: f64 = 0.5;

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Heap size that triggers a collection.
    pub target_heap_bytes: usize,
    /// Recompute `target_heap_bytes` after every cycle.
    pub auto_tune: bool,
    /// Desired ratio of alive bytes to target heap when auto-tuning.
    pub target_heap_utilization: f64,
    /// Lower bound of the tuned target.
    pub min_heap_bytes: usize,
    /// Upper bound of the tuned target.
    pub max_heap_bytes: usize,
    /// Run a cycle at least this often, if set.
    pub regular_gc_interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_heap_bytes: DEFAULT_TARGET_HEAP_BYTES,
            auto_tune: true,
            target_heap_utilization: DEFAULT_TARGET_HEAP_UTILIZATION,
            min_heap_bytes: DEFAULT_MIN_HEAP_BYTES,
            max_heap_bytes: DEFAULT_MAX_HEAP_BYTES,
            regular_gc_interval: None,
        }
    }
}

/// GC scheduler built atop the shared [`GcStateHolder`].
#[derive(Debug)]
pub struct GcScheduler {
    config: SchedulerConfig,
    state: Arc<GcStateHolder>,
    target_heap_bytes: AtomicUsize,
    last_gc: Mutex<Instant>,
}

impl GcScheduler {
    /// Create a scheduler signalling through `state`.
    #[must_use]
    pub fn new(config: SchedulerConfig, state: Arc<GcStateHolder>) -> Self {
        Self {
            target_heap_bytes: AtomicUsize::new(config.target_heap_bytes),
            config,
            state,
            last_gc: Mutex::new(Instant::now()),
        }
    }

    /// Configuration this scheduler was created with.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current heap target.
    #[must_use]
    pub fn target_heap_bytes(&self) -> usize {
        self.target_heap_bytes.load(Ordering::Relaxed)
    }

    /// Request a cycle. Returns the epoch to wait for.
    pub fn schedule_gc(&self) -> u64 {
        self.state.schedule()
    }

    /// Called after every allocation with the current heap size.
    ///
    /// Requests a cycle and returns its epoch once the heap reached the target.
    pub fn on_allocation(&self, heap_bytes: usize) -> Option<u64> {
        if heap_bytes >= self.target_heap_bytes() {
            Some(self.schedule_gc())
        } else {
            None
        }
    }

    /// Called by the GC thread when a cycle finished with `alive_bytes` left.
    pub fn on_gc_finished(&self, alive_bytes: usize) {
        *self.last_gc.lock() = Instant::now();
        if !self.config.auto_tune {
            return;
        }
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let wanted = (alive_bytes as f64 / self.config.target_heap_utilization) as usize;
        let target = wanted.clamp(self.config.min_heap_bytes, self.config.max_heap_bytes);
        self.target_heap_bytes.store(target, Ordering::Relaxed);
    }

    /// Interval of the regular trigger, if enabled.
    #[must_use]
    pub const fn regular_interval(&self) -> Option<Duration> {
        self.config.regular_gc_interval
    }

    /// Whether the regular interval has elapsed since the last cycle.
    #[must_use]
    pub fn is_regular_gc_due(&self) -> bool {
        self.config
            .regular_gc_interval
            .is_some_and(|interval| self.last_gc.lock().elapsed() >= interval)
    }

    /// How long the GC thread may sleep before the regular trigger fires.
    #[must_use]
    pub fn time_until_regular_gc(&self) -> Option<Duration> {
        let interval = self.config.regular_gc_interval?;
        Some(interval.saturating_sub(self.last_gc.lock().elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(config: SchedulerConfig) -> GcScheduler {
        GcScheduler::new(config, Arc::new(GcStateHolder::new()))
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.target_heap_bytes, DEFAULT_TARGET_HEAP_BYTES);
        assert_eq!(config.min_heap_bytes, DEFAULT_MIN_HEAP_BYTES);
        assert_eq!(config.max_heap_bytes, DEFAULT_MAX_HEAP_BYTES);
        assert!(
            (config.target_heap_utilization - DEFAULT_TARGET_HEAP_UTILIZATION).abs() < f64::EPSILON
        );
        assert_eq!(config.regular_gc_interval, None);
        assert_eq!(scheduler(config).target_heap_bytes(), DEFAULT_TARGET_HEAP_BYTES);
    }

    #[test]
    fn test_collect_on_target_heap_reached() {
        let scheduler = scheduler(SchedulerConfig {
            target_heap_bytes: 10,
            ..SchedulerConfig::default()
        });

        assert_eq!(scheduler.on_allocation(9), None);
        assert_eq!(scheduler.on_allocation(10), Some(1));
        assert_eq!(scheduler.on_allocation(11), Some(1));
    }

    #[test]
    fn test_do_not_tune_target_heap() {
        let scheduler = scheduler(SchedulerConfig {
            target_heap_bytes: 10,
            auto_tune: false,
            ..SchedulerConfig::default()
        });

        scheduler.on_gc_finished(10);
        assert_eq!(scheduler.target_heap_bytes(), 10);
    }

    #[test]
    fn test_tune_target_heap() {
        let scheduler = scheduler(SchedulerConfig {
            target_heap_bytes: 10,
            auto_tune: true,
            target_heap_utilization: 0.5,
            min_heap_bytes: 5,
            max_heap_bytes: 50,
            regular_gc_interval: None,
        });

        scheduler.on_gc_finished(10);
        assert_eq!(scheduler.target_heap_bytes(), 20);

        scheduler.on_gc_finished(20);
        assert_eq!(scheduler.target_heap_bytes(), 40);

        scheduler.on_gc_finished(60);
        assert_eq!(scheduler.target_heap_bytes(), 50);

        scheduler.on_gc_finished(1);
        assert_eq!(scheduler.target_heap_bytes(), 5);
    }

    #[test]
    fn test_regular_interval() {
        let disabled = scheduler(SchedulerConfig::default());
        assert!(!disabled.is_regular_gc_due());
        assert_eq!(disabled.time_until_regular_gc(), None);

        let enabled = scheduler(SchedulerConfig {
            regular_gc_interval: Some(Duration::from_millis(1)),
            ..SchedulerConfig::default()
        });
        std::thread::sleep(Duration::from_millis(5));
        assert!(enabled.is_regular_gc_due());
        assert_eq!(enabled.time_until_regular_gc(), Some(Duration::ZERO));

        enabled.on_gc_finished(0);
        assert!(enabled.time_until_regular_gc().unwrap() <= Duration::from_millis(1));
    }
}
