//! Runtime configuration.

use std::time::Duration;

pub use crate::gc::scheduler::SchedulerConfig;

/// Default heap limit: 1 GiB.
pub const DEFAULT_MAX_HEAP_BYTES: usize = 1 << 30;

/// Configuration of a [`Runtime`](crate::Runtime).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stw_gc::GcConfig;
///
/// let config = GcConfig::default()
///     .with_max_heap_bytes(64 * 1024 * 1024)
///     .with_target_heap_bytes(8 * 1024 * 1024)
///     .with_regular_gc_interval(Duration::from_secs(10));
/// assert_eq!(config.scheduler.target_heap_bytes, 8 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcConfig {
    /// Hard limit on collectable bytes; allocations past it trigger a
    /// collection and fail with `OutOfMemory` if it does not help.
    pub max_heap_bytes: usize,
    /// Collection triggers.
    pub scheduler: SchedulerConfig,
    /// Run finalizers on a dedicated thread. When `false` they run on the
    /// GC thread right after the cycle.
    pub finalizer_thread: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_heap_bytes: DEFAULT_MAX_HEAP_BYTES,
            scheduler: SchedulerConfig::default(),
            finalizer_thread: true,
        }
    }
}

impl GcConfig {
    /// Set the heap limit.
    #[must_use]
    pub const fn with_max_heap_bytes(mut self, bytes: usize) -> Self {
        self.max_heap_bytes = bytes;
        self
    }

    /// Replace the scheduler configuration.
    #[must_use]
    pub const fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Set the initial heap target.
    #[must_use]
    pub const fn with_target_heap_bytes(mut self, bytes: usize) -> Self {
        self.scheduler.target_heap_bytes = bytes;
        self
    }

    /// Enable or disable auto-tuning of the heap target.
    #[must_use]
    pub const fn with_auto_tune(mut self, auto_tune: bool) -> Self {
        self.scheduler.auto_tune = auto_tune;
        self
    }

    /// Run a collection at least every `interval`.
    #[must_use]
    pub const fn with_regular_gc_interval(mut self, interval: Duration) -> Self {
        self.scheduler.regular_gc_interval = Some(interval);
        self
    }

    /// Choose where finalizers run.
    #[must_use]
    pub const fn with_finalizer_thread(mut self, enabled: bool) -> Self {
        self.finalizer_thread = enabled;
        self
    }
}
