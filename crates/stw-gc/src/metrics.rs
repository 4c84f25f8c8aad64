//! GC metrics and statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Statistics from the most recent garbage collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcMetrics {
    /// Epoch completed by this collection.
    pub epoch: u64,
    /// Time mutators spent stopped, from safepoint request to resume.
    pub pause_duration: Duration,
    /// Duration of the mark phase.
    pub mark_duration: Duration,
    /// Duration of the sweep phase.
    pub sweep_duration: Duration,
    /// Root slots visited.
    pub roots_visited: usize,
    /// Number of objects marked.
    pub objects_marked: usize,
    /// Number of bytes reclaimed.
    pub bytes_reclaimed: usize,
    /// Number of bytes surviving.
    pub bytes_surviving: usize,
    /// Number of objects reclaimed.
    pub objects_reclaimed: usize,
    /// Number of objects surviving.
    pub objects_surviving: usize,
    /// Weak references cleared after the mark fixpoint.
    pub weak_refs_cleared: usize,
    /// Finalizers handed to the finalizer thread.
    pub finalizers_queued: usize,
    /// Finalizers run on the GC thread because the queue was full.
    pub finalizers_inline: usize,
    /// Heap target chosen by the scheduler after this collection.
    pub target_heap_bytes: usize,
    /// Total collections of this runtime, this one included.
    pub total_collections: usize,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// Create a new `GcMetrics` with all fields set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            epoch: 0,
            pause_duration: Duration::ZERO,
            mark_duration: Duration::ZERO,
            sweep_duration: Duration::ZERO,
            roots_visited: 0,
            objects_marked: 0,
            bytes_reclaimed: 0,
            bytes_surviving: 0,
            objects_reclaimed: 0,
            objects_surviving: 0,
            weak_refs_cleared: 0,
            finalizers_queued: 0,
            finalizers_inline: 0,
            target_heap_bytes: 0,
            total_collections: 0,
        }
    }
}

/// Internal helper for capturing phase durations.
///
/// # Example
///
/// ```
/// use stw_gc::metrics::PhaseTimer;
///
/// let mut timer = PhaseTimer::new();
/// timer.start();
/// // ... mark phase work ...
/// timer.end_mark();
///
/// timer.start();
/// // ... sweep phase work ...
/// timer.end_sweep();
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimer {
    /// Mark phase time.
    pub mark: Duration,
    /// Sweep phase time.
    pub sweep: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    /// Create a new `PhaseTimer` with all durations set to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mark: Duration::ZERO,
            sweep: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// End the mark phase and record its duration.
    pub fn end_mark(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.mark = start.elapsed();
        }
    }

    /// End the sweep phase and record its duration.
    pub fn end_sweep(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.sweep = start.elapsed();
        }
    }
}

/// Cumulative statistics of one runtime.
#[derive(Debug, Default)]
pub struct CumulativeMetrics {
    collections: AtomicUsize,
    bytes_reclaimed: AtomicUsize,
    objects_reclaimed: AtomicUsize,
    finalizers_run_inline: AtomicUsize,
    pause_ns: AtomicU64,
}

impl CumulativeMetrics {
    /// Create a new `CumulativeMetrics` with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            collections: AtomicUsize::new(0),
            bytes_reclaimed: AtomicUsize::new(0),
            objects_reclaimed: AtomicUsize::new(0),
            finalizers_run_inline: AtomicUsize::new(0),
            pause_ns: AtomicU64::new(0),
        }
    }

    /// Fold one collection into the totals. Returns the new collection count.
    pub(crate) fn record(&self, metrics: &GcMetrics) -> usize {
        self.bytes_reclaimed
            .fetch_add(metrics.bytes_reclaimed, Ordering::Relaxed);
        self.objects_reclaimed
            .fetch_add(metrics.objects_reclaimed, Ordering::Relaxed);
        self.finalizers_run_inline
            .fetch_add(metrics.finalizers_inline, Ordering::Relaxed);
        let pause_ns = u64::try_from(metrics.pause_duration.as_nanos()).unwrap_or(u64::MAX);
        self.pause_ns.fetch_add(pause_ns, Ordering::Relaxed);
        self.collections.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Total collections.
    #[must_use]
    pub fn total_collections(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    /// Total bytes reclaimed.
    #[must_use]
    pub fn total_bytes_reclaimed(&self) -> usize {
        self.bytes_reclaimed.load(Ordering::Relaxed)
    }

    /// Total objects reclaimed.
    #[must_use]
    pub fn total_objects_reclaimed(&self) -> usize {
        self.objects_reclaimed.load(Ordering::Relaxed)
    }

    /// Total finalizers run on the GC thread under backpressure.
    #[must_use]
    pub fn total_finalizers_run_inline(&self) -> usize {
        self.finalizers_run_inline.load(Ordering::Relaxed)
    }

    /// Total time mutators spent stopped.
    #[must_use]
    pub fn total_pause(&self) -> Duration {
        Duration::from_nanos(self.pause_ns.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gc_metrics_default_to_zero() {
        let metrics = GcMetrics::default();
        assert_eq!(metrics, GcMetrics::new());
        assert_eq!(metrics.total_collections, 0);
        assert_eq!(metrics.mark_duration, Duration::ZERO);
    }

    #[test]
    fn test_phase_timer_captures_durations() {
        let mut timer = PhaseTimer::new();

        timer.start();
        std::thread::sleep(Duration::from_millis(2));
        timer.end_mark();

        timer.start();
        timer.end_sweep();

        assert!(timer.mark >= Duration::from_millis(2));
        assert!(timer.sweep < timer.mark);
    }

    #[test]
    fn test_end_without_start_is_ignored() {
        let mut timer = PhaseTimer::new();
        timer.end_mark();
        assert_eq!(timer.mark, Duration::ZERO);
    }

    #[test]
    fn test_cumulative_record() {
        let totals = CumulativeMetrics::new();
        let metrics = GcMetrics {
            bytes_reclaimed: 64,
            objects_reclaimed: 2,
            finalizers_inline: 1,
            pause_duration: Duration::from_micros(5),
            ..GcMetrics::new()
        };

        assert_eq!(totals.record(&metrics), 1);
        assert_eq!(totals.record(&metrics), 2);
        assert_eq!(totals.total_collections(), 2);
        assert_eq!(totals.total_bytes_reclaimed(), 128);
        assert_eq!(totals.total_objects_reclaimed(), 4);
        assert_eq!(totals.total_finalizers_run_inline(), 2);
        assert_eq!(totals.total_pause(), Duration::from_micros(10));
    }
}
