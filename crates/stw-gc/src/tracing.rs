//! GC tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for garbage collection operations. Without it
//! every helper is a no-op, so call sites need no `cfg`.

#[cfg(feature = "tracing")]
pub mod internal {
    use tracing::{span, Level};

    use crate::metrics::GcMetrics;
    use crate::object::ObjRef;

    /// Mark and sweep.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Trace live object graph.
        Mark,
        /// Reclaim unreachable objects.
        Sweep,
    }

    /// Create a span for one GC cycle. Every event of the cycle nests in it.
    pub fn trace_gc_cycle(epoch: u64) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_cycle", epoch).entered()
    }

    /// Create a span for a GC phase.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Log the start of a GC phase.
    pub fn log_phase_start(phase: GcPhase, bytes_before: usize) {
        tracing::debug!(phase = ?phase, bytes_before, "phase_start");
    }

    /// Log the end of a GC phase.
    pub fn log_phase_end(phase: GcPhase, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_end");
    }

    /// Log the summary of a finished cycle.
    pub fn log_cycle_end(metrics: &GcMetrics) {
        tracing::debug!(
            epoch = metrics.epoch,
            pause_us = u64::try_from(metrics.pause_duration.as_micros()).unwrap_or(u64::MAX),
            objects_marked = metrics.objects_marked,
            objects_reclaimed = metrics.objects_reclaimed,
            bytes_reclaimed = metrics.bytes_reclaimed,
            bytes_surviving = metrics.bytes_surviving,
            target_heap_bytes = metrics.target_heap_bytes,
            "gc_cycle_end"
        );
    }

    /// Log an allocation failure that triggers a collection.
    pub fn log_out_of_memory(requested: usize, allocated: usize, limit: usize) {
        tracing::debug!(requested, allocated, limit, "allocation_failed");
    }

    /// Log a stale handle reached during mark. It is skipped.
    pub fn log_dangling_reference(obj: ObjRef) {
        tracing::warn!(obj = ?obj, "dangling reference reached during mark, skipping");
    }

    /// Log a finalizer run on the GC thread because the queue was full.
    pub fn log_finalizer_backpressure(type_name: &str) {
        tracing::warn!(type_name, "finalizer queue full, running finalizer inline");
    }

    /// Log a finalizer that panicked.
    pub fn log_finalizer_panic(type_name: &str) {
        tracing::error!(type_name, "finalizer panicked");
    }

    /// Log a panic on the GC thread right before the process aborts.
    pub fn log_fatal(message: &str) {
        tracing::error!(message, "fatal error on GC thread, aborting");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    use crate::metrics::GcMetrics;
    use crate::object::ObjRef;

    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Trace live object graph.
        Mark,
        /// Reclaim unreachable objects.
        Sweep,
    }

    /// Stub function when tracing is disabled.
    pub const fn trace_gc_cycle(_epoch: u64) {}

    /// Stub function when tracing is disabled.
    pub const fn trace_phase(_phase: GcPhase) {}

    /// Stub function when tracing is disabled.
    pub const fn log_phase_start(_phase: GcPhase, _bytes_before: usize) {}

    /// Stub function when tracing is disabled.
    pub const fn log_phase_end(_phase: GcPhase, _objects: usize) {}

    /// Stub function when tracing is disabled.
    pub const fn log_cycle_end(_metrics: &GcMetrics) {}

    /// Stub function when tracing is disabled.
    pub const fn log_out_of_memory(_requested: usize, _allocated: usize, _limit: usize) {}

    /// Stub function when tracing is disabled.
    pub const fn log_dangling_reference(_obj: ObjRef) {}

    /// Stub function when tracing is disabled.
    pub const fn log_finalizer_backpressure(_type_name: &str) {}

    /// Stub function when tracing is disabled.
    pub const fn log_finalizer_panic(_type_name: &str) {}

    /// Stub function when tracing is disabled.
    pub const fn log_fatal(_message: &str) {}
}

pub use internal::*;
