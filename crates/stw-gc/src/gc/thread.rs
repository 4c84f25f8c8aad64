//! The background collector thread.
//!
//! One thread per runtime, alive for the runtime's whole lifetime. It sleeps
//! until an epoch is requested (or the regular interval elapses), stops the
//! world, marks, sweeps, publishes the epoch and resumes mutators.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::finalizer::{FinalizerJob, FinalizerSink};
use crate::gc::mark::{GcHandle, SingleThreadMark};
use crate::gc::mark_queue::MarkQueue;
use crate::gc::state::{GcPhase, ScheduleWait};
use crate::metrics::{GcMetrics, PhaseTimer};
use crate::runtime::Shared;
use crate::tracing::{self as gc_tracing, GcPhase as TracePhase};

/// State owned by the GC thread.
pub struct GcThread {
    shared: Arc<Shared>,
    mark: SingleThreadMark,
    queue: MarkQueue,
    finalizers: Option<FinalizerSink>,
}

impl GcThread {
    pub(crate) fn new(shared: Arc<Shared>, finalizers: Option<FinalizerSink>) -> Self {
        Self {
            shared,
            mark: SingleThreadMark::new(),
            queue: MarkQueue::new(),
            finalizers,
        }
    }

    /// Start the loop on a new OS thread.
    ///
    /// A panic escaping a cycle aborts the process: mutators are parked and
    /// nothing else could ever resume them.
    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("stw-gc".into())
            .spawn(move || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.run())) {
                    let message = payload
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                        .unwrap_or("unknown panic");
                    gc_tracing::log_fatal(message);
                    std::process::abort();
                }
            })
    }

    fn run(mut self) {
        loop {
            let timeout = self.shared.scheduler.time_until_regular_gc();
            match self.shared.state.wait_scheduled(timeout) {
                ScheduleWait::Scheduled(epoch) => self.perform_full_gc(epoch),
                ScheduleWait::TimedOut => {
                    if self.shared.scheduler.is_regular_gc_due() {
                        self.shared.scheduler.schedule_gc();
                    }
                }
                ScheduleWait::Shutdown => return,
            }
        }
    }

    /// Run one complete stop-the-world cycle completing `epoch`.
    pub(crate) fn perform_full_gc(&mut self, epoch: u64) {
        let _span = gc_tracing::trace_gc_cycle(epoch);
        let shared = &*self.shared;

        shared.state.start(epoch);
        let pause_start = Instant::now();
        shared.mutators.suspend_all();

        let mut timer = PhaseTimer::new();
        let (mark, sweep) = {
            let mut heap = shared.heap.lock();

            let mark = {
                let _phase = gc_tracing::trace_phase(TracePhase::Mark);
                gc_tracing::log_phase_start(TracePhase::Mark, heap.allocated_bytes());
                timer.start();
                self.mark.setup_before_stw(GcHandle::new(epoch));
                let stats = self.mark.mark_in_stw(
                    &mut *heap,
                    &mut self.queue,
                    &shared.mutators,
                    &mut |_| true,
                );
                timer.end_mark();
                gc_tracing::log_phase_end(TracePhase::Mark, stats.objects_marked);
                stats
            };

            shared.state.set_phase(GcPhase::Sweeping);
            let sweep = {
                let _phase = gc_tracing::trace_phase(TracePhase::Sweep);
                gc_tracing::log_phase_start(TracePhase::Sweep, heap.allocated_bytes());
                timer.start();
                let stats = heap.sweep(&self.queue);
                timer.end_sweep();
                gc_tracing::log_phase_end(TracePhase::Sweep, stats.objects_reclaimed);
                stats
            };
            (mark, sweep)
        };

        shared.scheduler.on_gc_finished(sweep.bytes_surviving);

        let mut metrics = GcMetrics {
            epoch,
            pause_duration: pause_start.elapsed(),
            mark_duration: timer.mark,
            sweep_duration: timer.sweep,
            roots_visited: mark.roots_visited,
            objects_marked: mark.objects_marked,
            bytes_reclaimed: sweep.bytes_reclaimed,
            bytes_surviving: sweep.bytes_surviving,
            objects_reclaimed: sweep.objects_reclaimed,
            objects_surviving: sweep.objects_surviving,
            weak_refs_cleared: mark.weak_refs_cleared,
            finalizers_queued: 0,
            finalizers_inline: 0,
            target_heap_bytes: shared.scheduler.target_heap_bytes(),
            total_collections: 0,
        };

        shared.mutators.resume_all();

        for job in sweep.finalizers {
            if self.dispatch_finalizer(job) {
                metrics.finalizers_queued += 1;
            } else {
                metrics.finalizers_inline += 1;
            }
        }

        metrics.total_collections = shared.totals.record(&metrics);
        gc_tracing::log_cycle_end(&metrics);
        *shared.last_metrics.lock() = metrics;

        // Waiters observe the metrics and inline finalizers of their epoch.
        shared.state.finish(epoch);
    }

    /// Queue `job` for the finalizer thread, or run it here when there is
    /// no thread or its queue is full. Returns whether it was queued.
    fn dispatch_finalizer(&self, job: FinalizerJob) -> bool {
        let Some(sink) = &self.finalizers else {
            job.run_isolated();
            return false;
        };
        match sink.submit(job) {
            Ok(()) => true,
            Err(job) => {
                gc_tracing::log_finalizer_backpressure(job.type_name());
                job.run_isolated();
                false
            }
        }
    }
}

impl std::fmt::Debug for GcThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcThread")
            .field("phase", &self.mark.phase())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
