//! The runtime context tying heap, mutators and collector together.
//!
//! There is no process-wide collector: each [`Runtime`] owns its heap, its
//! GC thread and its finalizer thread, so independent runtimes can coexist
//! in one process.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::GcConfig;
use crate::finalizer::FinalizerProcessor;
use crate::gc::scheduler::GcScheduler;
use crate::gc::state::{GcPhase, GcStateHolder};
use crate::gc::thread::GcThread;
use crate::heap::Heap;
use crate::metrics::{CumulativeMetrics, GcMetrics};
use crate::mutator::Mutator;
use crate::safepoint::MutatorRegistry;

/// State shared by the runtime, its mutators and the GC thread.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) heap: Mutex<Heap>,
    pub(crate) state: Arc<GcStateHolder>,
    pub(crate) scheduler: GcScheduler,
    pub(crate) mutators: MutatorRegistry,
    pub(crate) last_metrics: Mutex<GcMetrics>,
    pub(crate) totals: CumulativeMetrics,
}

impl Shared {
    fn new(config: &GcConfig) -> Self {
        let state = Arc::new(GcStateHolder::new());
        Self {
            heap: Mutex::new(Heap::new(config.max_heap_bytes)),
            scheduler: GcScheduler::new(config.scheduler, Arc::clone(&state)),
            state,
            mutators: MutatorRegistry::new(),
            last_metrics: Mutex::new(GcMetrics::new()),
            totals: CumulativeMetrics::new(),
        }
    }
}

/// A garbage-collected heap with its collector.
///
/// # Example
///
/// ```
/// use stw_gc::{GcConfig, Runtime};
///
/// let runtime = Runtime::new(GcConfig::default()).unwrap();
/// let mutator = runtime.attach();
///
/// let kept = mutator.alloc(String::from("kept")).unwrap();
/// mutator.push_root(kept).unwrap();
/// let dropped = mutator.alloc(String::from("dropped")).unwrap();
///
/// mutator.collect();
/// assert!(mutator.is_alive(kept));
/// assert!(!mutator.is_alive(dropped));
/// ```
#[derive(Debug)]
pub struct Runtime {
    shared: Arc<Shared>,
    config: GcConfig,
    gc_thread: Option<JoinHandle<()>>,
    finalizer: Option<FinalizerProcessor>,
}

impl Runtime {
    /// Create the heap and spawn the GC thread and, if configured, the
    /// finalizer thread.
    ///
    /// # Errors
    ///
    /// Fails if a thread cannot be spawned.
    pub fn new(config: GcConfig) -> io::Result<Self> {
        let shared = Arc::new(Shared::new(&config));
        let finalizer = if config.finalizer_thread {
            Some(FinalizerProcessor::spawn()?)
        } else {
            None
        };
        let sink = finalizer.as_ref().map(FinalizerProcessor::sink);
        let gc_thread = GcThread::new(Arc::clone(&shared), sink).spawn()?;

        Ok(Self {
            shared,
            config,
            gc_thread: Some(gc_thread),
            finalizer,
        })
    }

    /// Configuration this runtime was created with.
    #[must_use]
    pub const fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Attach the calling thread as a mutator.
    ///
    /// The returned handle is bound to the calling thread and borrows the
    /// runtime, so every mutator is detached before the collector shuts down.
    #[must_use]
    pub fn attach(&self) -> Mutator<'_> {
        Mutator::attach(&self.shared)
    }

    /// Request a collection. Returns the epoch that will satisfy it.
    pub fn schedule_gc(&self) -> u64 {
        self.shared.scheduler.schedule_gc()
    }

    /// Block until `epoch` completed. Returns `false` if the runtime shut
    /// down first.
    ///
    /// Must not be called from a thread with an attached mutator: that
    /// mutator would keep the collector from ever stopping the world. Use
    /// [`Mutator::collect`] there.
    pub fn wait_epoch_finished(&self, epoch: u64) -> bool {
        self.shared.state.wait_epoch_finished(epoch)
    }

    /// Run a full collection and wait for it. Same caveat as
    /// [`Self::wait_epoch_finished`].
    pub fn collect(&self) {
        let epoch = self.schedule_gc();
        self.wait_epoch_finished(epoch);
    }

    /// Metrics of the last completed collection.
    #[must_use]
    pub fn last_gc_metrics(&self) -> GcMetrics {
        *self.shared.last_metrics.lock()
    }

    /// Totals over every collection of this runtime.
    #[must_use]
    pub fn cumulative_metrics(&self) -> &CumulativeMetrics {
        &self.shared.totals
    }

    /// Bytes held by collectable objects.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.shared.heap.lock().allocated_bytes()
    }

    /// Live objects, permanent ones included.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.shared.heap.lock().object_count()
    }

    /// Last completed epoch.
    #[must_use]
    pub fn finished_epoch(&self) -> u64 {
        self.shared.state.finished_epoch()
    }

    /// Current collector phase.
    #[must_use]
    pub fn phase(&self) -> GcPhase {
        self.shared.state.phase()
    }

    /// Heap size that triggers the next collection.
    #[must_use]
    pub fn target_heap_bytes(&self) -> usize {
        self.shared.scheduler.target_heap_bytes()
    }

    /// Number of attached mutators.
    #[must_use]
    pub fn mutator_count(&self) -> usize {
        self.shared.mutators.len()
    }

    /// Whether the collector has requested, or is holding, a stopped world.
    #[must_use]
    pub fn is_safepoint_active(&self) -> bool {
        self.shared.mutators.is_safepoint_active()
    }

    /// Finalizers completed by the finalizer thread.
    #[must_use]
    pub fn finalizers_completed(&self) -> usize {
        self.finalizer
            .as_ref()
            .map_or(0, |processor| processor.sink().completed())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shared.state.shutdown();
        if let Some(handle) = self.gc_thread.take() {
            // The GC thread aborts instead of unwinding, so join cannot fail.
            let _ = handle.join();
        }
        if let Some(mut finalizer) = self.finalizer.take() {
            finalizer.shutdown();
        }
    }
}
