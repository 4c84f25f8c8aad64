//! Finalizer processing.
//!
//! Sweep hands the payloads of dead finalizable objects to a dedicated
//! thread through a [`BoundedQueue`]. When the queue is full the GC thread
//! runs the finalizer itself instead of blocking.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::sync::{Parker, Unparker};

use crate::bounded_queue::BoundedQueue;
use crate::object::FinalizeFn;

/// Capacity of the queue between the GC thread and the finalizer thread.
pub const FINALIZER_QUEUE_CAPACITY: usize = 256;

/// Payload of a dead finalizable object together with its finalizer.
pub struct FinalizerJob {
    type_name: &'static str,
    payload: Box<dyn Any + Send>,
    finalize: FinalizeFn,
}

impl FinalizerJob {
    pub(crate) fn new(
        type_name: &'static str,
        payload: Box<dyn Any + Send>,
        finalize: FinalizeFn,
    ) -> Self {
        Self {
            type_name,
            payload,
            finalize,
        }
    }

    /// Type of the finalized object.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Run the finalizer, consuming the payload.
    pub fn run(self) {
        (self.finalize)(self.payload);
    }

    /// Run the finalizer, reporting a panic instead of unwinding.
    ///
    /// Returns `false` if the finalizer panicked.
    pub fn run_isolated(self) -> bool {
        let type_name = self.type_name;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run()));
        if result.is_err() {
            crate::tracing::log_finalizer_panic(type_name);
        }
        result.is_ok()
    }
}

impl fmt::Debug for FinalizerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizerJob")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

struct Shared {
    queue: BoundedQueue<FinalizerJob, FINALIZER_QUEUE_CAPACITY>,
    shutdown: AtomicBool,
    completed: AtomicUsize,
}

/// Producer side of the finalizer queue. Cheap to clone.
#[derive(Clone)]
pub struct FinalizerSink {
    shared: Arc<Shared>,
    unparker: Unparker,
}

impl FinalizerSink {
    /// Hand `job` to the finalizer thread.
    ///
    /// # Errors
    ///
    /// Gives the job back when the queue is full.
    pub fn submit(&self, job: FinalizerJob) -> Result<(), FinalizerJob> {
        self.shared.queue.enqueue(job)?;
        self.unparker.unpark();
        Ok(())
    }

    /// Number of finalizers the thread has run so far.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.shared.completed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for FinalizerSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizerSink")
            .field("pending", &self.shared.queue.len())
            .finish_non_exhaustive()
    }
}

/// The finalizer thread.
#[derive(Debug)]
pub struct FinalizerProcessor {
    sink: FinalizerSink,
    handle: Option<JoinHandle<()>>,
}

impl FinalizerProcessor {
    /// Spawn the finalizer thread.
    ///
    /// # Errors
    ///
    /// Fails if the OS refuses to spawn a thread.
    pub fn spawn() -> io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: BoundedQueue::new(),
            shutdown: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
        });
        let parker = Parker::new();
        let unparker = parker.unparker().clone();

        let handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("stw-gc-finalizer".into())
                .spawn(move || process(&shared, &parker))?
        };

        Ok(Self {
            sink: FinalizerSink { shared, unparker },
            handle: Some(handle),
        })
    }

    /// Producer handle for the GC thread.
    #[must_use]
    pub fn sink(&self) -> FinalizerSink {
        self.sink.clone()
    }

    /// Drain what is left and join the thread.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.sink.shared.shutdown.store(true, Ordering::Release);
        self.sink.unparker.unpark();
        if handle.join().is_err() {
            crate::tracing::log_finalizer_panic("finalizer thread");
        }
    }
}

impl Drop for FinalizerProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn process(shared: &Shared, parker: &Parker) {
    loop {
        while let Some(job) = shared.queue.dequeue() {
            job.run_isolated();
            shared.completed.fetch_add(1, Ordering::Release);
        }
        if shared.shutdown.load(Ordering::Acquire) {
            // Jobs submitted before the flag was raised are still queued.
            while let Some(job) = shared.queue.dequeue() {
                job.run_isolated();
                shared.completed.fetch_add(1, Ordering::Release);
            }
            return;
        }
        parker.park();
    }
}
