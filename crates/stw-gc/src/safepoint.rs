//! Mutator registry and the stop-the-world barrier.
//!
//! Every attached mutator is either *running* or *stopped*. A mutator
//! stops by parking at a safepoint poll or by entering native state around
//! a blocking call. The collector arms the barrier, waits until no mutator
//! is running, does its work and disarms the barrier.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::gc::mark::RootSource;
use crate::object::ObjRef;
use crate::roots::ShadowStack;

/// Identifier of an attached mutator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutatorId(u64);

impl MutatorId {
    /// Owner of roots that do not belong to a registered mutator, such as a
    /// plain root list handed to the marker.
    pub const DETACHED: Self = Self(0);

    /// Raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for MutatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MutatorId({})", self.0)
    }
}

/// Per-mutator record visible to the collector.
#[derive(Debug)]
pub struct ThreadData {
    id: MutatorId,
    roots: Mutex<ShadowStack>,
}

impl ThreadData {
    /// Id of the owning mutator.
    #[must_use]
    pub const fn id(&self) -> MutatorId {
        self.id
    }

    /// Run `f` with the mutator's shadow stack.
    pub fn with_roots<R>(&self, f: impl FnOnce(&mut ShadowStack) -> R) -> R {
        f(&mut self.roots.lock())
    }
}

#[derive(Debug, Default)]
struct Barrier {
    threads: Vec<Arc<ThreadData>>,
    running: usize,
    armed: bool,
    next_id: u64,
}

/// Registry of attached mutators plus the safepoint barrier.
#[derive(Debug, Default)]
pub struct MutatorRegistry {
    barrier: Mutex<Barrier>,
    /// Mirrors `Barrier::armed` for the lock-free poll fast path.
    requested: AtomicBool,
    cv_stopped: Condvar,
    cv_resume: Condvar,
}

impl MutatorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new, running mutator.
    ///
    /// Blocks while a safepoint is active so the stopped world stays stopped.
    pub fn register(&self) -> Arc<ThreadData> {
        let mut barrier = self.barrier.lock();
        while barrier.armed {
            self.cv_resume.wait(&mut barrier);
        }
        barrier.next_id += 1;
        let thread = Arc::new(ThreadData {
            id: MutatorId(barrier.next_id),
            roots: Mutex::new(ShadowStack::new()),
        });
        barrier.threads.push(Arc::clone(&thread));
        barrier.running += 1;
        thread
    }

    /// Detach a running mutator.
    pub fn unregister(&self, id: MutatorId) {
        let mut barrier = self.barrier.lock();
        let before = barrier.threads.len();
        barrier.threads.retain(|t| t.id != id);
        if barrier.threads.len() < before {
            self.stop_one(&mut barrier);
        }
    }

    /// Number of attached mutators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.barrier.lock().threads.len()
    }

    /// Whether no mutator is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stop_one(&self, barrier: &mut Barrier) {
        barrier.running -= 1;
        if barrier.armed && barrier.running == 0 {
            self.cv_stopped.notify_all();
        }
    }

    // ------------------------------------------------------------------------
    // Mutator side
    // ------------------------------------------------------------------------

    /// Safepoint poll. Parks the calling mutator while a safepoint is active.
    #[inline]
    pub fn poll(&self) {
        if self.requested.load(Ordering::Acquire) {
            self.park();
        }
    }

    #[cold]
    fn park(&self) {
        let mut barrier = self.barrier.lock();
        if !barrier.armed {
            return;
        }
        self.stop_one(&mut barrier);
        while barrier.armed {
            self.cv_resume.wait(&mut barrier);
        }
        barrier.running += 1;
    }

    /// Stop counting the calling mutator as running.
    ///
    /// The mutator must not touch the heap until [`Self::leave_native`].
    pub fn enter_native(&self) {
        let mut barrier = self.barrier.lock();
        self.stop_one(&mut barrier);
    }

    /// Resume running, waiting out an active safepoint first.
    pub fn leave_native(&self) {
        let mut barrier = self.barrier.lock();
        while barrier.armed {
            self.cv_resume.wait(&mut barrier);
        }
        barrier.running += 1;
    }

    // ------------------------------------------------------------------------
    // Collector side
    // ------------------------------------------------------------------------

    /// Arm the barrier and block until every mutator is stopped.
    ///
    /// # Panics
    ///
    /// Panics if a safepoint is already active.
    pub fn suspend_all(&self) {
        let mut barrier = self.barrier.lock();
        assert!(!barrier.armed, "nested safepoint");
        barrier.armed = true;
        self.requested.store(true, Ordering::Release);
        while barrier.running > 0 {
            self.cv_stopped.wait(&mut barrier);
        }
    }

    /// Disarm the barrier and wake every parked mutator.
    pub fn resume_all(&self) {
        let mut barrier = self.barrier.lock();
        barrier.armed = false;
        self.requested.store(false, Ordering::Release);
        self.cv_resume.notify_all();
    }

    /// Whether a safepoint is currently requested or in effect.
    #[must_use]
    pub fn is_safepoint_active(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Number of mutators currently counted as running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.barrier.lock().running
    }
}

impl RootSource for MutatorRegistry {
    fn for_each_mutator_root(
        &self,
        filter: &mut dyn FnMut(MutatorId) -> bool,
        visit: &mut dyn FnMut(ObjRef),
    ) {
        let barrier = self.barrier.lock();
        for thread in &barrier.threads {
            if !filter(thread.id) {
                continue;
            }
            for root in thread.roots.lock().iter() {
                visit(root);
            }
        }
    }
}
