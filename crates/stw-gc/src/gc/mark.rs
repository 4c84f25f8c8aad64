//! Stop-the-world mark pass.
//!
//! One pass runs entirely inside a safepoint: roots go into the mark queue,
//! the queue is drained to a fixpoint, then weak references are processed.

use crate::gc::mark_queue::{MarkQueue, MarkTraits};
use crate::safepoint::MutatorId;
use crate::object::ObjRef;

/// Opaque handle identifying one GC cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcHandle {
    epoch: u64,
}

impl GcHandle {
    /// Handle for the cycle that completes `epoch`.
    ///
    /// # Panics
    ///
    /// Panics for epoch 0, which no cycle ever completes.
    #[must_use]
    pub fn new(epoch: u64) -> Self {
        assert!(epoch > 0, "GC epochs start at 1");
        Self { epoch }
    }

    /// Epoch this cycle completes.
    #[must_use]
    pub const fn epoch(self) -> u64 {
        self.epoch
    }
}

/// Source of per-mutator roots.
pub trait RootSource {
    /// Report the roots of every mutator accepted by `filter`.
    fn for_each_mutator_root(
        &self,
        filter: &mut dyn FnMut(MutatorId) -> bool,
        visit: &mut dyn FnMut(ObjRef),
    );
}

/// Object stores that keep weak references.
pub trait WeakProcessing {
    /// Clear weak references to unmarked objects. Returns how many were
    /// cleared.
    fn process_weak_references(&mut self) -> usize;
}

impl WeakProcessing for crate::heap::Heap {
    fn process_weak_references(&mut self) -> usize {
        Self::process_weak_references(self)
    }
}

/// Phase of a [`SingleThreadMark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkPhase {
    /// Not marking: no cycle handle yet, or a handle set by
    /// [`SingleThreadMark::setup_before_stw`] and the pass not started.
    #[default]
    Idle,
    /// Handle set, marking in progress.
    Marking,
    /// Fixpoint reached and weak references processed.
    Done,
}

/// Counters of one mark pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkStats {
    /// Root slots visited, duplicates included.
    pub roots_visited: usize,
    /// Distinct objects marked.
    pub objects_marked: usize,
    /// Weak references cleared.
    pub weak_refs_cleared: usize,
}

/// Mark pass for a fully stopped world, run by a single thread.
#[derive(Debug, Default)]
pub struct SingleThreadMark {
    handle: Option<GcHandle>,
    phase: MarkPhase,
    stats: MarkStats,
}

impl SingleThreadMark {
    /// New, idle marker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handle: None,
            phase: MarkPhase::Idle,
            stats: MarkStats {
                roots_visited: 0,
                objects_marked: 0,
                weak_refs_cleared: 0,
            },
        }
    }

    /// Bind the marker to the cycle identified by `handle`.
    pub fn setup_before_stw(&mut self, handle: GcHandle) {
        self.handle = Some(handle);
        self.phase = MarkPhase::Idle;
        self.stats = MarkStats::default();
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> MarkPhase {
        self.phase
    }

    /// Handle of the current cycle, if any.
    #[must_use]
    pub const fn handle(&self) -> Option<GcHandle> {
        self.handle
    }

    /// Stats of the last completed pass.
    #[must_use]
    pub const fn stats(&self) -> MarkStats {
        self.stats
    }

    /// Run the full mark pass.
    ///
    /// Roots come from globals and from every mutator accepted by `filter`.
    /// On return every object reachable from those roots is marked, nothing
    /// else is, `queue` is empty and weak references to unmarked objects are
    /// cleared.
    ///
    /// # Panics
    ///
    /// Panics without a cycle handle from [`Self::setup_before_stw`], or if
    /// the handle was already used for a finished pass.
    pub fn mark_in_stw<H, R>(
        &mut self,
        heap: &mut H,
        queue: &mut MarkQueue,
        roots: &R,
        filter: &mut dyn FnMut(MutatorId) -> bool,
    ) -> MarkStats
    where
        H: MarkTraits + WeakProcessing,
        R: RootSource + ?Sized,
    {
        let Some(handle) = self.handle else {
            panic!("mark_in_stw called without a cycle handle");
        };
        assert_eq!(
            self.phase,
            MarkPhase::Idle,
            "cycle {} already marked",
            handle.epoch()
        );
        assert!(queue.is_empty(), "mark queue must start empty");
        self.phase = MarkPhase::Marking;

        let mut stats = MarkStats::default();
        {
            let store: &H = heap;
            let mut enqueue = |obj: ObjRef| {
                stats.roots_visited += 1;
                store.try_enqueue(&mut *queue, obj);
            };
            store.for_each_global_root(&mut enqueue);
            roots.for_each_mutator_root(filter, &mut enqueue);

            while let Some(obj) = store.try_dequeue(queue) {
                stats.objects_marked += 1;
                store.process_in_mark(queue, obj);
            }
        }

        stats.weak_refs_cleared = heap.process_weak_references();

        self.phase = MarkPhase::Done;
        self.stats = stats;
        stats
    }

    /// Stop-request hook shared with concurrent markers. A stopped world
    /// has nothing to interrupt, so this does nothing.
    pub const fn request_shutdown(&self) {}
}

/// Roots given as a plain list, attributed to no registered mutator.
impl RootSource for [ObjRef] {
    fn for_each_mutator_root(
        &self,
        filter: &mut dyn FnMut(MutatorId) -> bool,
        visit: &mut dyn FnMut(ObjRef),
    ) {
        if filter(MutatorId::DETACHED) {
            for &obj in self {
                visit(obj);
            }
        }
    }
}
