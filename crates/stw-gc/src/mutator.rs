//! The mutator handle: allocation, access and rooting for one thread.
//!
//! Objects are kept alive only by roots: the mutator's shadow stack, global
//! roots and references from other live objects. A freshly allocated object
//! is safe until the mutator's next safepoint (any allocation, explicit poll
//! or collection), so root it before then.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::GcError;
use crate::heap::Heap;
use crate::object::{Finalize, HeapObject, ObjRef, TypeInfo};
use crate::runtime::Shared;
use crate::safepoint::{MutatorId, ThreadData};
use crate::trace::Trace;

/// A thread attached to a [`Runtime`](crate::Runtime).
///
/// Not `Send`: the handle belongs to the thread that attached it. Dropping
/// it detaches the thread.
pub struct Mutator<'rt> {
    shared: &'rt Shared,
    thread: Arc<ThreadData>,
    in_native: Cell<bool>,
    _thread_bound: PhantomData<*const ()>,
}

impl<'rt> Mutator<'rt> {
    pub(crate) fn attach(shared: &'rt Shared) -> Self {
        Self {
            thread: shared.mutators.register(),
            shared,
            in_native: Cell::new(false),
            _thread_bound: PhantomData,
        }
    }

    /// Id of this mutator.
    #[must_use]
    pub fn id(&self) -> MutatorId {
        self.thread.id()
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Allocate `value` on the heap.
    ///
    /// Every handle stored in `value` must be rooted: the allocation may
    /// run a collection before `value` becomes reachable.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if the heap is still full after a collection.
    pub fn alloc<T: Trace + Send + 'static>(&self, value: T) -> Result<ObjRef, GcError> {
        self.alloc_with_info(value, TypeInfo::of::<T>())
    }

    /// Allocate `value` and run [`Finalize::finalize`] on it once it dies.
    ///
    /// # Errors
    ///
    /// As [`Self::alloc`].
    pub fn alloc_finalizable<T: Finalize + Send + 'static>(
        &self,
        value: T,
    ) -> Result<ObjRef, GcError> {
        self.alloc_with_info(value, TypeInfo::finalizable::<T>())
    }

    /// Allocate `value` as a permanent object: never collected, never
    /// counted against the heap limit, and immutable.
    ///
    /// # Errors
    ///
    /// `InvalidReference` if `value` refers to a non-permanent object.
    pub fn alloc_permanent<T: Trace + Send + 'static>(&self, value: T) -> Result<ObjRef, GcError> {
        self.safepoint();
        let mut heap = self.shared.heap.lock();
        let mut offending = None;
        value.trace(&mut |obj: ObjRef| {
            let permanent = heap.object(obj).is_some_and(HeapObject::is_permanent);
            if !permanent && offending.is_none() {
                offending = Some(obj);
            }
        });
        if let Some(obj) = offending {
            return Err(GcError::InvalidReference(obj));
        }
        Ok(heap.allocate_permanent(value, TypeInfo::of::<T>()))
    }

    /// Allocate a weak reference to `referent`.
    ///
    /// # Errors
    ///
    /// `InvalidReference` if `referent` is dead, `OutOfMemory` as for
    /// [`Self::alloc`].
    pub fn alloc_weak(&self, referent: ObjRef) -> Result<ObjRef, GcError> {
        self.safepoint();
        if let Some(weak) = self.try_alloc_weak(referent)? {
            return Ok(weak);
        }
        self.on_oom(Heap::size_of::<crate::object::WeakReference>());
        self.try_alloc_weak(referent)?
            .ok_or_else(|| self.out_of_memory(Heap::size_of::<crate::object::WeakReference>()))
    }

    fn try_alloc_weak(&self, referent: ObjRef) -> Result<Option<ObjRef>, GcError> {
        let mut heap = self.shared.heap.lock();
        if !heap.contains(referent) {
            return Err(GcError::InvalidReference(referent));
        }
        let weak = heap.try_allocate_weak(referent);
        let allocated = heap.allocated_bytes();
        drop(heap);
        if weak.is_some() {
            self.shared.scheduler.on_allocation(allocated);
        }
        Ok(weak)
    }

    fn alloc_with_info<T: Send + 'static>(
        &self,
        value: T,
        type_info: TypeInfo,
    ) -> Result<ObjRef, GcError> {
        self.safepoint();
        let value = match self.try_alloc(value, type_info) {
            Ok(obj) => return Ok(obj),
            Err(value) => value,
        };
        let size = Heap::size_of::<T>();
        self.on_oom(size);
        self.try_alloc(value, type_info)
            .map_err(|_| self.out_of_memory(size))
    }

    fn try_alloc<T: Send + 'static>(&self, value: T, type_info: TypeInfo) -> Result<ObjRef, T> {
        let mut heap = self.shared.heap.lock();
        let obj = heap.try_allocate(value, type_info)?;
        let allocated = heap.allocated_bytes();
        drop(heap);
        self.shared.scheduler.on_allocation(allocated);
        Ok(obj)
    }

    fn out_of_memory(&self, requested: usize) -> GcError {
        GcError::OutOfMemory {
            requested,
            limit: self.shared.heap.lock().limit_bytes(),
        }
    }

    /// Out-of-memory hook: request a collection and block until it is done.
    ///
    /// Called by the allocation path before its single retry.
    pub fn on_oom(&self, size: usize) {
        {
            let heap = self.shared.heap.lock();
            crate::tracing::log_out_of_memory(size, heap.allocated_bytes(), heap.limit_bytes());
        }
        let epoch = self.shared.scheduler.schedule_gc();
        self.wait_epoch_finished(epoch);
    }

    // ------------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------------

    /// Run `f` on the payload of `obj`.
    ///
    /// The heap stays locked while `f` runs; `f` must not call back into
    /// this runtime.
    ///
    /// # Errors
    ///
    /// `InvalidReference` for a dead object, `TypeMismatch` for a wrong `T`.
    pub fn with<T: 'static, R>(&self, obj: ObjRef, f: impl FnOnce(&T) -> R) -> Result<R, GcError> {
        let heap = self.shared.heap.lock();
        heap.get::<T>(obj).map(f)
    }

    /// Run `f` on the payload of `obj`, mutably.
    ///
    /// # Errors
    ///
    /// As [`Self::with`], plus `PermanentObject`.
    pub fn with_mut<T: 'static, R>(
        &self,
        obj: ObjRef,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, GcError> {
        let mut heap = self.shared.heap.lock();
        heap.get_mut::<T>(obj).map(f)
    }

    /// Current referent of the weak reference `weak`, `None` once cleared.
    ///
    /// # Errors
    ///
    /// As [`Self::with`].
    pub fn weak_get(&self, weak: ObjRef) -> Result<Option<ObjRef>, GcError> {
        self.shared.heap.lock().weak_referent(weak)
    }

    /// Whether `obj` has not been reclaimed.
    #[must_use]
    pub fn is_alive(&self, obj: ObjRef) -> bool {
        self.shared.heap.lock().contains(obj)
    }

    // ------------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------------

    /// Root `obj` until the matching [`Self::pop_root`] or the enclosing
    /// frame closes.
    ///
    /// # Errors
    ///
    /// `InvalidReference` for a dead object.
    pub fn push_root(&self, obj: ObjRef) -> Result<(), GcError> {
        if !self.is_alive(obj) {
            return Err(GcError::InvalidReference(obj));
        }
        self.thread.with_roots(|roots| roots.push(obj));
        Ok(())
    }

    /// Drop the most recent rooting of `obj`.
    pub fn pop_root(&self, obj: ObjRef) -> bool {
        self.thread.with_roots(|roots| roots.pop(obj))
    }

    /// Open a root frame.
    pub fn push_frame(&self) {
        self.thread.with_roots(|roots| roots.push_frame());
    }

    /// Close the innermost root frame.
    pub fn pop_frame(&self) -> bool {
        self.thread.with_roots(|roots| roots.pop_frame())
    }

    /// Run `f` inside a root frame; roots pushed by `f` are dropped after.
    pub fn frame<R>(&self, f: impl FnOnce() -> R) -> R {
        self.push_frame();
        let _guard = FrameGuard { mutator: self };
        f()
    }

    /// Number of roots on this mutator's shadow stack.
    #[must_use]
    pub fn root_count(&self) -> usize {
        self.thread.with_roots(|roots| roots.len())
    }

    /// Make `obj` a global root.
    ///
    /// # Errors
    ///
    /// `InvalidReference` for a dead object.
    pub fn register_global(&self, obj: ObjRef) -> Result<(), GcError> {
        self.shared.heap.lock().register_global(obj)
    }

    /// Remove one global registration of `obj`.
    pub fn unregister_global(&self, obj: ObjRef) -> bool {
        self.shared.heap.lock().unregister_global(obj)
    }

    // ------------------------------------------------------------------------
    // Collector interaction
    // ------------------------------------------------------------------------

    /// Safepoint poll: park here while the collector needs the world stopped.
    #[inline]
    pub fn safepoint(&self) {
        if !self.in_native.get() {
            self.shared.mutators.poll();
        }
    }

    /// Run a full collection and wait for it.
    pub fn collect(&self) {
        let epoch = self.shared.scheduler.schedule_gc();
        self.wait_epoch_finished(epoch);
    }

    /// Block until `epoch` completed. Returns `false` if the runtime shut
    /// down first.
    pub fn wait_epoch_finished(&self, epoch: u64) -> bool {
        self.native(|| self.shared.state.wait_epoch_finished(epoch))
    }

    /// Run the blocking `f` in native state, during which a collection may
    /// proceed without this mutator reaching a safepoint.
    ///
    /// `f` must not touch the heap.
    pub fn native<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.in_native.get() {
            return f();
        }
        self.shared.mutators.enter_native();
        self.in_native.set(true);
        let _guard = NativeGuard { mutator: self };
        f()
    }
}

impl Drop for Mutator<'_> {
    fn drop(&mut self) {
        self.shared.mutators.unregister(self.thread.id());
    }
}

impl fmt::Debug for Mutator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutator")
            .field("id", &self.thread.id())
            .field("in_native", &self.in_native.get())
            .finish_non_exhaustive()
    }
}

struct NativeGuard<'a, 'rt> {
    mutator: &'a Mutator<'rt>,
}

impl Drop for NativeGuard<'_, '_> {
    fn drop(&mut self) {
        self.mutator.in_native.set(false);
        self.mutator.shared.mutators.leave_native();
    }
}

struct FrameGuard<'a, 'rt> {
    mutator: &'a Mutator<'rt>,
}

impl Drop for FrameGuard<'_, '_> {
    fn drop(&mut self) {
        self.mutator.pop_frame();
    }
}
