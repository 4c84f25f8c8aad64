//! Object heap: an arena of slots with byte accounting.
//!
//! The heap is the allocator side of the collector. It hands out fresh
//! objects, answers typed accesses from mutators, and exposes the hooks the
//! mark and sweep phases need: header lookup, trace dispatch, global roots,
//! weak reference processing and reclamation.

use std::any::type_name;

use crate::error::GcError;
use crate::finalizer::FinalizerJob;
use crate::gc::mark_queue::{MarkQueue, MarkTraits};
use crate::object::{HeapObject, ObjRef, ObjectData, TypeInfo, WeakReference};
use crate::trace::{Trace, Visitor};

/// One arena slot. The generation is bumped every time the slot is freed.
#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    object: Option<HeapObject>,
}

/// Result of a sweep pass.
#[derive(Debug, Default)]
pub struct SweepStats {
    /// Objects reclaimed.
    pub objects_reclaimed: usize,
    /// Bytes reclaimed.
    pub bytes_reclaimed: usize,
    /// Collectable objects that survived.
    pub objects_surviving: usize,
    /// Bytes held by surviving collectable objects.
    pub bytes_surviving: usize,
    /// Payloads of dead finalizable objects, in slot order.
    pub finalizers: Vec<FinalizerJob>,
}

/// The object heap.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    allocated_bytes: usize,
    limit_bytes: usize,
    live_objects: usize,
    globals: Vec<ObjRef>,
    weak_refs: Vec<ObjRef>,
}

impl Heap {
    /// Create an empty heap that refuses allocations past `limit_bytes`.
    #[must_use]
    pub const fn new(limit_bytes: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            allocated_bytes: 0,
            limit_bytes,
            live_objects: 0,
            globals: Vec::new(),
            weak_refs: Vec::new(),
        }
    }

    /// Bytes held by collectable objects.
    #[must_use]
    pub const fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Allocation limit in bytes.
    #[must_use]
    pub const fn limit_bytes(&self) -> usize {
        self.limit_bytes
    }

    /// Number of live objects, permanent ones included.
    #[must_use]
    pub const fn object_count(&self) -> usize {
        self.live_objects
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Allocate a collectable object.
    ///
    /// # Errors
    ///
    /// Gives `value` back when the object does not fit under the limit; the
    /// caller is expected to run a collection and retry.
    pub fn try_allocate<T: Send + 'static>(&mut self, value: T, type_info: TypeInfo) -> Result<ObjRef, T> {
        let size = Self::size_of::<T>();
        if size > self.limit_bytes - self.allocated_bytes {
            return Err(value);
        }
        self.allocated_bytes += size;
        Ok(self.insert(HeapObject::new(value, type_info, false)))
    }

    /// Allocate a permanent object. It never counts against the limit and is
    /// never reclaimed.
    pub fn allocate_permanent<T: Send + 'static>(&mut self, value: T, type_info: TypeInfo) -> ObjRef {
        self.insert(HeapObject::new(value, type_info, true))
    }

    /// Allocate a weak reference object pointing at `referent`.
    pub fn try_allocate_weak(&mut self, referent: ObjRef) -> Option<ObjRef> {
        let weak = self
            .try_allocate(
                WeakReference {
                    referent: Some(referent),
                },
                TypeInfo::of::<WeakReference>(),
            )
            .ok()?;
        self.weak_refs.push(weak);
        Some(weak)
    }

    /// Upper bound of the accounted size of a `T` allocation.
    #[must_use]
    pub const fn size_of<T>() -> usize {
        crate::object::object_size::<T>()
    }

    fn insert(&mut self, object: HeapObject) -> ObjRef {
        self.live_objects += 1;
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.object.is_none());
            slot.object = Some(object);
            return ObjRef::new(index, slot.generation);
        }
        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| panic!("heap arena exhausted"));
        self.slots.push(Slot {
            generation: 0,
            object: Some(object),
        });
        ObjRef::new(index, 0)
    }

    // ------------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------------

    /// Resolve a handle to its object.
    #[must_use]
    pub fn object(&self, obj: ObjRef) -> Option<&HeapObject> {
        let slot = self.slots.get(obj.index as usize)?;
        if slot.generation != obj.generation {
            return None;
        }
        slot.object.as_ref()
    }

    fn object_mut(&mut self, obj: ObjRef) -> Option<&mut HeapObject> {
        let slot = self.slots.get_mut(obj.index as usize)?;
        if slot.generation != obj.generation {
            return None;
        }
        slot.object.as_mut()
    }

    /// Whether `obj` still resolves to a live object.
    #[must_use]
    pub fn contains(&self, obj: ObjRef) -> bool {
        self.object(obj).is_some()
    }

    /// Borrow the payload of `obj` as a `T`.
    ///
    /// # Errors
    ///
    /// `InvalidReference` for a dangling handle, `TypeMismatch` when the
    /// object holds another type.
    pub fn get<T: 'static>(&self, obj: ObjRef) -> Result<&T, GcError> {
        let object = self.object(obj).ok_or(GcError::InvalidReference(obj))?;
        object
            .payload
            .downcast_ref::<T>()
            .ok_or(GcError::TypeMismatch {
                expected: type_name::<T>(),
                found: object.type_info.name(),
            })
    }

    /// Mutably borrow the payload of `obj` as a `T`.
    ///
    /// # Errors
    ///
    /// As [`Heap::get`], plus `PermanentObject` since permanent objects are
    /// immutable.
    pub fn get_mut<T: 'static>(&mut self, obj: ObjRef) -> Result<&mut T, GcError> {
        let object = self.object_mut(obj).ok_or(GcError::InvalidReference(obj))?;
        if object.permanent {
            return Err(GcError::PermanentObject(obj));
        }
        let found = object.type_info.name();
        object
            .payload
            .downcast_mut::<T>()
            .ok_or(GcError::TypeMismatch {
                expected: type_name::<T>(),
                found,
            })
    }

    /// Current referent of the weak reference object `weak`.
    ///
    /// # Errors
    ///
    /// As [`Heap::get`].
    pub fn weak_referent(&self, weak: ObjRef) -> Result<Option<ObjRef>, GcError> {
        self.get::<WeakReference>(weak).map(WeakReference::get)
    }

    /// Outgoing references of `obj`, in trace order.
    ///
    /// # Errors
    ///
    /// `InvalidReference` for a dangling handle.
    pub fn references(&self, obj: ObjRef) -> Result<Vec<ObjRef>, GcError> {
        let object = self.object(obj).ok_or(GcError::InvalidReference(obj))?;
        let mut refs = Vec::new();
        object.type_info.trace(object.payload.as_ref(), &mut |r| refs.push(r));
        Ok(refs)
    }

    // ------------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------------

    /// Register `obj` as a global root for the lifetime of the heap.
    ///
    /// # Errors
    ///
    /// `InvalidReference` for a dangling handle.
    pub fn register_global(&mut self, obj: ObjRef) -> Result<(), GcError> {
        if !self.contains(obj) {
            return Err(GcError::InvalidReference(obj));
        }
        self.globals.push(obj);
        Ok(())
    }

    /// Remove one registration of `obj` from the global roots.
    pub fn unregister_global(&mut self, obj: ObjRef) -> bool {
        if let Some(pos) = self.globals.iter().position(|&g| g == obj) {
            self.globals.swap_remove(pos);
            true
        } else {
            false
        }
    }

    /// Number of live weak reference objects.
    #[must_use]
    pub fn weak_reference_count(&self) -> usize {
        self.weak_refs.len()
    }

    // ------------------------------------------------------------------------
    // Collection hooks
    // ------------------------------------------------------------------------

    fn is_marked_or_permanent(&self, obj: ObjRef) -> bool {
        self.object(obj)
            .is_some_and(|object| object.permanent || object.data.marked())
    }

    /// Clear weak references whose referent was not marked.
    ///
    /// Must run after the mark fixpoint. Weak reference objects that are
    /// themselves dead leave the registry; sweep reclaims them.
    /// Returns the number of cleared references.
    pub fn process_weak_references(&mut self) -> usize {
        let mut registry = std::mem::take(&mut self.weak_refs);
        registry.retain(|&weak| self.is_marked_or_permanent(weak));

        let mut cleared = 0;
        for &weak in &registry {
            let referent = self.weak_referent(weak).ok().flatten();
            let Some(referent) = referent else {
                continue;
            };
            if self.is_marked_or_permanent(referent) {
                continue;
            }
            if let Some(object) = self.object_mut(weak) {
                if let Some(weak_ref) = object.payload.downcast_mut::<WeakReference>() {
                    weak_ref.referent = None;
                    cleared += 1;
                }
            }
        }

        self.weak_refs = registry;
        cleared
    }

    /// Reclaim every unmarked collectable object and reset survivors' marks.
    ///
    /// # Panics
    ///
    /// Panics if `queue` is not empty: sweeping before the mark fixpoint
    /// would free reachable objects.
    pub fn sweep(&mut self, queue: &MarkQueue) -> SweepStats {
        assert!(queue.is_empty(), "sweep started before the mark queue was drained");

        let mut stats = SweepStats::default();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(object) = slot.object.as_ref() else {
                continue;
            };
            if object.permanent {
                continue;
            }
            if object.data.try_reset_mark() {
                stats.objects_surviving += 1;
                stats.bytes_surviving += object.size;
                continue;
            }

            let Some(dead) = slot.object.take() else {
                continue;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free_slots.push(u32::try_from(index).unwrap_or(u32::MAX));
            self.allocated_bytes -= dead.size;
            self.live_objects -= 1;
            stats.objects_reclaimed += 1;
            stats.bytes_reclaimed += dead.size;

            if let Some(finalize) = dead.type_info.finalizer() {
                stats
                    .finalizers
                    .push(FinalizerJob::new(dead.type_info.name(), dead.payload, finalize));
            }
        }
        stats
    }

    /// Whether `obj` is currently marked. Intended for inspection between
    /// the mark and sweep phases.
    #[must_use]
    pub fn is_marked(&self, obj: ObjRef) -> bool {
        self.object(obj).is_some_and(|object| object.data.marked())
    }
}

impl MarkTraits for Heap {
    fn object_data(&self, obj: ObjRef) -> Option<&ObjectData> {
        let Some(object) = self.object(obj) else {
            crate::tracing::log_dangling_reference(obj);
            return None;
        };
        if object.permanent {
            None
        } else {
            Some(&object.data)
        }
    }

    fn trace_object(&self, obj: ObjRef, visitor: &mut dyn Visitor) {
        if let Some(object) = self.object(obj) {
            object.type_info.trace(object.payload.as_ref(), visitor);
        }
    }

    fn for_each_global_root(&self, f: &mut dyn FnMut(ObjRef)) {
        for &global in &self.globals {
            f(global);
        }
    }
}

/// Allocate a traceable value with its default descriptor.
///
/// Convenience for tests and single-threaded embedders driving a [`Heap`]
/// directly.
pub fn allocate<T: Trace + Send + 'static>(heap: &mut Heap, value: T) -> Option<ObjRef> {
    heap.try_allocate(value, TypeInfo::of::<T>()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_access() {
        let mut heap = Heap::new(1 << 20);
        let obj = allocate(&mut heap, 7_u64).unwrap();

        assert_eq!(*heap.get::<u64>(obj).unwrap(), 7);
        *heap.get_mut::<u64>(obj).unwrap() = 9;
        assert_eq!(*heap.get::<u64>(obj).unwrap(), 9);
        assert_eq!(heap.object_count(), 1);
        assert_eq!(heap.allocated_bytes(), Heap::size_of::<u64>());
    }

    #[test]
    fn test_type_mismatch() {
        let mut heap = Heap::new(1 << 20);
        let obj = allocate(&mut heap, 7_u64).unwrap();

        let err = heap.get::<String>(obj).unwrap_err();
        assert!(matches!(err, GcError::TypeMismatch { found: "u64", .. }));
    }

    #[test]
    fn test_limit_refuses_allocation() {
        let mut heap = Heap::new(Heap::size_of::<u64>() * 2);
        assert!(allocate(&mut heap, 1_u64).is_some());
        assert!(allocate(&mut heap, 2_u64).is_some());
        assert!(allocate(&mut heap, 3_u64).is_none());
        assert_eq!(heap.object_count(), 2);
    }

    #[test]
    fn test_permanent_objects_are_free_and_immutable() {
        let mut heap = Heap::new(0);
        let obj = heap.allocate_permanent(5_u32, TypeInfo::of::<u32>());

        assert_eq!(heap.allocated_bytes(), 0);
        assert_eq!(*heap.get::<u32>(obj).unwrap(), 5);
        assert_eq!(heap.get_mut::<u32>(obj).unwrap_err(), GcError::PermanentObject(obj));
    }

    #[test]
    fn test_sweep_reclaims_unmarked_and_reuses_slot() {
        let mut heap = Heap::new(1 << 20);
        let live = allocate(&mut heap, 1_u32).unwrap();
        let dead = allocate(&mut heap, 2_u32).unwrap();

        let mut queue = MarkQueue::new();
        heap.try_enqueue(&mut queue, live);
        heap.try_dequeue(&mut queue);

        let stats = heap.sweep(&queue);
        assert_eq!(stats.objects_reclaimed, 1);
        assert_eq!(stats.objects_surviving, 1);
        assert!(heap.contains(live));
        assert!(!heap.contains(dead));
        assert!(!heap.is_marked(live));

        let reused = allocate(&mut heap, 3_u32).unwrap();
        assert_eq!(reused.index(), dead.index());
        assert_ne!(reused.generation(), dead.generation());
        assert_eq!(heap.get::<u32>(dead).unwrap_err(), GcError::InvalidReference(dead));
    }

    #[test]
    #[should_panic(expected = "before the mark queue was drained")]
    fn test_sweep_with_pending_queue_panics() {
        let mut heap = Heap::new(1 << 20);
        let obj = allocate(&mut heap, 1_u32).unwrap();
        let mut queue = MarkQueue::new();
        heap.try_enqueue(&mut queue, obj);
        heap.sweep(&queue);
    }

    #[test]
    fn test_references_follow_type_info() {
        let mut heap = Heap::new(1 << 20);
        let a = allocate(&mut heap, 1_u32).unwrap();
        let b = allocate(&mut heap, 2_u32).unwrap();
        let pair = allocate(&mut heap, (a, Some(b))).unwrap();

        assert_eq!(heap.references(pair).unwrap(), vec![a, b]);
        assert!(heap.references(a).unwrap().is_empty());
    }
}
