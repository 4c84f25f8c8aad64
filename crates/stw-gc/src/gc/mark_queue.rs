//! Intrusive mark queue and the tracing protocol built on it.
//!
//! The queue owns no storage. Its links live in each object's [`ObjectData`],
//! so being queued and being marked are the same fact and an object can
//! enter the queue at most once per cycle.

use crate::object::{ObjRef, ObjectData};
use crate::trace::Visitor;

/// Per-cycle worklist threaded through object headers (LIFO).
#[derive(Debug, Default)]
pub struct MarkQueue {
    head: Option<ObjRef>,
    len: usize,
}

impl MarkQueue {
    /// Create an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Whether the queue holds no objects.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Number of queued objects.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Forget the list without touching any object's mark state.
    ///
    /// Objects still linked stay marked; sweep resets them like any survivor.
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }

    fn push_front(&mut self, data: &ObjectData, obj: ObjRef) {
        data.link(self.head);
        self.head = Some(obj);
        self.len += 1;
    }

    fn pop_front<'a>(&mut self, data_of: impl FnOnce(ObjRef) -> &'a ObjectData) -> Option<ObjRef> {
        let obj = self.head?;
        self.head = data_of(obj).unlink();
        self.len -= 1;
        Some(obj)
    }
}

/// The tracing protocol, parameterized over an object store.
///
/// Implementors provide header lookup and the per-type trace dispatch; the
/// enqueue / dequeue / visit logic is shared.
pub trait MarkTraits {
    /// Header of a collectable object.
    ///
    /// Returns `None` for objects outside the collectable heap (permanent
    /// objects) and for dangling handles. Neither is marked nor traversed.
    fn object_data(&self, obj: ObjRef) -> Option<&ObjectData>;

    /// Report every outgoing reference of `obj` to `visitor`, using the
    /// trace function from the object's type descriptor.
    fn trace_object(&self, obj: ObjRef, visitor: &mut dyn Visitor);

    /// Report every global root.
    fn for_each_global_root(&self, f: &mut dyn FnMut(ObjRef));

    /// Mark `obj` and link it into `queue` if it was not marked yet.
    ///
    /// This is the single de-duplication point of the mark phase.
    fn try_enqueue(&self, queue: &mut MarkQueue, obj: ObjRef) -> bool {
        let Some(data) = self.object_data(obj) else {
            return false;
        };
        if !data.try_mark() {
            return false;
        }
        queue.push_front(data, obj);
        true
    }

    /// Pop the most recently queued object.
    fn try_dequeue(&self, queue: &mut MarkQueue) -> Option<ObjRef> {
        queue.pop_front(|obj| {
            self.object_data(obj)
                .unwrap_or_else(|| panic!("non-collectable object {obj:?} found in mark queue"))
        })
    }

    /// Trace `obj`, enqueueing each outgoing reference.
    fn process_in_mark(&self, queue: &mut MarkQueue, obj: ObjRef) {
        let mut visitor = MarkVisitor { store: self, queue };
        self.trace_object(obj, &mut visitor);
    }
}

/// Visitor that forwards every discovered reference to `try_enqueue`.
struct MarkVisitor<'a, S: MarkTraits + ?Sized> {
    store: &'a S,
    queue: &'a mut MarkQueue,
}

impl<S: MarkTraits + ?Sized> Visitor for MarkVisitor<'_, S> {
    fn visit(&mut self, obj: ObjRef) {
        self.store.try_enqueue(self.queue, obj);
    }
}
