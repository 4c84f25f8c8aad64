//! Per-object GC metadata and type descriptors.
//!
//! Every heap object carries an [`ObjectData`] header word and a [`TypeInfo`]
//! descriptor. The header doubles as the mark bit and as the link of the
//! intrusive mark queue: an object is marked exactly when its state is not
//! [`MarkState::Unmarked`].

use std::any::{type_name, Any};
use std::cell::Cell;
use std::fmt;

use crate::trace::{Trace, Visitor};

// ============================================================================
// ObjRef - handle into the heap arena
// ============================================================================

/// A handle to a heap object.
///
/// Handles are plain `Copy` values. The generation makes a handle to a
/// reclaimed slot detectable: once the slot is reused, the old handle no
/// longer resolves.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjRef {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the heap arena.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot at the time this handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({}#{})", self.index, self.generation)
    }
}

// ============================================================================
// ObjectData - mark bit and mark queue link in one word
// ============================================================================

/// Mark state of a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkState {
    /// Not reached in the current cycle.
    #[default]
    Unmarked,
    /// Reached and already traced.
    Marked,
    /// Reached and linked into the mark queue; `next` is the following entry.
    ///
    /// Objects left behind by [`MarkQueue::clear`](crate::MarkQueue::clear)
    /// keep this state until sweep resets them.
    Queued {
        /// Next object in the mark queue, `None` at the tail.
        next: Option<ObjRef>,
    },
}

/// GC metadata embedded in every object header.
///
/// Only the collector thread touches this during a stop-the-world pause, so
/// plain `Cell` updates are enough.
#[derive(Debug, Default)]
pub struct ObjectData {
    state: Cell<MarkState>,
}

impl ObjectData {
    /// Fresh, unmarked metadata.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Cell::new(MarkState::Unmarked),
        }
    }

    /// Mark the object if it is unmarked.
    ///
    /// Returns `true` only for the call that discovers the object.
    pub fn try_mark(&self) -> bool {
        if self.marked() {
            return false;
        }
        self.state.set(MarkState::Marked);
        true
    }

    /// Whether the object has been reached in the current cycle.
    #[must_use]
    pub fn marked(&self) -> bool {
        !matches!(self.state.get(), MarkState::Unmarked)
    }

    /// Clear the mark so the object starts the next cycle unmarked.
    ///
    /// Returns whether a reset actually happened.
    pub fn try_reset_mark(&self) -> bool {
        if !self.marked() {
            return false;
        }
        self.state.set(MarkState::Unmarked);
        true
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MarkState {
        self.state.get()
    }

    /// Link a freshly marked object in front of `next`.
    pub(crate) fn link(&self, next: Option<ObjRef>) {
        debug_assert_eq!(self.state.get(), MarkState::Marked, "only marked objects are linked");
        self.state.set(MarkState::Queued { next });
    }

    /// Unlink a queued object, leaving it marked. Returns its successor.
    pub(crate) fn unlink(&self) -> Option<ObjRef> {
        match self.state.get() {
            MarkState::Queued { next } => {
                self.state.set(MarkState::Marked);
                next
            }
            state => panic!("mark queue corrupted: dequeued object in state {state:?}"),
        }
    }
}

// ============================================================================
// TypeInfo - capability table per object type
// ============================================================================

/// Erased trace entry point stored in a [`TypeInfo`].
pub type TraceFn = fn(&dyn Any, &mut dyn Visitor);

/// Erased finalizer entry point stored in a [`TypeInfo`].
pub type FinalizeFn = fn(Box<dyn Any + Send>);

/// Types that need a callback once they become unreachable.
///
/// The finalizer runs on the finalizer thread (or, under backpressure, on the
/// GC thread) after the owning cycle finished. It receives the payload by
/// value: references it holds may already be dead and must not be followed.
pub trait Finalize: Trace {
    /// Called exactly once, after the object has been reclaimed from the heap.
    fn finalize(&mut self);
}

/// Type descriptor stored in every object header.
///
/// The mark phase never knows the concrete shape of an object; it calls
/// [`TypeInfo::trace`] which dispatches to the type's [`Trace`] impl.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    name: &'static str,
    trace: TraceFn,
    finalize: Option<FinalizeFn>,
}

impl TypeInfo {
    /// Descriptor for a plain traceable type.
    #[must_use]
    pub fn of<T: Trace + 'static>() -> Self {
        Self {
            name: type_name::<T>(),
            trace: trace_erased::<T>,
            finalize: None,
        }
    }

    /// Descriptor for a type with a finalizer.
    #[must_use]
    pub fn finalizable<T: Finalize + Send + 'static>() -> Self {
        Self {
            name: type_name::<T>(),
            trace: trace_erased::<T>,
            finalize: Some(finalize_erased::<T>),
        }
    }

    /// Name of the described type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether dead instances are handed to the finalizer.
    #[must_use]
    pub const fn has_finalizer(&self) -> bool {
        self.finalize.is_some()
    }

    /// Trace the outgoing references of `payload`.
    pub fn trace(&self, payload: &dyn Any, visitor: &mut dyn Visitor) {
        (self.trace)(payload, visitor);
    }

    pub(crate) const fn finalizer(&self) -> Option<FinalizeFn> {
        self.finalize
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("has_finalizer", &self.has_finalizer())
            .finish_non_exhaustive()
    }
}

fn trace_erased<T: Trace + 'static>(payload: &dyn Any, visitor: &mut dyn Visitor) {
    match payload.downcast_ref::<T>() {
        Some(value) => value.trace(visitor),
        None => panic!("type descriptor for {} attached to a foreign payload", type_name::<T>()),
    }
}

fn finalize_erased<T: Finalize + 'static>(mut payload: Box<dyn Any + Send>) {
    if let Some(value) = payload.downcast_mut::<T>() {
        value.finalize();
    }
}

// ============================================================================
// WeakReference - built-in weak reference object
// ============================================================================

/// Payload of a weak reference object.
///
/// The referent is deliberately not traced; it is cleared after the mark
/// fixpoint when the referent turned out to be unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeakReference {
    pub(crate) referent: Option<ObjRef>,
}

impl WeakReference {
    /// Current referent, `None` once cleared.
    #[must_use]
    pub const fn get(&self) -> Option<ObjRef> {
        self.referent
    }
}

impl Trace for WeakReference {
    fn trace(&self, _visitor: &mut dyn Visitor) {}
}

// ============================================================================
// HeapObject - header plus payload
// ============================================================================

/// A heap object: header words followed by the boxed payload.
pub struct HeapObject {
    pub(crate) data: ObjectData,
    pub(crate) type_info: TypeInfo,
    pub(crate) size: usize,
    pub(crate) permanent: bool,
    pub(crate) payload: Box<dyn Any + Send>,
}

/// Accounting cost of the object header.
pub const OBJECT_HEADER_SIZE: usize = std::mem::size_of::<ObjectData>()
    + std::mem::size_of::<TypeInfo>()
    + std::mem::size_of::<usize>();

/// Accounted size of an object with payload `T`.
#[must_use]
pub const fn object_size<T>() -> usize {
    let payload = std::mem::size_of::<T>();
    OBJECT_HEADER_SIZE + if payload == 0 { 1 } else { payload }
}

impl HeapObject {
    pub(crate) fn new<T: Send + 'static>(value: T, type_info: TypeInfo, permanent: bool) -> Self {
        Self {
            data: ObjectData::new(),
            type_info,
            size: object_size::<T>(),
            permanent,
            payload: Box::new(value),
        }
    }

    /// GC metadata of this object.
    #[must_use]
    pub const fn data(&self) -> &ObjectData {
        &self.data
    }

    /// Type descriptor of this object.
    #[must_use]
    pub const fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    /// Accounted size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether the object lives outside the collectable heap.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.permanent
    }
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapObject")
            .field("state", &self.data.state())
            .field("type", &self.type_info.name())
            .field("size", &self.size)
            .field("permanent", &self.permanent)
            .finish_non_exhaustive()
    }
}
