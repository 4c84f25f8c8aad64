//! Trace trait and Visitor pattern for garbage collection.
//!
//! Types stored on the heap implement `Trace` so the mark phase can find
//! their outgoing references without knowing their shape.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, LinkedList, VecDeque};
use std::hash::BuildHasher;
use std::rc::Rc;
use std::sync::Arc;

use crate::object::ObjRef;

// ============================================================================
// Core Traits
// ============================================================================

/// A type that can be traced by the garbage collector.
///
/// Implementations must report every [`ObjRef`] they hold by calling
/// [`Visitor::visit`]. A missed reference lets its target be reclaimed while
/// still in use; later access through the stale handle fails with
/// `GcError::InvalidReference`.
///
/// Prefer using `#[derive(Trace)]` instead of manual implementation.
///
/// # Examples
///
/// ```
/// use stw_gc::{ObjRef, Trace, Visitor};
///
/// struct Pair {
///     left: Option<ObjRef>,
///     right: Option<ObjRef>,
///     weight: u32,
/// }
///
/// impl Trace for Pair {
///     fn trace(&self, visitor: &mut dyn Visitor) {
///         self.left.trace(visitor);
///         self.right.trace(visitor);
///     }
/// }
/// ```
pub trait Trace {
    /// Visit all references contained within this value.
    fn trace(&self, visitor: &mut dyn Visitor);
}

/// A visitor that traverses the object graph.
///
/// The collector's own visitor enqueues every reference into the mark queue.
pub trait Visitor {
    /// Visit a reference to a heap object.
    fn visit(&mut self, obj: ObjRef);
}

impl<F: FnMut(ObjRef)> Visitor for F {
    fn visit(&mut self, obj: ObjRef) {
        self(obj);
    }
}

impl Trace for ObjRef {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        visitor.visit(*self);
    }
}

// ============================================================================
// Trace implementations for primitive types
// ============================================================================

macro_rules! impl_trace_for_leaf {
    ($($t:ty),* $(,)?) => {
        $(
            impl Trace for $t {
                #[inline]
                fn trace(&self, _visitor: &mut dyn Visitor) {}
            }
        )*
    };
}

impl_trace_for_leaf!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    str,
    String,
    std::num::NonZeroU8,
    std::num::NonZeroU16,
    std::num::NonZeroU32,
    std::num::NonZeroU64,
    std::num::NonZeroUsize,
    std::num::NonZeroI32,
    std::num::NonZeroI64,
    std::time::Duration,
);

// ============================================================================
// Trace implementations for std containers
// ============================================================================

impl<T: Trace + ?Sized> Trace for &T {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        T::trace(*self, visitor);
    }
}

impl<T: Trace + ?Sized> Trace for Box<T> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        T::trace(self.as_ref(), visitor);
    }
}

impl<T: Trace + ?Sized> Trace for Rc<T> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        T::trace(self.as_ref(), visitor);
    }
}

impl<T: Trace + ?Sized> Trace for Arc<T> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        T::trace(self.as_ref(), visitor);
    }
}

impl<T: Trace> Trace for Option<T> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        if let Some(inner) = self {
            inner.trace(visitor);
        }
    }
}

impl<T: Trace, E: Trace> Trace for Result<T, E> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        match self {
            Ok(v) => v.trace(visitor),
            Err(e) => e.trace(visitor),
        }
    }
}

impl<T: Trace> Trace for [T] {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

impl<T: Trace, const N: usize> Trace for [T; N] {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

impl<T: Trace> Trace for Vec<T> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

impl<T: Trace> Trace for VecDeque<T> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

impl<T: Trace> Trace for LinkedList<T> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

impl<K: Trace, V: Trace, S: BuildHasher> Trace for HashMap<K, V, S> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        for (k, v) in self {
            k.trace(visitor);
            v.trace(visitor);
        }
    }
}

impl<T: Trace, S: BuildHasher> Trace for HashSet<T, S> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

impl<K: Trace, V: Trace> Trace for BTreeMap<K, V> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        for (k, v) in self {
            k.trace(visitor);
            v.trace(visitor);
        }
    }
}

impl<T: Trace> Trace for BTreeSet<T> {
    #[inline]
    fn trace(&self, visitor: &mut dyn Visitor) {
        for item in self {
            item.trace(visitor);
        }
    }
}

impl<T: ?Sized> Trace for std::marker::PhantomData<T> {
    #[inline]
    fn trace(&self, _visitor: &mut dyn Visitor) {}
}

// ============================================================================
// Trace implementations for tuples
// ============================================================================

macro_rules! impl_trace_for_tuples {
    () => {};
    ($first:ident $(, $rest:ident)*) => {
        impl<$first: Trace $(, $rest: Trace)*> Trace for ($first, $($rest,)*) {
            #[inline]
            #[allow(non_snake_case)]
            fn trace(&self, visitor: &mut dyn Visitor) {
                let ($first, $($rest,)*) = self;
                $first.trace(visitor);
                $($rest.trace(visitor);)*
            }
        }
        impl_trace_for_tuples!($($rest),*);
    };
}

impl_trace_for_tuples!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<T: Trace + ?Sized>(value: &T) -> Vec<ObjRef> {
        let mut out = Vec::new();
        value.trace(&mut |obj| out.push(obj));
        out
    }

    #[test]
    fn test_containers_visit_every_ref() {
        let a = ObjRef::new(0, 0);
        let b = ObjRef::new(1, 0);
        let c = ObjRef::new(2, 0);

        assert_eq!(collect(&vec![a, b]), vec![a, b]);
        assert_eq!(collect(&Some(c)), vec![c]);
        assert!(collect(&None::<ObjRef>).is_empty());
        assert_eq!(collect(&(a, 7_u32, Some(b))), vec![a, b]);
        assert_eq!(collect(&Box::new([c, a])), vec![c, a]);

        let mut map = BTreeMap::new();
        map.insert(1_u32, b);
        map.insert(2_u32, c);
        assert_eq!(collect(&map), vec![b, c]);
    }

    #[test]
    fn test_leaves_visit_nothing() {
        assert!(collect(&42_u64).is_empty());
        assert!(collect(&String::from("leaf")).is_empty());
        assert!(collect("leaf").is_empty());
    }
}
