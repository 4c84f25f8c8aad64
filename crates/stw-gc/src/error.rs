//! Mutator-facing errors.
//!
//! Collector bugs are not represented here: they abort the process. Full or
//! empty queues are not errors either and come back as plain values.

use crate::object::ObjRef;

/// Errors reported to mutators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GcError {
    /// The heap could not satisfy an allocation even after a collection.
    OutOfMemory {
        /// Accounted size of the failed allocation.
        requested: usize,
        /// Heap limit in bytes.
        limit: usize,
    },
    /// The handle refers to an object that has been reclaimed.
    InvalidReference(ObjRef),
    /// The object holds a different payload type.
    TypeMismatch {
        /// Requested type.
        expected: &'static str,
        /// Type recorded in the object's descriptor.
        found: &'static str,
    },
    /// Permanent objects cannot be mutated.
    PermanentObject(ObjRef),
}

impl std::fmt::Display for GcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfMemory { requested, limit } => write!(
                f,
                "GC: out of memory allocating {requested} bytes (heap limit {limit} bytes)"
            ),
            Self::InvalidReference(obj) => write!(f, "GC: invalid reference {obj:?}"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "GC: expected object of type {expected}, found {found}")
            }
            Self::PermanentObject(obj) => write!(f, "GC: permanent object {obj:?} is immutable"),
        }
    }
}

impl std::error::Error for GcError {}
