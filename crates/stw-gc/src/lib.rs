//! A stop-the-world mark-sweep garbage collector core.
//!
//! `stw-gc` manages a heap of traceable objects shared by any number of
//! mutator threads. One background GC thread per [`Runtime`] stops every
//! mutator at a safepoint, marks everything reachable from the roots through
//! an intrusive mark queue, sweeps the rest and resumes the world.
//!
//! # Features
//!
//! - **Cycle collection**: reachability, not reference counts, decides liveness
//! - **Intrusive mark queue**: the mark bit and the queue link share one header word
//! - **Epoch scheduling**: collections are requested and awaited by epoch number
//! - **Weak references, finalizers and permanent objects**
//! - **Lock-free [`BoundedQueue`]**: the MPMC ring feeding the finalizer thread
//!
//! # Quick Start
//!
//! ```
//! use stw_gc::{GcConfig, ObjRef, Runtime, Trace};
//!
//! #[derive(Trace)]
//! struct Node {
//!     value: i32,
//!     next: Option<ObjRef>,
//! }
//!
//! let runtime = Runtime::new(GcConfig::default()).unwrap();
//! let mutator = runtime.attach();
//!
//! // Create a cycle a -> b -> a, reachable only through `a`.
//! let a = mutator.alloc(Node { value: 1, next: None }).unwrap();
//! mutator.push_root(a).unwrap();
//! let b = mutator.alloc(Node { value: 2, next: Some(a) }).unwrap();
//! mutator.with_mut(a, |node: &mut Node| node.next = Some(b)).unwrap();
//!
//! mutator.collect();
//! assert!(mutator.is_alive(b));
//!
//! mutator.pop_root(a);
//! mutator.collect(); // The cycle is unreachable and freed.
//! assert!(!mutator.is_alive(a));
//! assert!(!mutator.is_alive(b));
//! ```
//!
//! # Thread Safety
//!
//! [`ObjRef`] handles are plain `Copy` values and may move between threads.
//! A [`Mutator`] is bound to the thread that attached it.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

// Lets `#[derive(Trace)]` name `::stw_gc` from inside this crate.
extern crate self as stw_gc;

pub mod bounded_queue;
pub mod config;
mod error;
pub mod finalizer;
pub mod gc;
pub mod heap;
pub mod metrics;
mod mutator;
pub mod object;
pub mod roots;
mod runtime;
pub mod safepoint;
mod trace;
mod tracing;

// Re-export public API
pub use bounded_queue::BoundedQueue;
pub use config::{GcConfig, SchedulerConfig};
pub use error::GcError;
pub use finalizer::FinalizerJob;
pub use gc::mark::{GcHandle, MarkPhase, MarkStats, RootSource, SingleThreadMark, WeakProcessing};
pub use gc::mark_queue::{MarkQueue, MarkTraits};
pub use gc::state::{GcPhase, GcStateHolder, ScheduleWait};
pub use heap::{Heap, SweepStats};
pub use metrics::{CumulativeMetrics, GcMetrics};
pub use mutator::Mutator;
pub use object::{Finalize, MarkState, ObjRef, ObjectData, TypeInfo, WeakReference};
pub use runtime::Runtime;
pub use safepoint::{MutatorId, MutatorRegistry};
pub use trace::{Trace, Visitor};

// Re-export derive macro when feature is enabled
#[cfg(feature = "derive")]
pub use stw_gc_derive::Trace;
