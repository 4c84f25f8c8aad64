//! Collector internals.
//!
//! - [`mark_queue`]: the intrusive worklist and the tracing protocol
//! - [`mark`]: the stop-the-world mark pass
//! - [`state`]: epochs and phase shared with mutators
//! - [`scheduler`]: heap-size and interval triggers
//! - `thread`: the background loop driving full collections

pub mod mark;
pub mod mark_queue;
pub mod scheduler;
pub mod state;
pub(crate) mod thread;

pub use mark::{GcHandle, MarkPhase, MarkStats, RootSource, SingleThreadMark, WeakProcessing};
pub use mark_queue::{MarkQueue, MarkTraits};
pub use scheduler::{GcScheduler, SchedulerConfig};
pub use state::{GcPhase, GcStateHolder, ScheduleWait};
