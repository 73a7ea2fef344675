//! Task scheduling: priority sink, pending-request registry, and
//! per-resource named mutex (spec §4.7).

pub mod named_mutex;
pub mod pending;
pub mod sink;

pub use named_mutex::{NamedMutexGuard, NamedMutexStorage};
pub use pending::{PendingGuard, PendingRequests};
pub use sink::{Priority, TaskSink};
