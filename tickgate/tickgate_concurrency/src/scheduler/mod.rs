//! Designated-thread scheduling.
//!
//! Work posted from any thread runs on the thread that pumps the context,
//! within a per-cycle time budget.

pub mod context;
pub mod dispatcher;

// Re-export key types from context
pub use context::{ContextStats, GatedExecutionContext, PumpReport};

// Re-export key types from dispatcher
pub use dispatcher::{global, DispatcherHandle, MainThreadDispatcher};
