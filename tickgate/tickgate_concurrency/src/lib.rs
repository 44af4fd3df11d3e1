#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Tickgate Concurrency
//!
//! Concurrency primitives for hosts that own a single designated thread,
//! such as a game loop or a UI thread, and need background work to reach it
//! without stalling its tick.
//!
//! - A time-gated execution context that runs posted work once per tick
//! - A main-thread dispatcher with fire-and-forget, awaitable and blocking
//!   submission
//! - A thread-safe priority queue
//! - An asynchronous resource pool with coalesced background refills
//!
//! ## Example
//!
//! ```
//! use tickgate_concurrency::MainThreadDispatcher;
//!
//! let dispatcher = MainThreadDispatcher::default();
//! let handle = dispatcher.handle();
//!
//! let future = handle.enqueue_with(|| 2 + 2).unwrap();
//! dispatcher.pump();
//! assert_eq!(future.wait().unwrap(), 4);
//! ```

/// Resource pooling with background refills
pub mod pool;

/// Designated-thread scheduling under a time budget
pub mod scheduler;

/// Priority queueing and completion cells
pub mod sync;

// Re-export key types for easier access
pub use pool::{AsyncResourcePool, PoolStats, ResourceFactory};
pub use scheduler::{
    global, ContextStats, DispatcherHandle, GatedExecutionContext, MainThreadDispatcher,
    PumpReport,
};
pub use sync::{CompletionFuture, ConcurrentPriorityQueue};
