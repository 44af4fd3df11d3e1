//! Synchronization primitives.
//!
//! - A mutex-guarded priority queue that any thread can feed
//! - One-shot completion cells bridging the designated thread and its callers

pub mod completion;
pub mod priority_queue;

// Re-export key types from completion
pub use completion::{completion_pair, Completer, CompletionFuture};

// Re-export key types from priority_queue
pub use priority_queue::{Ascending, ConcurrentPriorityQueue, Descending, PriorityOrder};
